use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use nibble_core::disasm::disassemble;
use nibble_core::lexer::tokenize;
use nibble_core::sources::load_sources;
use nibble_core::vm::DEFAULT_STACK_CAPACITY;
use nibble_core::{CoreError, Program, Vm, VmConfig, compile, evaluate, parser};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Compile and run typed arithmetic expressions.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source file to read (stdin when neither this nor --expr is given)
    #[arg(short, long, value_name = "FILE", conflicts_with = "expr")]
    input: Option<PathBuf>,

    /// Inline source text
    #[arg(short, long, value_name = "SOURCE")]
    expr: Option<String>,

    /// Write the compiled bytecode to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, value_name = "FORMAT", help = "Print an intermediate form")]
    emit: Option<Emit>,

    #[arg(long, help = "Execute the program and print its result")]
    run: bool,

    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_STACK_CAPACITY)]
    stack_size: usize,

    #[arg(long, value_name = "N", help = "Fault after executing N instructions")]
    max_steps: Option<u64>,

    #[arg(
        long,
        value_name = "DIR",
        conflicts_with_all = ["input", "expr", "output", "emit"],
        help = "Evaluate every .nib file beneath DIR"
    )]
    dir: Option<PathBuf>,

    #[arg(short, long, help = "Log compiler and VM activity to stderr")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
    Bytecode,
    Disasm,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        VmConfig {
            stack_capacity: self.stack_size,
            step_limit: self.max_steps,
        }
    }

    /// Run when asked to, or when nothing else was requested.
    fn should_run(&self) -> bool {
        self.run || (self.emit.is_none() && self.output.is_none())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match execute(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "nibble=debug" } else { "nibble=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn execute(cli: &Cli) -> Result<ExitCode> {
    if let Some(dir) = &cli.dir {
        return run_directory(dir, &cli.vm_config());
    }

    let source = read_source(cli)?;

    if let Some(emit) = cli.emit {
        match emit {
            Emit::Tokens => {
                for token in tokenize(&source) {
                    println!("{:>4} {:?} {:?}", token.line(), token.kind, token.text(&source));
                }
            }
            Emit::Ast => {
                let expr = parser::parse(&source)
                    .into_result()
                    .map_err(|diagnostics| compile_error(&source, diagnostics.into()))?;
                print!("{expr}");
            }
            Emit::Bytecode => println!("{}", hex(compile_source(&source)?.bytes())),
            Emit::Disasm => print!("{}", disassemble(&compile_source(&source)?)),
        }
    }

    let needs_program = cli.output.is_some() || cli.should_run();
    if !needs_program {
        return Ok(ExitCode::SUCCESS);
    }
    let program = compile_source(&source)?;

    if let Some(path) = &cli.output {
        write_output(path, program.bytes())?;
        debug!(path = %path.display(), bytes = program.len(), "wrote bytecode");
    }

    if cli.should_run() {
        let mut vm = Vm::with_config(cli.vm_config());
        vm.load(program.bytes());
        if let Err(fault) = vm.execute() {
            eprintln!("fault {}: {fault}", fault.code());
            return Ok(ExitCode::from(fault.code()));
        }
        let value = vm
            .result(program.result_type())
            .ok_or_else(|| anyhow!("program left no readable result"))?;
        println!("{value} ({})", program.result_type());
    }

    Ok(ExitCode::SUCCESS)
}

fn read_source(cli: &Cli) -> Result<String> {
    if let Some(expr) = &cli.expr {
        return Ok(expr.clone());
    }
    match &cli.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display())),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read source from stdin")?;
            Ok(buffer)
        }
    }
}

fn compile_source(source: &str) -> Result<Program> {
    compile(source).map_err(|diagnostics| compile_error(source, diagnostics))
}

fn compile_error(source: &str, diagnostics: nibble_core::Diagnostics) -> anyhow::Error {
    anyhow!("compilation failed\n{}", diagnostics.render(source))
}

/// Evaluate each source file; keeps going after failures and reports them
/// all at the end.
fn run_directory(dir: &Path, config: &VmConfig) -> Result<ExitCode> {
    let files = load_sources(dir)
        .with_context(|| format!("failed to load sources from {}", dir.display()))?;
    let mut failures = 0usize;
    for file in &files {
        match evaluate(&file.contents, config) {
            Ok(value) => println!("{}: {value}", file.path.display()),
            Err(CoreError::Compile(diagnostics)) => {
                failures += 1;
                eprintln!("{}: {}", file.path.display(), diagnostics.render(&file.contents));
            }
            Err(err) => {
                failures += 1;
                eprintln!("{}: {err}", file.path.display());
            }
        }
    }
    if failures > 0 {
        return Err(anyhow!("{failures} of {} files failed", files.len()));
    }
    Ok(ExitCode::SUCCESS)
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
