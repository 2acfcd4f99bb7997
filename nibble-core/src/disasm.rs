//! Human-readable listing of a compiled program.

use std::fmt::Write;

use crate::bytecode::Instruction;
use crate::compiler::Program;

/// Bytes per line in the constant dump.
const DUMP_WIDTH: usize = 8;

/// Render `program` as an instruction listing followed by a hex dump of its
/// constant region. Branch targets are marked with `►`.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "; {} bytes, {} code, result {}",
        program.len(),
        program.code_len(),
        program.result_type()
    );
    write_code(&mut out, program.bytes(), program.code_len());
    write_constants(&mut out, program.bytes(), program.code_len());
    out
}

/// List the instructions in `bytes[..code_len]`. Stops at the first byte
/// that does not decode.
pub fn write_code(out: &mut String, bytes: &[u8], code_len: usize) {
    let code = &bytes[..code_len.min(bytes.len())];
    let decoded = decode_all(code);
    let targets = collect_jump_targets(&decoded);

    for (pc, instruction) in &decoded {
        let marker = if targets.contains(pc) { "►" } else { " " };
        let _ = writeln!(out, "{pc:04} {marker} {instruction}");
    }

    let end = decoded
        .last()
        .map_or(0, |(pc, instruction)| pc + instruction.encoded_len());
    if end < code.len() {
        let _ = writeln!(out, "{end:04}   <invalid 0x{:02x}>", code[end]);
    }
}

fn write_constants(out: &mut String, bytes: &[u8], code_len: usize) {
    let Some(constants) = bytes.get(code_len..).filter(|c| !c.is_empty()) else {
        return;
    };
    let _ = writeln!(out, "; constants");
    for (row, chunk) in constants.chunks(DUMP_WIDTH).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let _ = writeln!(out, "{:04}   {}", code_len + row * DUMP_WIDTH, hex.join(" "));
    }
}

fn decode_all(code: &[u8]) -> Vec<(usize, Instruction)> {
    let mut decoded = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        match Instruction::decode(code, pc) {
            Ok((instruction, next)) => {
                decoded.push((pc, instruction));
                pc = next;
            }
            Err(_) => break,
        }
    }
    decoded
}

fn collect_jump_targets(decoded: &[(usize, Instruction)]) -> Vec<usize> {
    let mut targets = Vec::new();
    for (_, instruction) in decoded {
        let target = match instruction {
            Instruction::Call { target }
            | Instruction::Jmp { target }
            | Instruction::Jmpz { target }
            | Instruction::Jmpnz { target } => *target,
            _ => continue,
        };
        if let Ok(target) = usize::try_from(target) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}
