//! Core pipeline of the nibble expression evaluator.
//!
//!   source text
//!     -> lexer     (tokens)
//!     -> parser    (expression tree)
//!     -> compiler  (typed bytecode + constant region)
//!     -> vm        (register machine)
//!
//! Hosts (the CLI, embedding applications) should depend on this crate
//! rather than reimplementing any stage.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod ast;
pub mod parser;

// ---------------------------------------------------------------------
// Types, values and the shared instruction encoding
// ---------------------------------------------------------------------

pub mod types;
pub mod value;
pub mod bytecode;
pub mod disasm;

// ---------------------------------------------------------------------
// Back-end: compilation and execution
// ---------------------------------------------------------------------

pub mod compiler;
pub mod vm;

pub mod sources;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{Program, compile, evaluate};
pub use diagnostic::{Diagnostic, Diagnostics};
pub use error::CoreError;
pub use types::TypeTag;
pub use value::Scalar;
pub use vm::{Fault, Vm, VmConfig};
