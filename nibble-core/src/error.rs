use thiserror::Error;

use crate::diagnostic::Diagnostics;
use crate::vm::Fault;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("compilation failed:\n{0}")]
    Compile(#[from] Diagnostics),
    #[error("execution faulted: {0}")]
    Fault(#[from] Fault),
}

impl CoreError {
    /// Process exit status a host should report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::SourceIo(_) | CoreError::Compile(_) => 1,
            CoreError::Fault(fault) => i32::from(fault.code()),
        }
    }
}
