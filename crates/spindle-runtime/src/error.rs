use spindle_kernel::KernelError;
use spindle_machine::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: unknown name '{name}'")]
    UnknownName { line: usize, name: String },

    #[error("line {line}: '{name}' is not a {expected}")]
    WrongKind {
        line: usize,
        name: String,
        expected: &'static str,
    },

    #[error("line {line}: expectation failed: {message}")]
    Expectation { line: usize, message: String },

    #[error("line {line}: {source}")]
    Kernel {
        line: usize,
        #[source]
        source: KernelError,
    },

    #[error("line {line}: memory access failed: {source}")]
    Memory {
        line: usize,
        #[source]
        source: MemoryError,
    },

    #[error("no script loaded")]
    NoProgram,

    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel boot failed: {0}")]
    Boot(#[from] KernelError),
}
