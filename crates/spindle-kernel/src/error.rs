use crate::types::IdKind;
use spindle_machine::MachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("{kind} {id} not found")]
    NotFound { kind: IdKind, id: u32 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource in use")]
    InUse,

    #[error("cannot satisfy request for {requested} bytes (capacity {capacity})")]
    ResourceExhausted { requested: usize, capacity: usize },

    #[error("timed out")]
    Timeout,

    #[error("I/O failure: {0}")]
    Io(i32),

    #[error("{0} identifiers exhausted")]
    IdsExhausted(IdKind),

    #[error("no runnable thread")]
    NoRunnableThread,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("machine error: {0}")]
    Machine(#[from] MachineError),
}

impl KernelError {
    pub(crate) fn not_found(kind: IdKind, id: u32) -> Self {
        KernelError::NotFound { kind, id }
    }
}
