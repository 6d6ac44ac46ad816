use crate::context::ContextRef;
use crate::memory::Address;

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("unknown context: {0:?}")]
    UnknownContext(ContextRef),

    #[error("out of machine memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("context identifiers exhausted")]
    ContextsExhausted,

    #[error("timer interval must be non-zero")]
    InvalidTimerInterval,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("out of bounds access: {addr:#x} (+{len})")]
    OutOfBounds { addr: usize, len: usize },
}

impl MemoryError {
    pub fn out_of_bounds(addr: Address, len: usize) -> Self {
        MemoryError::OutOfBounds {
            addr: addr.val(),
            len,
        }
    }
}
