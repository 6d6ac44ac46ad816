use crate::error::KernelError;

/// Boot parameters for a kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Period of the machine timer, one tick
    pub tick_interval_ms: u64,
    /// Ticks a thread may run before yielding to an equal-priority peer
    pub quantum_ticks: u32,
    /// Size of the system pool; thread stacks are carved from it
    pub system_heap_size: usize,
    /// Size of the pool I/O buffers are carved from
    pub shared_memory_size: usize,
    pub idle_stack_size: usize,
    /// Largest single request handed to the machine for a read or write
    pub io_chunk_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            quantum_ticks: 1,
            system_heap_size: 0x10_0000,
            shared_memory_size: 0x4000,
            idle_stack_size: 0x400,
            io_chunk_size: 512,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), KernelError> {
        let invalid = |msg: &str| Err(KernelError::InvalidConfig(msg.into()));

        if self.tick_interval_ms == 0 {
            return invalid("tick interval must be non-zero");
        }
        if self.quantum_ticks == 0 {
            return invalid("quantum must be at least one tick");
        }
        if self.system_heap_size == 0 || self.shared_memory_size == 0 {
            return invalid("memory pools must be non-empty");
        }
        if self.idle_stack_size == 0 || self.idle_stack_size > self.system_heap_size {
            return invalid("idle stack must fit in the system pool");
        }
        if self.io_chunk_size == 0 || self.io_chunk_size > self.shared_memory_size {
            return invalid("I/O chunk must fit in the shared pool");
        }
        Ok(())
    }
}
