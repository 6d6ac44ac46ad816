use crate::memory::Address;
use core::num::NonZeroU32;

/// Entry point of a logical thread. Receives the argument given at creation.
pub type ThreadEntry = fn(usize);

/// Opaque handle to an execution context owned by the machine
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextRef(NonZeroU32);

impl ContextRef {
    /// Context the host process was executing on when the machine started.
    pub const BOOT: ContextRef = ContextRef(NonZeroU32::MIN);

    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

/// Stack memory handed to a new context. The region is owned by exactly one thread.
#[derive(Debug, PartialEq, Eq)]
pub struct StackRegion {
    pub base: Address,
    pub size: usize,
}

impl StackRegion {
    pub fn top(&self) -> Address {
        self.base + self.size
    }
}
