use crate::memory::Address;
use bitflags::bitflags;
use core::num::NonZeroU32;

/// Correlates a submitted request with its completion callback
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IoToken(NonZeroU32);

impl IoToken {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Asynchronous file request. Completion reports a non-negative value
/// (descriptor, byte count, new offset, or 0) or a negative error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoRequest {
    Open {
        path: String,
        flags: OpenFlags,
        mode: u32,
    },
    Read {
        fd: i32,
        buffer: Address,
        len: usize,
    },
    Write {
        fd: i32,
        buffer: Address,
        len: usize,
    },
    Seek {
        fd: i32,
        offset: i64,
        whence: Whence,
    },
    Close {
        fd: i32,
    },
}

/// Error codes reported through completions
pub const IO_ERR_NOT_FOUND: i32 = -2;
pub const IO_ERR_BAD_DESCRIPTOR: i32 = -9;
pub const IO_ERR_FAULT: i32 = -14;
pub const IO_ERR_INVALID: i32 = -22;
