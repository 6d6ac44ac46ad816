use crate::error::KernelError;
use core::fmt;
use core::num::NonZeroU32;

/// One timer period; the unit of sleep duration and quantum length
pub type Tick = u32;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(id: u32) -> Option<Self> {
                NonZeroU32::new(id).map(Self)
            }

            pub fn val(&self) -> u32 {
                self.0.get()
            }
        }

        impl From<NonZeroU32> for $name {
            fn from(id: NonZeroU32) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Thread identifier
    ThreadId
);
define_id!(
    /// Mutex identifier
    MutexId
);
define_id!(
    /// Memory pool identifier
    PoolId
);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IdKind {
    Thread,
    Mutex,
    Pool,
    IoRequest,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdKind::Thread => "thread",
            IdKind::Mutex => "mutex",
            IdKind::Pool => "memory pool",
            IdKind::IoRequest => "I/O request",
        };
        f.pad(name)
    }
}

/// Issues monotonically increasing ids for one kind of object. Ids are never reused.
pub(crate) struct IdCounter {
    kind: IdKind,
    next: Option<NonZeroU32>,
}

impl IdCounter {
    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            next: Some(NonZeroU32::MIN),
        }
    }

    pub fn issue<T: From<NonZeroU32>>(&mut self) -> Result<T, KernelError> {
        self.issue_raw().map(T::from)
    }

    pub fn issue_raw(&mut self) -> Result<NonZeroU32, KernelError> {
        let id = self.next.ok_or(KernelError::IdsExhausted(self.kind))?;
        self.next = id.checked_add(1);
        Ok(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Reserved for the idle thread
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
}

pub const USER_PRIORITY_LEVELS: usize = 3;

impl Priority {
    /// User levels, highest first
    pub const USER_LEVELS: [Priority; USER_PRIORITY_LEVELS] =
        [Priority::High, Priority::Normal, Priority::Low];

    /// Slot in a per-level queue array; `None` for the idle level
    pub fn user_index(self) -> Option<usize> {
        match self {
            Priority::Idle => None,
            Priority::Low => Some(0),
            Priority::Normal => Some(1),
            Priority::High => Some(2),
        }
    }

    pub fn is_user(self) -> bool {
        self != Priority::Idle
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Idle => "idle",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.pad(name)
    }
}

/// Bound on how long a mutex lock may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail at once if the mutex is owned
    Immediate,
    Infinite,
    Ticks(Tick),
}

/// Outcome of a request that may suspend the calling thread.
///
/// `Blocked` means the caller is now WAITING; once it runs again its
/// result is waiting in its control block (`Kernel::take_*_result`).
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Done(T),
    Blocked,
}

impl<T> Completion<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Completion::Blocked)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Completion::Done(value) => Some(value),
            Completion::Blocked => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Acquired,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut counter = IdCounter::new(IdKind::Mutex);
        let a: MutexId = counter.issue().unwrap();
        let b: MutexId = counter.issue().unwrap();
        assert_eq!(a.val(), 1);
        assert_eq!(b.val(), 2);
    }

    #[test]
    fn counter_reports_exhaustion() {
        let mut counter = IdCounter {
            kind: IdKind::Pool,
            next: NonZeroU32::new(u32::MAX),
        };
        let last: PoolId = counter.issue().unwrap();
        assert_eq!(last.val(), u32::MAX);
        assert!(matches!(
            counter.issue::<PoolId>(),
            Err(KernelError::IdsExhausted(IdKind::Pool))
        ));
    }

    #[test]
    fn priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Low > Priority::Idle);
        assert_eq!(Priority::Idle.user_index(), None);
        assert_eq!(Priority::USER_LEVELS[0], Priority::High);
    }
}
