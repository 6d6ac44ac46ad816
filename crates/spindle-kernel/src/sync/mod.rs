pub mod syscalls;

use crate::queue::PriorityQueues;
use crate::types::{MutexId, Priority, ThreadId};

/// Kernel mutex: at most one owner, and a per-priority FIFO of threads
/// waiting to become the next one.
pub struct Mutex {
    pub id: MutexId,
    owner: Option<ThreadId>,
    wait_queue: PriorityQueues<ThreadId>,
}

impl Mutex {
    pub fn new(id: MutexId) -> Self {
        Self {
            id,
            owner: None,
            wait_queue: PriorityQueues::new(),
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Owned, or with threads queued for it
    pub fn is_in_use(&self) -> bool {
        self.owner.is_some() || !self.wait_queue.is_empty()
    }

    /// Take ownership if the mutex is free.
    pub fn try_acquire(&mut self, thread: ThreadId) -> bool {
        if self.owner.is_some() {
            return false;
        }
        self.owner = Some(thread);
        true
    }

    pub fn enqueue_waiter(&mut self, thread: ThreadId, priority: Priority) {
        self.wait_queue.push(priority, thread);
    }

    pub fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        self.wait_queue.remove_first(|&t| t == thread).is_some()
    }

    pub fn has_waiters(&self) -> bool {
        !self.wait_queue.is_empty()
    }

    pub fn waiters(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.wait_queue.iter().map(|(_, &t)| t)
    }

    /// Drop the current owner and hand the mutex to the oldest waiter of
    /// the highest waiting priority, which is returned.
    pub fn release(&mut self) -> Option<ThreadId> {
        self.owner = self.wait_queue.pop_highest().map(|(_, thread)| thread);
        self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(id: u32) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[test]
    fn release_hands_to_highest_waiter() {
        let mut m = Mutex::new(MutexId::new(1).unwrap());
        assert!(m.try_acquire(tid(1)));
        assert!(!m.try_acquire(tid(2)));

        m.enqueue_waiter(tid(3), Priority::Low);
        m.enqueue_waiter(tid(4), Priority::High);
        m.enqueue_waiter(tid(5), Priority::High);

        assert_eq!(m.release(), Some(tid(4)));
        assert_eq!(m.owner(), Some(tid(4)));
        assert_eq!(m.waiters().collect::<Vec<_>>(), [tid(5), tid(3)]);
        assert_eq!(m.release(), Some(tid(5)));
        assert_eq!(m.release(), Some(tid(3)));
        assert_eq!(m.release(), None);
        assert!(!m.is_in_use());
    }

    #[test]
    fn withdrawn_waiter_is_skipped() {
        let mut m = Mutex::new(MutexId::new(1).unwrap());
        m.try_acquire(tid(1));
        m.enqueue_waiter(tid(2), Priority::Normal);
        assert!(m.remove_waiter(tid(2)));
        assert!(!m.remove_waiter(tid(2)));
        assert_eq!(m.release(), None);
    }
}
