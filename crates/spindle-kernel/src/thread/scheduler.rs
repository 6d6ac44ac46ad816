use crate::queue::PriorityQueues;
use crate::types::{Priority, ThreadId};

pub trait Scheduler: Send {
    /// Pop the next thread to run: head of the highest non-empty ready list
    fn schedule(&mut self) -> Option<ThreadId>;

    /// Append thread to the tail of its priority's ready list
    fn enqueue(&mut self, thread: ThreadId, priority: Priority);

    /// Remove thread from the ready lists (e.g. if blocked or terminated)
    fn dequeue(&mut self, thread: ThreadId) -> bool;

    /// Priority of the thread `schedule` would return
    fn highest_ready(&self) -> Option<Priority>;

    /// Ready threads, highest level first, oldest first within a level
    fn ready_threads(&self) -> Vec<(Priority, ThreadId)>;
}

#[derive(Default)]
pub struct PriorityScheduler {
    ready_lists: PriorityQueues<ThreadId>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for PriorityScheduler {
    fn schedule(&mut self) -> Option<ThreadId> {
        self.ready_lists.pop_highest().map(|(_, thread)| thread)
    }

    fn enqueue(&mut self, thread: ThreadId, priority: Priority) {
        if !self.ready_lists.push(priority, thread) {
            log::trace!("not queueing {} at idle priority", thread);
        }
    }

    fn dequeue(&mut self, thread: ThreadId) -> bool {
        self.ready_lists.remove_first(|&t| t == thread).is_some()
    }

    fn highest_ready(&self) -> Option<Priority> {
        self.ready_lists.highest_priority()
    }

    fn ready_threads(&self) -> Vec<(Priority, ThreadId)> {
        self.ready_lists.iter().map(|(p, &t)| (p, t)).collect()
    }
}
