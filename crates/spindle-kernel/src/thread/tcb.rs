use crate::error::KernelError;
use crate::types::{LockResult, MutexId, PoolId, Priority, ThreadId, Tick};
use spindle_machine::{Address, ContextRef, IoToken, StackRegion, ThreadEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On exactly one ready list, except the idle thread, which is never
    /// queued and runs only when every list is empty
    Ready,
    Running,
    Waiting,
    Dead,
}

/// Why a WAITING thread is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Sleep,
    Mutex(MutexId),
    Memory { pool: PoolId, size: usize },
    Io(IoToken),
}

/// Entry in a thread's ordered mutex list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexHold {
    pub mutex: MutexId,
    /// Queued for the mutex rather than owning it
    pub waiting: bool,
}

pub struct ThreadControlBlock {
    pub id: ThreadId,
    pub priority: Priority,
    pub state: ThreadState,
    /// `None` for the main thread, which runs on the boot context
    pub entry: Option<(ThreadEntry, usize)>,
    pub stack: Option<StackRegion>,
    pub context: ContextRef,
    /// Countdown for sleeps and bounded mutex waits
    pub ticks_to_sleep: Option<Tick>,
    pub wait_reason: Option<WaitReason>,
    /// Held mutexes in acquisition order; a waiting entry is always last
    pub mutexes: Vec<MutexHold>,
    /// In-flight file request, if any
    pub io_token: Option<IoToken>,
    pub io_result: Option<i32>,
    pub memory_result: Option<Address>,
    pub lock_result: Option<LockResult>,
    pub quantum_used: Tick,
}

impl ThreadControlBlock {
    pub fn new(
        id: ThreadId,
        priority: Priority,
        entry: Option<(ThreadEntry, usize)>,
        stack: Option<StackRegion>,
        context: ContextRef,
    ) -> Self {
        Self {
            id,
            priority,
            state: ThreadState::Ready,
            entry,
            stack,
            context,
            ticks_to_sleep: None,
            wait_reason: None,
            mutexes: Vec::new(),
            io_token: None,
            io_result: None,
            memory_result: None,
            lock_result: None,
            quantum_used: 0,
        }
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, to: ThreadState) -> Result<(), KernelError> {
        use ThreadState::*;

        let allowed = matches!(
            (self.state, to),
            (Running, Ready)
                | (Ready, Running)
                | (Running, Waiting)
                | (Ready, Waiting)
                | (Waiting, Ready)
                | (Running, Dead)
                | (Ready, Dead)
                | (Waiting, Dead)
        );
        if !allowed {
            return Err(KernelError::InvalidState(format!(
                "thread {} cannot go from {:?} to {:?}",
                self.id, self.state, to
            )));
        }

        if to != Waiting {
            self.wait_reason = None;
            self.ticks_to_sleep = None;
        }
        if to == Running {
            self.quantum_used = 0;
        }
        self.state = to;
        Ok(())
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }

    pub fn add_mutex(&mut self, mutex: MutexId, waiting: bool) {
        self.mutexes.push(MutexHold { mutex, waiting });
    }

    /// The mutex this thread is queued on, if the tail entry is a wait
    pub fn waiting_mutex(&self) -> Option<MutexId> {
        self.mutexes
            .last()
            .filter(|hold| hold.waiting)
            .map(|hold| hold.mutex)
    }

    /// Turn the pending tail entry into ownership.
    pub fn grant_waiting_mutex(&mut self) {
        if let Some(hold) = self.mutexes.last_mut() {
            hold.waiting = false;
        }
    }

    pub fn remove_mutex(&mut self, mutex: MutexId) -> bool {
        match self.mutexes.iter().position(|hold| hold.mutex == mutex) {
            Some(pos) => {
                self.mutexes.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn owned_mutexes(&self) -> impl Iterator<Item = MutexId> + '_ {
        self.mutexes
            .iter()
            .filter(|hold| !hold.waiting)
            .map(|hold| hold.mutex)
    }

    pub fn owns(&self, mutex: MutexId) -> bool {
        self.owned_mutexes().any(|m| m == mutex)
    }

    /// Charge one tick of the timer to a timed wait. True once it expires.
    pub fn decrement_ticks_to_sleep(&mut self) -> bool {
        match self.ticks_to_sleep {
            Some(ticks) if ticks > 1 => {
                self.ticks_to_sleep = Some(ticks - 1);
                false
            }
            Some(_) => {
                self.ticks_to_sleep = None;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb() -> ThreadControlBlock {
        ThreadControlBlock::new(
            ThreadId::new(3).unwrap(),
            Priority::Normal,
            None,
            None,
            ContextRef::BOOT,
        )
    }

    #[test]
    fn rejects_leaving_dead() {
        let mut t = tcb();
        t.transition(ThreadState::Running).unwrap();
        t.transition(ThreadState::Dead).unwrap();
        assert!(t.transition(ThreadState::Ready).is_err());
        assert!(t.transition(ThreadState::Running).is_err());
        assert_eq!(t.state, ThreadState::Dead);
    }

    #[test]
    fn waiting_cannot_run_directly() {
        let mut t = tcb();
        t.transition(ThreadState::Waiting).unwrap();
        assert!(t.transition(ThreadState::Running).is_err());
        t.transition(ThreadState::Ready).unwrap();
        t.transition(ThreadState::Running).unwrap();
    }

    #[test]
    fn tail_mutex_is_the_blocking_one() {
        let mut t = tcb();
        let a = MutexId::new(1).unwrap();
        let b = MutexId::new(2).unwrap();
        t.add_mutex(a, false);
        assert_eq!(t.waiting_mutex(), None);
        t.add_mutex(b, true);
        assert_eq!(t.waiting_mutex(), Some(b));
        assert!(t.owns(a) && !t.owns(b));

        t.grant_waiting_mutex();
        assert_eq!(t.waiting_mutex(), None);
        assert_eq!(t.owned_mutexes().collect::<Vec<_>>(), [a, b]);
        assert!(t.remove_mutex(a));
        assert!(!t.remove_mutex(a));
    }

    #[test]
    fn sleep_countdown() {
        let mut t = tcb();
        t.ticks_to_sleep = Some(2);
        assert!(!t.decrement_ticks_to_sleep());
        assert!(t.decrement_ticks_to_sleep());
        assert!(!t.decrement_ticks_to_sleep());
    }
}
