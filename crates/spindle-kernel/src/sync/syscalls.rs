use crate::error::KernelError;
use crate::sync::Mutex;
use crate::thread::tcb::WaitReason;
use crate::thread::ScheduleMode;
use crate::types::{Completion, IdKind, LockResult, MutexId, ThreadId, Timeout};
use crate::Kernel;
use log::{debug, info, warn};
use spindle_machine::Machine;

impl<M: Machine> Kernel<M> {
    pub fn create_mutex(&mut self) -> Result<MutexId, KernelError> {
        let id: MutexId = self.mutex_ids.issue()?;
        self.mutexes.insert(id, Mutex::new(id));
        info!("Created mutex {}", id);
        Ok(id)
    }

    /// Acquire `mutex` for the running thread.
    ///
    /// A free mutex is granted at once. Otherwise the caller queues behind
    /// the current owner at its own priority and is suspended; when it runs
    /// again [`Kernel::take_lock_result`] says whether it got the mutex or
    /// its timeout fired first.
    pub fn lock_mutex(
        &mut self,
        mutex: MutexId,
        timeout: Timeout,
    ) -> Result<Completion<()>, KernelError> {
        let caller = self.threads.current_thread;
        let m = self.mutex_mut(mutex)?;
        if m.owner() == Some(caller) {
            return Err(KernelError::InvalidState(format!(
                "thread {} already owns mutex {}",
                caller, mutex
            )));
        }
        if m.try_acquire(caller) {
            self.threads.get_mut(caller)?.add_mutex(mutex, false);
            debug!("Thread {} acquired mutex {}", caller, mutex);
            return Ok(Completion::Done(()));
        }

        let countdown = match timeout {
            Timeout::Immediate | Timeout::Ticks(0) => return Err(KernelError::Timeout),
            Timeout::Infinite => None,
            Timeout::Ticks(n) => Some(n),
        };

        let (caller, priority) = self.blocking_caller()?;
        self.mutex_mut(mutex)?.enqueue_waiter(caller, priority);
        self.threads.get_mut(caller)?.add_mutex(mutex, true);
        self.threads
            .block_current(WaitReason::Mutex(mutex), countdown)?;

        self.schedule(ScheduleMode::Strict)?;
        Ok(Completion::Blocked)
    }

    /// Release a mutex held by the running thread, passing it to the next
    /// waiter if there is one.
    pub fn release_mutex(&mut self, mutex: MutexId) -> Result<(), KernelError> {
        let caller = self.threads.current_thread;
        if self.mutex_mut(mutex)?.owner() != Some(caller) {
            return Err(KernelError::InvalidState(format!(
                "thread {} does not own mutex {}",
                caller, mutex
            )));
        }
        self.threads.get_mut(caller)?.remove_mutex(mutex);
        debug!("Thread {} released mutex {}", caller, mutex);

        self.grant_next_owner(mutex)?;
        self.schedule(ScheduleMode::Strict)
    }

    pub fn delete_mutex(&mut self, mutex: MutexId) -> Result<(), KernelError> {
        if self.mutex_mut(mutex)?.is_in_use() {
            warn!("Refusing to delete mutex {} while in use", mutex);
            return Err(KernelError::InUse);
        }
        self.mutexes.remove(&mutex);
        info!("Deleted mutex {}", mutex);
        Ok(())
    }

    pub fn mutex_owner(&self, mutex: MutexId) -> Result<Option<ThreadId>, KernelError> {
        self.mutexes
            .get(&mutex)
            .map(Mutex::owner)
            .ok_or_else(|| KernelError::not_found(IdKind::Mutex, mutex.val()))
    }

    pub fn mutex(&self, mutex: MutexId) -> Result<&Mutex, KernelError> {
        self.mutexes
            .get(&mutex)
            .ok_or_else(|| KernelError::not_found(IdKind::Mutex, mutex.val()))
    }

    /// Consume the outcome of `thread`'s last blocking lock.
    pub fn take_lock_result(&mut self, thread: ThreadId) -> Result<Option<LockResult>, KernelError> {
        Ok(self.threads.get_mut(thread)?.lock_result.take())
    }

    /// Pass ownership of `mutex` to its next waiter, if any, and make that
    /// waiter ready. Does not reschedule.
    pub(crate) fn grant_next_owner(&mut self, mutex: MutexId) -> Result<(), KernelError> {
        let Some(next) = self.mutex_mut(mutex)?.release() else {
            return Ok(());
        };
        let tcb = self.threads.get_mut(next)?;
        tcb.grant_waiting_mutex();
        tcb.lock_result = Some(LockResult::Acquired);
        self.threads.make_ready(next)?;
        debug!("Mutex {} handed to thread {}", mutex, next);
        Ok(())
    }

    /// A timed lock expired before the mutex came free.
    pub(crate) fn abandon_mutex_wait(
        &mut self,
        thread: ThreadId,
        mutex: MutexId,
    ) -> Result<(), KernelError> {
        if let Some(m) = self.mutexes.get_mut(&mutex) {
            m.remove_waiter(thread);
        }
        let tcb = self.threads.get_mut(thread)?;
        tcb.remove_mutex(mutex);
        tcb.lock_result = Some(LockResult::TimedOut);
        debug!("Thread {} timed out waiting for mutex {}", thread, mutex);
        Ok(())
    }

    fn mutex_mut(&mut self, mutex: MutexId) -> Result<&mut Mutex, KernelError> {
        self.mutexes
            .get_mut(&mutex)
            .ok_or_else(|| KernelError::not_found(IdKind::Mutex, mutex.val()))
    }
}
