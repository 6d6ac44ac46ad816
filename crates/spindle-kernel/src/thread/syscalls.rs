use crate::error::KernelError;
use crate::thread::tcb::{ThreadControlBlock, ThreadState, WaitReason};
use crate::thread::ScheduleMode;
use crate::types::{IdKind, Priority, ThreadId, Tick};
use crate::Kernel;
use log::{debug, info, warn};
use spindle_machine::{Machine, StackRegion, ThreadEntry};

impl<M: Machine> Kernel<M> {
    /// Create a READY thread running `entry(argument)` on a stack carved
    /// from the system pool. A new thread of higher priority than the
    /// caller preempts it before this returns.
    pub fn create_thread(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack_size: usize,
        priority: Priority,
    ) -> Result<ThreadId, KernelError> {
        if !priority.is_user() {
            return Err(KernelError::InvalidArgument(
                "idle priority is reserved".into(),
            ));
        }
        if stack_size == 0 {
            return Err(KernelError::InvalidArgument("empty stack".into()));
        }

        let system = self.pool_mut(self.system_pool)?;
        let base = system
            .allocate(stack_size)
            .ok_or(KernelError::ResourceExhausted {
                requested: stack_size,
                capacity: system.unallocated_bytes(),
            })?;
        let stack = StackRegion {
            base,
            size: stack_size,
        };

        let context = match self.machine.create_context(entry, argument, &stack) {
            Ok(context) => context,
            Err(e) => {
                self.pool_mut(self.system_pool)?.deallocate(base);
                return Err(e.into());
            }
        };

        let handle = self
            .threads
            .create_thread(priority, entry, argument, stack, context)?;
        info!(
            "Created thread {} ({}, {} byte stack at {})",
            handle, priority, stack_size, base
        );

        self.schedule(ScheduleMode::Strict)?;
        Ok(handle)
    }

    /// Put the running thread to sleep for `ticks` timer ticks. Zero yields
    /// the processor to the next ready thread of equal or higher priority.
    pub fn sleep_current(&mut self, ticks: Tick) -> Result<(), KernelError> {
        if ticks == 0 {
            return self.schedule(ScheduleMode::RoundRobin);
        }
        self.blocking_caller()?;
        self.threads.block_current(WaitReason::Sleep, Some(ticks))?;
        self.schedule(ScheduleMode::Strict)
    }

    /// One timer period elapsed: expire timed waits, charge the running
    /// thread's quantum, and let the scheduler preempt.
    pub fn timer_tick(&mut self) -> Result<(), KernelError> {
        self.ticks += 1;

        for (thread, reason) in self.threads.expire_timers() {
            if let WaitReason::Mutex(mutex) = reason {
                self.abandon_mutex_wait(thread, mutex)?;
            }
            self.threads.make_ready(thread)?;
            debug!("Thread {} woke on tick {}", thread, self.ticks);
        }

        let mode = if self.threads.charge_quantum(self.config.quantum_ticks)? {
            ScheduleMode::RoundRobin
        } else {
            ScheduleMode::Strict
        };
        self.schedule(mode)
    }

    /// Kill a thread: it becomes DEAD, gives up every mutex it owns (which
    /// may hand them to waiters) and any wait it was queued for. Its stack
    /// stays allocated until [`Kernel::delete_dead`].
    pub fn terminate(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        if thread == self.threads.idle_thread {
            return Err(KernelError::InvalidArgument(
                "the idle thread cannot terminate".into(),
            ));
        }

        let tcb = self.threads.get_mut(thread)?;
        if tcb.state == ThreadState::Dead {
            return Err(KernelError::InvalidState(format!(
                "thread {} already terminated",
                thread
            )));
        }
        let wait_reason = tcb.wait_reason;
        let pending_mutex = tcb.waiting_mutex();
        let owned: Vec<_> = tcb.owned_mutexes().collect();
        let io_token = tcb.io_token.take();
        tcb.mutexes.clear();

        self.threads.mark_dead(thread)?;

        if let Some(mutex) = pending_mutex {
            if let Some(m) = self.mutexes.get_mut(&mutex) {
                m.remove_waiter(thread);
            }
        }
        if let Some(WaitReason::Memory { pool, .. }) = wait_reason {
            if let Some(p) = self.pools.get_mut(&pool) {
                p.remove_waiter(thread);
            }
        }
        if let Some(token) = io_token {
            self.abandon_transfer(token)?;
        }
        for mutex in owned {
            self.grant_next_owner(mutex)?;
        }

        info!("Thread {} terminated", thread);
        self.schedule(ScheduleMode::Strict)
    }

    /// Terminate the running thread, as when its entry function returns.
    pub fn exit_current(&mut self) -> Result<(), KernelError> {
        self.terminate(self.threads.current_thread)
    }

    /// Reclaim the stack, context and control block of a DEAD thread.
    pub fn delete_dead(&mut self, thread: ThreadId) -> Result<(), KernelError> {
        let tcb = self.threads.remove_dead(thread)?;
        self.machine.release_context(tcb.context);

        if let Some(stack) = tcb.stack {
            let system = self.system_pool;
            if !self.pool_mut(system)?.deallocate(stack.base) {
                warn!(
                    "Stack of thread {} at {} was not allocated in the system pool",
                    thread, stack.base
                );
            }
            if self.signal_memory_release(system)? > 0 {
                self.schedule(ScheduleMode::Strict)?;
            }
        }
        info!("Deleted thread {}", thread);
        Ok(())
    }

    pub fn current_thread(&self) -> ThreadId {
        self.threads.current_thread
    }

    pub fn idle_thread(&self) -> ThreadId {
        self.threads.idle_thread
    }

    pub fn thread(&self, thread: ThreadId) -> Result<&ThreadControlBlock, KernelError> {
        self.threads.get(thread)
    }

    pub fn thread_state(&self, thread: ThreadId) -> Result<ThreadState, KernelError> {
        Ok(self.threads.get(thread)?.state)
    }

    pub fn thread_priority(&self, thread: ThreadId) -> Result<Priority, KernelError> {
        Ok(self.threads.get(thread)?.priority)
    }

    /// All live control blocks, in id order
    pub fn threads(&self) -> Vec<&ThreadControlBlock> {
        let mut threads: Vec<_> = self.threads.threads.values().collect();
        threads.sort_by_key(|t| t.id);
        threads
    }

    /// Ready threads, highest level first, oldest first within a level.
    /// The idle thread is never listed.
    pub fn ready_threads(&self) -> Vec<(Priority, ThreadId)> {
        self.threads.scheduler.ready_threads()
    }

    pub fn wait_list(&self) -> &[ThreadId] {
        &self.threads.wait_list
    }

    pub fn dead_list(&self) -> &[ThreadId] {
        &self.threads.dead_list
    }

    /// The running thread, which is about to block. The idle thread never may.
    pub(crate) fn blocking_caller(&self) -> Result<(ThreadId, Priority), KernelError> {
        let current = self.threads.current_thread;
        if current == self.threads.idle_thread {
            return Err(KernelError::InvalidState(
                "the idle thread cannot block".into(),
            ));
        }
        Ok((current, self.threads.get(current)?.priority))
    }

    pub(crate) fn thread_exists(&self, thread: ThreadId) -> Result<(), KernelError> {
        if self.threads.threads.contains_key(&thread) {
            Ok(())
        } else {
            Err(KernelError::not_found(IdKind::Thread, thread.val()))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::*;
    use spindle_machine::SimMachine;

    fn worker(_: usize) {}

    fn kernel() -> Kernel<SimMachine> {
        Kernel::new(SimMachine::default(), KernelConfig::default()).unwrap()
    }

    #[test]
    fn boot_seeds_main_and_idle() {
        let k = kernel();
        let main = k.current_thread();
        assert_eq!(main.val(), 1);
        assert_eq!(k.idle_thread().val(), 2);
        assert_eq!(k.thread_state(main).unwrap(), ThreadState::Running);
        assert_eq!(k.thread_priority(main).unwrap(), Priority::Normal);
        assert_eq!(k.thread_state(k.idle_thread()).unwrap(), ThreadState::Ready);
        assert!(k.ready_threads().is_empty());
        assert_eq!(k.machine().timer_interval(), Some(100));
        assert!(k.machine().io_registered());
    }

    #[test]
    fn higher_priority_thread_preempts_creator() {
        let mut k = kernel();
        let main = k.current_thread();
        let low = k.create_thread(worker, 0, 256, Priority::Low).unwrap();
        assert_eq!(k.current_thread(), main);

        let high = k.create_thread(worker, 0, 256, Priority::High).unwrap();
        assert_eq!(k.current_thread(), high);
        assert_eq!(k.thread_state(main).unwrap(), ThreadState::Ready);
        assert_eq!(
            k.ready_threads(),
            [(Priority::Normal, main), (Priority::Low, low)]
        );
    }

    #[test]
    fn stack_comes_from_system_pool() {
        let mut k = kernel();
        let system = k.system_pool();
        let before = k.pool_unallocated(system).unwrap();
        let t = k.create_thread(worker, 0, 4096, Priority::Low).unwrap();
        assert_eq!(k.pool_unallocated(system).unwrap(), before - 4096);

        k.terminate(t).unwrap();
        assert_eq!(k.pool_unallocated(system).unwrap(), before - 4096);
        k.delete_dead(t).unwrap();
        assert_eq!(k.pool_unallocated(system).unwrap(), before);
        assert!(matches!(
            k.thread_state(t),
            Err(KernelError::NotFound { .. })
        ));
    }

    #[test]
    fn oversized_stack_is_rejected() {
        let mut k = kernel();
        let err = k
            .create_thread(worker, 0, 0x20_0000, Priority::Normal)
            .unwrap_err();
        assert!(matches!(err, KernelError::ResourceExhausted { .. }));
        assert!(matches!(
            k.create_thread(worker, 0, 64, Priority::Idle),
            Err(KernelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn delete_requires_dead_thread() {
        let mut k = kernel();
        let t = k.create_thread(worker, 0, 64, Priority::Low).unwrap();
        assert!(matches!(k.delete_dead(t), Err(KernelError::InvalidState(_))));
        k.terminate(t).unwrap();
        assert_eq!(k.dead_list(), &[t]);
        assert!(matches!(k.terminate(t), Err(KernelError::InvalidState(_))));
        k.delete_dead(t).unwrap();
        assert!(k.dead_list().is_empty());
    }

    #[test]
    fn idle_runs_when_everyone_sleeps() {
        let mut k = kernel();
        let main = k.current_thread();
        k.sleep_current(2).unwrap();
        assert_eq!(k.current_thread(), k.idle_thread());
        assert_eq!(k.wait_list(), &[main]);

        k.timer_tick().unwrap();
        assert_eq!(k.current_thread(), k.idle_thread());
        k.timer_tick().unwrap();
        assert_eq!(k.current_thread(), main);
        assert_eq!(k.thread_state(k.idle_thread()).unwrap(), ThreadState::Ready);
        assert!(k.wait_list().is_empty());
    }

    #[test]
    fn idle_cannot_block_or_terminate() {
        let mut k = kernel();
        k.sleep_current(5).unwrap();
        assert_eq!(k.current_thread(), k.idle_thread());
        assert!(matches!(
            k.sleep_current(1),
            Err(KernelError::InvalidState(_))
        ));
        assert!(matches!(
            k.terminate(k.idle_thread()),
            Err(KernelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn yield_rotates_equal_priority_only() {
        let mut k = kernel();
        let main = k.current_thread();
        let low = k.create_thread(worker, 0, 64, Priority::Low).unwrap();
        k.sleep_current(0).unwrap();
        assert_eq!(k.current_thread(), main);

        let peer = k.create_thread(worker, 0, 64, Priority::Normal).unwrap();
        k.sleep_current(0).unwrap();
        assert_eq!(k.current_thread(), peer);
        assert_eq!(
            k.ready_threads(),
            [(Priority::Normal, main), (Priority::Low, low)]
        );
    }
}
