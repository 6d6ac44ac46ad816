pub mod scheduler;
pub mod syscalls;
pub mod tcb;

use crate::error::KernelError;
use crate::types::{IdCounter, IdKind, Priority, ThreadId, Tick};
use log::{debug, error, trace};
use scheduler::{PriorityScheduler, Scheduler};
use spindle_machine::{ContextRef, Machine, StackRegion, ThreadEntry};
use std::collections::HashMap;
use tcb::{ThreadControlBlock, ThreadState, WaitReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// A still-running thread is displaced only by a strictly higher priority
    Strict,
    /// An equal-priority ready thread also displaces it (quantum expiry, yield)
    RoundRobin,
}

pub struct ThreadManager {
    pub threads: HashMap<ThreadId, ThreadControlBlock>,
    pub scheduler: Box<dyn Scheduler>,
    pub current_thread: ThreadId,
    pub idle_thread: ThreadId,
    /// Sleeping, I/O-blocked and time-bounded mutex waiters
    pub wait_list: Vec<ThreadId>,
    pub dead_list: Vec<ThreadId>,
    ids: IdCounter,
}

impl ThreadManager {
    /// Seed the main thread (running on `main_context`) and the idle thread.
    pub fn boot(
        main_context: ContextRef,
        idle: (ThreadEntry, ContextRef, StackRegion),
    ) -> Result<Self, KernelError> {
        let mut ids = IdCounter::new(IdKind::Thread);
        let main: ThreadId = ids.issue()?;
        let idle_id: ThreadId = ids.issue()?;
        let (idle_entry, idle_context, idle_stack) = idle;

        let mut main_tcb =
            ThreadControlBlock::new(main, Priority::Normal, None, None, main_context);
        main_tcb.transition(ThreadState::Running)?;
        let idle_tcb = ThreadControlBlock::new(
            idle_id,
            Priority::Idle,
            Some((idle_entry, 0)),
            Some(idle_stack),
            idle_context,
        );

        let mut threads = HashMap::new();
        threads.insert(main, main_tcb);
        threads.insert(idle_id, idle_tcb);

        Ok(Self {
            threads,
            scheduler: Box::new(PriorityScheduler::new()),
            current_thread: main,
            idle_thread: idle_id,
            wait_list: Vec::new(),
            dead_list: Vec::new(),
            ids,
        })
    }

    pub fn get(&self, id: ThreadId) -> Result<&ThreadControlBlock, KernelError> {
        self.threads
            .get(&id)
            .ok_or_else(|| KernelError::not_found(IdKind::Thread, id.val()))
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Result<&mut ThreadControlBlock, KernelError> {
        self.threads
            .get_mut(&id)
            .ok_or_else(|| KernelError::not_found(IdKind::Thread, id.val()))
    }

    /// Register a new READY thread at the tail of its ready list.
    pub fn create_thread(
        &mut self,
        priority: Priority,
        entry: ThreadEntry,
        argument: usize,
        stack: StackRegion,
        context: ContextRef,
    ) -> Result<ThreadId, KernelError> {
        let handle: ThreadId = self.ids.issue()?;
        let tcb = ThreadControlBlock::new(
            handle,
            priority,
            Some((entry, argument)),
            Some(stack),
            context,
        );
        self.threads.insert(handle, tcb);
        self.scheduler.enqueue(handle, priority);
        Ok(handle)
    }

    /// Move the running thread to WAITING. Sleeps, I/O waits and timed
    /// waits go on the wait list so the timer can find them.
    pub fn block_current(
        &mut self,
        reason: WaitReason,
        countdown: Option<Tick>,
    ) -> Result<ThreadId, KernelError> {
        let current = self.current_thread;
        let tcb = self.get_mut(current)?;
        tcb.transition(ThreadState::Waiting)?;
        tcb.wait_reason = Some(reason);
        tcb.ticks_to_sleep = countdown;

        if countdown.is_some() || matches!(reason, WaitReason::Sleep | WaitReason::Io(_)) {
            self.wait_list.push(current);
        }
        debug!("Thread {} waiting on {:?}", current, reason);
        Ok(current)
    }

    /// Change what an already WAITING thread waits for.
    pub fn rewait(&mut self, id: ThreadId, reason: WaitReason) -> Result<(), KernelError> {
        let tcb = self.get_mut(id)?;
        if tcb.state != ThreadState::Waiting {
            return Err(KernelError::InvalidState(format!(
                "thread {} is not waiting",
                id
            )));
        }
        tcb.wait_reason = Some(reason);
        if matches!(reason, WaitReason::Sleep | WaitReason::Io(_)) && !self.wait_list.contains(&id)
        {
            self.wait_list.push(id);
        }
        Ok(())
    }

    pub fn make_ready(&mut self, id: ThreadId) -> Result<(), KernelError> {
        let tcb = self.get_mut(id)?;
        tcb.transition(ThreadState::Ready)?;
        let priority = tcb.priority;
        self.wait_list.retain(|&t| t != id);
        self.scheduler.enqueue(id, priority);
        trace!("Thread {} ready at {}", id, priority);
        Ok(())
    }

    /// Move a thread to the dead list, out of every ready and wait list.
    pub fn mark_dead(&mut self, id: ThreadId) -> Result<(), KernelError> {
        self.get_mut(id)?.transition(ThreadState::Dead)?;
        self.scheduler.dequeue(id);
        self.wait_list.retain(|&t| t != id);
        self.dead_list.push(id);
        Ok(())
    }

    pub fn remove_dead(&mut self, id: ThreadId) -> Result<ThreadControlBlock, KernelError> {
        if self.get(id)?.state != ThreadState::Dead {
            return Err(KernelError::InvalidState(format!(
                "thread {} has not terminated",
                id
            )));
        }
        self.dead_list.retain(|&t| t != id);
        self.threads
            .remove(&id)
            .ok_or_else(|| KernelError::not_found(IdKind::Thread, id.val()))
    }

    /// Count down every timed wait by one tick, returning the threads whose
    /// wait expired along with what they were waiting for.
    pub fn expire_timers(&mut self) -> Vec<(ThreadId, WaitReason)> {
        let mut expired = Vec::new();
        for &id in &self.wait_list {
            if let Some(tcb) = self.threads.get_mut(&id) {
                if tcb.state == ThreadState::Waiting && tcb.decrement_ticks_to_sleep() {
                    expired.push((id, tcb.wait_reason.unwrap_or(WaitReason::Sleep)));
                }
            }
        }
        expired
    }

    /// Charge a tick to the running thread. True when its quantum expired.
    pub fn charge_quantum(&mut self, quantum: Tick) -> Result<bool, KernelError> {
        if self.current_thread == self.idle_thread {
            return Ok(false);
        }
        let tcb = self.get_mut(self.current_thread)?;
        tcb.quantum_used += 1;
        if tcb.quantum_used >= quantum {
            tcb.quantum_used = 0;
            return Ok(true);
        }
        Ok(false)
    }

    /// Pick the thread that should hold the processor and switch to it.
    pub fn schedule(
        &mut self,
        mode: ScheduleMode,
        machine: &mut dyn Machine,
    ) -> Result<(), KernelError> {
        let current = self.current_thread;
        let (running, priority, from) = {
            let tcb = self.get(current)?;
            (tcb.state == ThreadState::Running, tcb.priority, tcb.context)
        };

        let next = match self.scheduler.highest_ready() {
            Some(ready)
                if !running
                    || ready > priority
                    || (mode == ScheduleMode::RoundRobin && ready == priority) =>
            {
                self.scheduler.schedule()
            }
            Some(_) => None,
            None if !running => Some(self.idle_thread),
            None => None,
        };

        let Some(next) = next else {
            return Ok(());
        };

        if next == self.idle_thread && !self.get(next)?.is_runnable() {
            error!("Idle thread unavailable, halting");
            return Err(KernelError::NoRunnableThread);
        }

        if next == current {
            return Ok(());
        }

        if running {
            self.get_mut(current)?.transition(ThreadState::Ready)?;
            if current != self.idle_thread {
                self.scheduler.enqueue(current, priority);
            }
        }

        let tcb = self.get_mut(next)?;
        tcb.transition(ThreadState::Running)?;
        let to = tcb.context;
        self.current_thread = next;

        debug!("Dispatch {} -> {}", current, next);
        machine.switch_context(from, to)?;
        Ok(())
    }
}
