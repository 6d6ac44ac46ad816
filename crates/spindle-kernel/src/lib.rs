//! Cooperative single-processor kernel: priority scheduling, mutexes and
//! memory pools for logical threads running inside one host process.
//!
//! [`Kernel`] is the coordinator. Every request that can change a thread's
//! state goes through it, and it is the only place a context switch is
//! requested from the [`Machine`].

pub mod config;
pub mod error;
pub mod io;
pub mod memory;
pub mod queue;
pub mod sync;
pub mod thread;
pub mod types;

pub use config::KernelConfig;
pub use error::KernelError;
pub use io::io_status;
pub use memory::MemoryPool;
pub use sync::Mutex;
pub use thread::tcb::{ThreadControlBlock, ThreadState, WaitReason};
pub use thread::ScheduleMode;
pub use types::*;

use io::IoTransfer;
use log::info;
use spindle_machine::{Interrupt, InterruptHandler, IoToken, Machine, StackRegion};
use std::collections::HashMap;
use thread::ThreadManager;

/// Body of the idle thread: spin until the timer preempts it.
fn idle_loop(_: usize) {
    loop {
        core::hint::spin_loop();
    }
}

pub struct Kernel<M: Machine> {
    machine: M,
    config: KernelConfig,
    threads: ThreadManager,
    mutexes: HashMap<MutexId, Mutex>,
    pools: HashMap<PoolId, MemoryPool>,
    transfers: HashMap<IoToken, IoTransfer>,
    mutex_ids: IdCounter,
    pool_ids: IdCounter,
    io_tokens: IdCounter,
    system_pool: PoolId,
    shared_pool: PoolId,
    ticks: u64,
}

impl<M: Machine> Kernel<M> {
    /// Bring the kernel up on `machine`: register the timer and I/O
    /// callbacks, map the system and shared pools, and seed the main thread
    /// (already running on the boot context) and the idle thread.
    pub fn new(mut machine: M, config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;

        machine.register_timer(config.tick_interval_ms)?;
        machine.register_io_completion()?;

        let mut pool_ids = IdCounter::new(IdKind::Pool);
        let system_pool: PoolId = pool_ids.issue()?;
        let shared_pool: PoolId = pool_ids.issue()?;

        let system_base = machine.map_memory(config.system_heap_size)?;
        let shared_base = machine.map_memory(config.shared_memory_size)?;
        let mut system = MemoryPool::new(system_pool, system_base, config.system_heap_size);
        let shared = MemoryPool::new(shared_pool, shared_base, config.shared_memory_size);

        let idle_base =
            system
                .allocate(config.idle_stack_size)
                .ok_or(KernelError::ResourceExhausted {
                    requested: config.idle_stack_size,
                    capacity: config.system_heap_size,
                })?;
        let idle_stack = StackRegion {
            base: idle_base,
            size: config.idle_stack_size,
        };
        let idle_context = machine.create_context(idle_loop, 0, &idle_stack)?;
        let threads = ThreadManager::boot(
            machine.current_context(),
            (idle_loop, idle_context, idle_stack),
        )?;

        let mut pools = HashMap::new();
        pools.insert(system_pool, system);
        pools.insert(shared_pool, shared);

        info!(
            "Kernel up: tick {}ms, quantum {}, system pool {} bytes at {}, shared pool {} bytes at {}",
            config.tick_interval_ms,
            config.quantum_ticks,
            config.system_heap_size,
            system_base,
            config.shared_memory_size,
            shared_base
        );

        Ok(Self {
            machine,
            config,
            threads,
            mutexes: HashMap::new(),
            pools,
            transfers: HashMap::new(),
            mutex_ids: IdCounter::new(IdKind::Mutex),
            pool_ids,
            io_tokens: IdCounter::new(IdKind::IoRequest),
            system_pool,
            shared_pool,
            ticks: 0,
        })
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Timer ticks handled since boot
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The central dispatch decision; see [`ScheduleMode`].
    pub fn schedule(&mut self, mode: ScheduleMode) -> Result<(), KernelError> {
        self.threads.schedule(mode, &mut self.machine)
    }
}

impl<M: Machine> InterruptHandler for Kernel<M> {
    type Error = KernelError;

    fn handle_interrupt(&mut self, interrupt: Interrupt) -> Result<(), KernelError> {
        match interrupt {
            Interrupt::Timer => self.timer_tick(),
            Interrupt::IoComplete { token, result } => self.io_complete(token, result),
        }
    }
}
