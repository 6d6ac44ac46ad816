use crate::error::KernelError;
use crate::memory::MemoryPool;
use crate::thread::tcb::WaitReason;
use crate::thread::ScheduleMode;
use crate::types::{Completion, IdKind, PoolId, ThreadId};
use crate::Kernel;
use log::{debug, info, warn};
use spindle_machine::{Address, Machine};

impl<M: Machine> Kernel<M> {
    /// Register a pool over `size` bytes at `base`. The kernel tracks the
    /// range but never touches the bytes.
    pub fn create_pool(&mut self, base: Address, size: usize) -> Result<PoolId, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidArgument("empty memory pool".into()));
        }
        if base.checked_add(size).is_none() {
            return Err(KernelError::InvalidArgument(format!(
                "{} bytes at {} run past the end of the address space",
                size, base
            )));
        }
        let id: PoolId = self.pool_ids.issue()?;
        self.pools.insert(id, MemoryPool::new(id, base, size));
        info!("Created pool {} ({} bytes at {})", id, size, base);
        Ok(id)
    }

    /// Allocate `size` bytes from `pool` for the running thread, waiting
    /// for a release if no gap is large enough. A blocked caller finds its
    /// address with [`Kernel::take_memory_result`].
    pub fn wait_on_memory(
        &mut self,
        size: usize,
        pool: PoolId,
    ) -> Result<Completion<Address>, KernelError> {
        let p = self.pool_mut(pool)?;
        if size == 0 {
            return Err(KernelError::InvalidArgument("zero-byte allocation".into()));
        }
        if size > p.size() {
            return Err(KernelError::ResourceExhausted {
                requested: size,
                capacity: p.size(),
            });
        }
        if let Some(address) = p.allocate(size) {
            return Ok(Completion::Done(address));
        }

        let (caller, priority) = self.blocking_caller()?;
        self.pool_mut(pool)?.enqueue_waiter(caller, size, priority);
        self.threads
            .block_current(WaitReason::Memory { pool, size }, None)?;
        self.schedule(ScheduleMode::Strict)?;
        Ok(Completion::Blocked)
    }

    /// Return the chunk starting at `address` to `pool` and wake every
    /// waiter that now fits.
    pub fn deallocate(&mut self, pool: PoolId, address: Address) -> Result<(), KernelError> {
        let p = self.pool_mut(pool)?;
        if !p.is_in_range(address) {
            warn!("Address {} is outside pool {}", address, pool);
            return Err(KernelError::InvalidArgument(format!(
                "{} is outside pool {}",
                address, pool
            )));
        }
        if let Some(owner) = self.region_owner(pool, address) {
            warn!("Refusing to free {} in pool {}: held by thread {}", address, pool, owner);
            return Err(KernelError::InvalidState(format!(
                "{} is held by thread {}",
                address, owner
            )));
        }
        let p = self.pool_mut(pool)?;
        if !p.deallocate(address) {
            warn!("No chunk of pool {} starts at {}", pool, address);
            return Err(KernelError::InvalidState(format!(
                "no allocation at {}",
                address
            )));
        }

        if self.signal_memory_release(pool)? > 0 {
            self.schedule(ScheduleMode::Strict)?;
        }
        Ok(())
    }

    /// Grant memory to every waiter on `pool` that fits, highest priority
    /// first and FIFO within a level. Returns how many were granted.
    /// Does not reschedule.
    pub fn signal_memory_release(&mut self, pool: PoolId) -> Result<usize, KernelError> {
        let granted = self.pool_mut(pool)?.grant_waiters();
        let count = granted.len();
        for (thread, address) in granted {
            self.deliver_memory(thread, pool, address)?;
        }
        Ok(count)
    }

    pub fn delete_pool(&mut self, pool: PoolId) -> Result<(), KernelError> {
        if pool == self.system_pool || pool == self.shared_pool {
            return Err(KernelError::InvalidArgument(format!(
                "pool {} belongs to the kernel",
                pool
            )));
        }
        let p = self.pool_mut(pool)?;
        if p.is_in_use() || p.has_waiters() {
            warn!("Refusing to delete pool {} while in use", pool);
            return Err(KernelError::InUse);
        }
        self.pools.remove(&pool);
        info!("Deleted pool {}", pool);
        Ok(())
    }

    pub fn pool(&self, pool: PoolId) -> Result<&MemoryPool, KernelError> {
        self.pools
            .get(&pool)
            .ok_or_else(|| KernelError::not_found(IdKind::Pool, pool.val()))
    }

    pub fn pool_unallocated(&self, pool: PoolId) -> Result<usize, KernelError> {
        Ok(self.pool(pool)?.unallocated_bytes())
    }

    /// Consume the address granted to `thread` while it was blocked.
    pub fn take_memory_result(&mut self, thread: ThreadId) -> Result<Option<Address>, KernelError> {
        Ok(self.threads.get_mut(thread)?.memory_result.take())
    }

    /// Pool backing thread stacks
    pub fn system_pool(&self) -> PoolId {
        self.system_pool
    }

    /// Pool backing I/O transfer buffers
    pub fn shared_pool(&self) -> PoolId {
        self.shared_pool
    }

    pub(crate) fn pool_mut(&mut self, pool: PoolId) -> Result<&mut MemoryPool, KernelError> {
        self.pools
            .get_mut(&pool)
            .ok_or_else(|| KernelError::not_found(IdKind::Pool, pool.val()))
    }

    /// The thread whose stack or in-flight I/O buffer starts at `address`.
    /// Such regions are only returned by the kernel itself.
    fn region_owner(&self, pool: PoolId, address: Address) -> Option<ThreadId> {
        if pool == self.system_pool {
            let stack_owner = self
                .threads
                .threads
                .values()
                .find(|tcb| tcb.stack.as_ref().is_some_and(|stack| stack.base == address));
            if let Some(tcb) = stack_owner {
                return Some(tcb.id);
            }
        }
        if pool == self.shared_pool {
            return self
                .transfers
                .values()
                .find(|t| t.buffer == Some(address))
                .map(|t| t.thread);
        }
        None
    }

    /// A granted waiter either resumes with its address, or, when it was
    /// waiting for an I/O buffer, carries on into the transfer.
    fn deliver_memory(
        &mut self,
        thread: ThreadId,
        pool: PoolId,
        address: Address,
    ) -> Result<(), KernelError> {
        let token = self.threads.get(thread)?.io_token;
        if let Some(token) = token {
            if pool == self.shared_pool && self.awaits_io_buffer(token) {
                return self.attach_io_buffer(token, address);
            }
        }

        self.threads.get_mut(thread)?.memory_result = Some(address);
        self.threads.make_ready(thread)?;
        debug!("Pool {} granted {} to thread {}", pool, address, thread);
        Ok(())
    }
}
