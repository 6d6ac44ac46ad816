//! Segmented memory pools.
//!
//! A pool hands out disjoint chunks of an address range it does not own.
//! Free space is never stored: the gaps between the sorted chunk list and
//! the pool bounds are the free space, so releasing a chunk needs no merge.

pub mod syscalls;

use crate::queue::PriorityQueues;
use crate::types::{PoolId, Priority, ThreadId};
use log::trace;
use spindle_machine::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryChunk {
    pub start: Address,
    pub length: usize,
}

impl MemoryChunk {
    pub fn end(&self) -> Address {
        self.start + self.length
    }
}

/// A thread blocked until `size` bytes fit in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWaiter {
    pub thread: ThreadId,
    pub size: usize,
}

pub struct MemoryPool {
    pub id: PoolId,
    base: Address,
    size: usize,
    /// Sorted by start address, pairwise disjoint
    chunks: Vec<MemoryChunk>,
    waiters: PriorityQueues<MemoryWaiter>,
}

impl MemoryPool {
    pub fn new(id: PoolId, base: Address, size: usize) -> Self {
        Self {
            id,
            base,
            size,
            chunks: Vec::new(),
            waiters: PriorityQueues::new(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// First-fit allocation. Returns `None` without side effects when no
    /// gap of `size` bytes exists.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        if size == 0 || size > self.size {
            return None;
        }

        let mut cursor = self.base;
        let mut index = self.chunks.len();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.start.val() - cursor.val() >= size {
                index = i;
                break;
            }
            cursor = chunk.end();
        }

        if index == self.chunks.len() && self.end().val() - cursor.val() < size {
            return None;
        }

        self.chunks.insert(
            index,
            MemoryChunk {
                start: cursor,
                length: size,
            },
        );
        trace!("pool {}: allocated {} bytes at {}", self.id, size, cursor);
        Some(cursor)
    }

    /// Release the chunk starting at `address`. False if no chunk starts there.
    pub fn deallocate(&mut self, address: Address) -> bool {
        match self.chunks.binary_search_by_key(&address, |c| c.start) {
            Ok(index) => {
                let chunk = self.chunks.remove(index);
                trace!(
                    "pool {}: released {} bytes at {}",
                    self.id,
                    chunk.length,
                    chunk.start
                );
                true
            }
            Err(_) => false,
        }
    }

    pub fn unallocated_bytes(&self) -> usize {
        self.size - self.chunks.iter().map(|c| c.length).sum::<usize>()
    }

    pub fn is_in_range(&self, address: Address) -> bool {
        address >= self.base && address < self.end()
    }

    /// True while any chunk is allocated
    pub fn is_in_use(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[MemoryChunk] {
        &self.chunks
    }

    pub fn largest_free_gap(&self) -> usize {
        let mut cursor = self.base;
        let mut largest = 0;
        for chunk in &self.chunks {
            largest = largest.max(chunk.start.val() - cursor.val());
            cursor = chunk.end();
        }
        largest.max(self.end().val() - cursor.val())
    }

    pub fn enqueue_waiter(&mut self, thread: ThreadId, size: usize, priority: Priority) {
        self.waiters.push(priority, MemoryWaiter { thread, size });
    }

    pub fn remove_waiter(&mut self, thread: ThreadId) -> Option<MemoryWaiter> {
        self.waiters.remove_first(|w| w.thread == thread)
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    pub fn waiters(&self) -> impl Iterator<Item = (Priority, &MemoryWaiter)> + '_ {
        self.waiters.iter()
    }

    /// Walk the waiters from highest to lowest priority, FIFO within a
    /// level, allocating for every waiter that now fits. Granted waiters
    /// leave the queue; the rest stay in place.
    pub fn grant_waiters(&mut self) -> Vec<(ThreadId, Address)> {
        let mut granted = Vec::new();
        let mut waiters = core::mem::take(&mut self.waiters);
        waiters.retain_in_order(|_, waiter| match self.allocate(waiter.size) {
            Some(address) => {
                granted.push((waiter.thread, address));
                false
            }
            None => true,
        });
        self.waiters = waiters;
        granted
    }

    fn end(&self) -> Address {
        self.base + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pool(base: usize, size: usize) -> MemoryPool {
        MemoryPool::new(PoolId::new(1).unwrap(), Address::new(base), size)
    }

    fn tid(id: u32) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[test]
    fn first_fit_reuses_earliest_gap() {
        let mut pool = pool(0x1000, 100);
        let a = pool.allocate(30).unwrap();
        let b = pool.allocate(30).unwrap();
        let c = pool.allocate(30).unwrap();
        assert_eq!(a, Address::new(0x1000));
        assert_eq!(b, Address::new(0x101e));
        assert_eq!(c, Address::new(0x103c));
        assert!(pool.allocate(11).is_none());

        assert!(pool.deallocate(b));
        assert_eq!(pool.allocate(20), Some(b));
        assert_eq!(pool.allocate(10), Some(Address::new(0x1032)));
        assert_eq!(pool.unallocated_bytes(), 10);
        assert_eq!(pool.largest_free_gap(), 10);
    }

    #[test]
    fn failed_allocation_has_no_side_effect() {
        let mut pool = pool(0, 64);
        pool.allocate(40).unwrap();
        let before = pool.chunks().to_vec();
        assert!(pool.allocate(25).is_none());
        assert!(pool.allocate(0).is_none());
        assert_eq!(pool.chunks(), &before[..]);
    }

    #[test]
    fn deallocate_requires_chunk_start() {
        let mut pool = pool(0x100, 64);
        let a = pool.allocate(16).unwrap();
        assert!(!pool.deallocate(a + 1));
        assert!(pool.deallocate(a));
        assert!(!pool.deallocate(a));
        assert!(!pool.is_in_use());
    }

    #[test]
    fn range_check() {
        let pool = pool(0x100, 0x10);
        assert!(pool.is_in_range(Address::new(0x100)));
        assert!(pool.is_in_range(Address::new(0x10f)));
        assert!(!pool.is_in_range(Address::new(0x110)));
        assert!(!pool.is_in_range(Address::new(0xff)));
    }

    #[test]
    fn grants_every_waiter_that_fits_in_priority_order() {
        let mut pool = pool(0, 100);
        let big = pool.allocate(100).unwrap();
        pool.enqueue_waiter(tid(1), 60, Priority::Low);
        pool.enqueue_waiter(tid(2), 80, Priority::High);
        pool.enqueue_waiter(tid(3), 30, Priority::Normal);
        pool.enqueue_waiter(tid(4), 10, Priority::Normal);

        pool.deallocate(big);
        let granted = pool.grant_waiters();
        let threads: Vec<_> = granted.iter().map(|(t, _)| t.val()).collect();
        // 80 fits first, then 30 does not, 10 does, 60 does not
        assert_eq!(threads, [2, 4]);
        assert_eq!(pool.unallocated_bytes(), 10);
        assert_eq!(
            pool.waiters().map(|(_, w)| w.thread.val()).collect::<Vec<_>>(),
            [3, 1]
        );
    }

    proptest! {
        #[test]
        fn chunks_stay_disjoint_and_accounted(
            ops in prop::collection::vec((any::<bool>(), 1usize..300, any::<prop::sample::Index>()), 1..200)
        ) {
            let mut pool = pool(0x4000, 1000);
            let mut live: Vec<Address> = Vec::new();

            for (alloc, size, pick) in ops {
                if alloc || live.is_empty() {
                    if let Some(addr) = pool.allocate(size) {
                        live.push(addr);
                    }
                } else {
                    let addr = live.remove(pick.index(live.len()));
                    prop_assert!(pool.deallocate(addr));
                }

                let chunks = pool.chunks();
                let used: usize = chunks.iter().map(|c| c.length).sum();
                prop_assert_eq!(used + pool.unallocated_bytes(), pool.size());
                for pair in chunks.windows(2) {
                    prop_assert!(pair[0].end() <= pair[1].start);
                }
                for chunk in chunks {
                    prop_assert!(pool.is_in_range(chunk.start));
                    prop_assert!(chunk.end() <= Address::new(0x4000 + 1000));
                }
            }
        }
    }
}
