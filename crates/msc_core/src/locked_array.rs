//! Growable block array with striped per-element locks.
//!
//! Records live in fixed-size blocks, so growing the array appends blocks and
//! never moves an existing record. Every run of `2^lock_bits` consecutive
//! records shares one [`SpinLock`]. A separate whole-array lock serializes
//! structural resizes against each other, but not against element access:
//! nothing may read or write elements while a shared resize is in progress.

use crate::spinlock::{DEFAULT_RETRY_INTERVAL, SpinLock, SpinLockGuard};
use crate::{MscError, Result};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use msc_common::limits::{DEFAULT_BLOCK_BITS, DEFAULT_LOCK_BITS};
use std::time::Duration;

/// Block-structured array whose elements are shared by reference and
/// mutated through their own interior mutability under the element locks.
pub struct LockedArray<T> {
    /// Fixed-size blocks of `1 << block_bits` records each.
    blocks: UnsafeCell<Vec<Box<[T]>>>,

    /// One lock per `1 << lock_bits` records, allocated block by block.
    locks: UnsafeCell<Vec<SpinLock>>,

    /// Number of records in use. Capacity is always a whole number of blocks.
    len: AtomicUsize,

    block_bits: u32,
    lock_bits: u32,

    /// Sleep between attempts on a contended element lock.
    retry: Duration,

    /// Serializes structural resizes.
    resize_lock: SpinLock,
}

// Elements are only handed out by shared reference, and the block vector only
// changes under `&mut self` or inside the unsafe shared resize.
unsafe impl<T: Send + Sync> Sync for LockedArray<T> {}
unsafe impl<T: Send> Send for LockedArray<T> {}

impl<T: Default> Default for LockedArray<T> {
    fn default() -> Self {
        Self {
            blocks: UnsafeCell::new(Vec::new()),
            locks: UnsafeCell::new(Vec::new()),
            len: AtomicUsize::new(0),
            block_bits: DEFAULT_BLOCK_BITS,
            lock_bits: DEFAULT_LOCK_BITS,
            retry: DEFAULT_RETRY_INTERVAL,
            resize_lock: SpinLock::new(),
        }
    }
}

impl<T: Default> LockedArray<T> {
    /// Creates an empty array with the given block and lock granularity.
    ///
    /// # Arguments
    ///
    /// * `block_bits` - Log2 of the records per block
    /// * `lock_bits` - Log2 of the records sharing one lock; at most `block_bits`
    /// * `retry` - Sleep between attempts on a contended element lock
    pub fn new(block_bits: u32, lock_bits: u32, retry: Duration) -> Result<Self> {
        if lock_bits > block_bits {
            return Err(MscError::InvalidInput(format!(
                "lock bits {lock_bits} must not exceed block bits {block_bits}"
            )));
        }
        if block_bits >= usize::BITS - 1 {
            return Err(MscError::InvalidInput(format!(
                "block bits {block_bits} must stay below {}",
                usize::BITS - 1
            )));
        }
        Ok(Self {
            block_bits,
            lock_bits,
            retry,
            ..Self::default()
        })
    }

    /// Appends one record, growing by a block when the last one is full.
    pub fn push(&mut self, value: T) -> Result<usize> {
        let index = self.len();
        self.grow(index + 1)?;
        let block = index >> self.block_bits;
        let offset = index & self.block_mask();
        self.blocks.get_mut()[block][offset] = value;
        Ok(index)
    }

    /// Grows the array to at least `n` records.
    pub fn grow(&mut self, n: usize) -> Result<()> {
        // Exclusive borrow: no element reference can be alive.
        unsafe { self.resize(n) }
    }

    /// Grows the array to at least `n` records through a shared reference.
    ///
    /// New records are default-initialized. Shrinking is never performed.
    ///
    /// # Safety
    ///
    /// No thread may hold a reference obtained from [`get`](Self::get) or
    /// [`iter`](Self::iter), lock or unlock an element, or call
    /// [`capacity`](Self::capacity) or [`lock_count`](Self::lock_count)
    /// while this call runs. All of them read the block and lock tables
    /// this call grows. The whole-array lock only keeps concurrent resizes
    /// from interleaving with each other.
    pub unsafe fn resize(&self, n: usize) -> Result<()> {
        let _guard = self.resize_lock.guard(self.retry);
        if n <= self.len() {
            return Ok(());
        }

        let block_len = 1usize << self.block_bits;
        let locks_per_block = 1usize << (self.block_bits - self.lock_bits);
        let needed_blocks = n.div_ceil(block_len);

        let (blocks, locks) = unsafe { (&mut *self.blocks.get(), &mut *self.locks.get()) };
        let missing = needed_blocks.saturating_sub(blocks.len());
        blocks
            .try_reserve(missing)
            .map_err(|e| MscError::Resource(format!("block table: {e}")))?;
        locks
            .try_reserve(missing * locks_per_block)
            .map_err(|e| MscError::Resource(format!("lock table: {e}")))?;

        while blocks.len() < needed_blocks {
            let mut block = Vec::new();
            block
                .try_reserve_exact(block_len)
                .map_err(|e| MscError::Resource(format!("block of {block_len} records: {e}")))?;
            block.resize_with(block_len, T::default);
            blocks.push(block.into_boxed_slice());
            locks.extend((0..locks_per_block).map(|_| SpinLock::new()));
        }

        self.len.store(n, Ordering::Release);
        Ok(())
    }
}

impl<T> LockedArray<T> {
    /// Number of records in use.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records the allocated blocks can hold.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.blocks.get()).len() << self.block_bits }
    }

    /// Number of element locks currently allocated.
    pub fn lock_count(&self) -> usize {
        unsafe { (*self.locks.get()).len() }
    }

    #[inline(always)]
    fn block_mask(&self) -> usize {
        (1usize << self.block_bits) - 1
    }

    /// Returns the record at `index`, or `None` past the end.
    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len() {
            return None;
        }
        let blocks = unsafe { &*self.blocks.get() };
        Some(&blocks[index >> self.block_bits][index & self.block_mask()])
    }

    /// Index of the lock owning element `index`.
    ///
    /// The block index selects a run of `1 << (block_bits - lock_bits)`
    /// locks and the offset inside the block selects one of them.
    #[inline(always)]
    fn lock_slot(&self, index: usize) -> usize {
        let block = index >> self.block_bits;
        let within = (index & self.block_mask()) >> self.lock_bits;
        (block << (self.block_bits - self.lock_bits)) + within
    }

    #[inline(always)]
    fn lock_for(&self, index: usize) -> &SpinLock {
        let locks = unsafe { &*self.locks.get() };
        &locks[self.lock_slot(index)]
    }

    /// Acquires the lock owning element `index`. Blocks while it is held.
    ///
    /// Panics if `index` lies beyond the allocated blocks.
    #[inline]
    pub fn lock(&self, index: usize) {
        self.lock_for(index).acquire_with(self.retry);
    }

    /// Releases the lock owning element `index`.
    ///
    /// Unchecked: the caller must hold that lock. Releasing a lock held by
    /// another thread breaks mutual exclusion for every element it covers.
    #[inline]
    pub fn unlock(&self, index: usize) {
        self.lock_for(index).release();
    }

    /// Locks element `index` until the returned guard is dropped.
    pub fn lock_guard(&self, index: usize) -> SpinLockGuard<'_> {
        self.lock_for(index).guard(self.retry)
    }

    /// Iterates over the records in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let blocks = unsafe { &*self.blocks.get() };
        blocks.iter().flat_map(|block| block.iter()).take(self.len())
    }
}
