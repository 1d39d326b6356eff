//! One-byte spinlock with bounded-interval retry.
//!
//! Provides the mutual exclusion primitive behind every per-element lock of
//! the vertex store. The lock carries no owner information: releasing is an
//! unconditional store, so callers must only release locks they hold.

use core::sync::atomic::{AtomicBool, Ordering};
use msc_common::limits::{DEFAULT_RETRY_MICROS, SPIN_ATTEMPTS};
use std::thread;
use std::time::Duration;

/// Default sleep between attempts on a contended lock.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_micros(DEFAULT_RETRY_MICROS);

/// Binary free/held lock built on a compare-and-swap of one atomic flag.
///
/// `acquire` never fails; it keeps retrying until the flag flips from free
/// to held. The first attempts spin in place, after which the caller sleeps
/// for the retry interval between attempts so that a long critical section
/// does not burn a core per waiter.
#[derive(Debug, Default)]
pub struct SpinLock {
    /// False means free, true means held.
    held: AtomicBool,
}

impl SpinLock {
    /// Creates a lock in the free state.
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Attempts a single free-to-held transition.
    ///
    /// Uses acquire ordering on success so that writes made by the previous
    /// holder before its release are visible to the new holder.
    #[inline(always)]
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Blocks until the lock is held, sleeping the default interval between
    /// attempts once spinning gives up.
    #[inline]
    pub fn acquire(&self) {
        self.acquire_with(DEFAULT_RETRY_INTERVAL);
    }

    /// Blocks until the lock is held, sleeping `interval` between attempts
    /// once spinning gives up.
    pub fn acquire_with(&self, interval: Duration) {
        let mut attempts = 0u32;
        while !self.try_acquire() {
            if attempts < SPIN_ATTEMPTS {
                attempts += 1;
                core::hint::spin_loop();
            } else {
                thread::sleep(interval);
            }
        }
    }

    /// Stores the free state unconditionally.
    ///
    /// Release ordering publishes every write of the critical section to the
    /// next holder.
    #[inline(always)]
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Whether some thread currently holds the lock. Only a snapshot.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn guard(&self, interval: Duration) -> SpinLockGuard<'_> {
        self.acquire_with(interval);
        SpinLockGuard { lock: self }
    }
}

/// Guard that holds a spinlock and releases it on drop.
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;

    struct Guarded {
        lock: SpinLock,
        counter: UnsafeCell<u64>,
    }

    unsafe impl Sync for Guarded {}

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = SpinLock::new();
        assert!(lock.try_acquire());
        assert!(lock.is_held());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(!lock.is_held());
        assert!(lock.try_acquire());
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new();
        {
            let _guard = lock.guard(Duration::from_micros(10));
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn counter_under_lock_loses_no_updates() {
        let shared = Guarded {
            lock: SpinLock::new(),
            counter: UnsafeCell::new(0),
        };
        let threads = 8;
        let per_thread = 2_000;

        thread::scope(|s| {
            for _ in 0..threads {
                let shared = &shared;
                s.spawn(move || {
                    for _ in 0..per_thread {
                        shared.lock.acquire_with(Duration::from_micros(20));
                        unsafe {
                            *shared.counter.get() += 1;
                        }
                        shared.lock.release();
                    }
                });
            }
        });

        assert_eq!(unsafe { *shared.counter.get() }, threads * per_thread);
    }
}
