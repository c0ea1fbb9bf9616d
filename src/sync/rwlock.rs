//! Atomic reader/writer spin lock
//!
//! A 32-bit counter encodes the whole lock state:
//! - even value: number of readers times two
//! - odd value: a writer has published intent and is waiting
//! - `u32::MAX`: a writer holds the lock exclusively
//!
//! Writers make the counter odd before acquiring, which stops new readers
//! from entering and bounds writer starvation. All loops are bounded; a
//! failed acquisition is reported instead of deadlocking.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::error;

/// Upper bound for acquisition spin loops.
const LOOP_UPPER_BOUND: usize = 300_000;

/// Number of attempts to make before starting to yield the thread.
const YIELD_THRESHOLD: usize = 10;

/// A reader/writer lock around a single atomic counter.
#[derive(Debug, Default)]
pub struct AtomicRwLock {
    readers: AtomicU32,
}

impl AtomicRwLock {
    pub const fn new() -> Self {
        Self {
            readers: AtomicU32::new(0),
        }
    }

    /// Acquires the exclusive lock, spinning until it succeeds or the loop
    /// upper bound is reached.
    pub fn lock_exclusive(&self) -> bool {
        for i in 0..LOOP_UPPER_BOUND {
            let prev = self.readers.load(Ordering::Acquire);
            if prev <= 1 {
                // 0 readers (counter 0) or only our own intent marker (1)
                if self
                    .readers
                    .compare_exchange_weak(prev, u32::MAX, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
            } else if prev % 2 == 0 {
                // Publish writer intent by making the counter odd
                let _ = self.readers.compare_exchange_weak(
                    prev,
                    prev + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }

            if i >= YIELD_THRESHOLD {
                std::thread::yield_now();
            }
        }
        error!("AtomicRwLock: exclusive lock loop upper bound reached");
        false
    }

    /// Attempts to acquire the exclusive lock without spinning.
    pub fn try_lock_exclusive(&self) -> bool {
        let prev = self.readers.load(Ordering::Acquire);
        prev <= 1
            && self
                .readers
                .compare_exchange(prev, u32::MAX, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// Releases the exclusive lock. Only valid after a successful
    /// `lock_exclusive` or `try_lock_exclusive`.
    pub fn unlock_exclusive(&self) {
        let prev = self.readers.load(Ordering::Acquire);
        if prev != u32::MAX {
            debug_assert!(false, "not exclusively locked");
            return;
        }
        self.readers.store(0, Ordering::Release);
    }

    /// Acquires a shared lock, spinning until it succeeds or the loop upper
    /// bound is reached.
    pub fn lock_shared(&self) -> bool {
        for i in 0..LOOP_UPPER_BOUND {
            let prev = self.readers.load(Ordering::Acquire);

            if prev % 2 == 0 && prev < u32::MAX - 2 {
                if self
                    .readers
                    .compare_exchange_weak(prev, prev + 2, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
            }

            if i >= YIELD_THRESHOLD {
                std::thread::yield_now();
            }
        }
        error!("AtomicRwLock: shared lock loop upper bound reached");
        false
    }

    /// Attempts to acquire a shared lock without spinning.
    pub fn try_lock_shared(&self) -> bool {
        let prev = self.readers.load(Ordering::Acquire);
        prev % 2 == 0
            && prev < u32::MAX - 2
            && self
                .readers
                .compare_exchange(prev, prev + 2, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// Releases a shared lock. Only valid after a successful `lock_shared`
    /// or `try_lock_shared`.
    pub fn unlock_shared(&self) {
        let prev = self.readers.fetch_sub(2, Ordering::Release);
        debug_assert!(prev >= 2, "not shared locked");
    }
}

/// A value guarded by an [`AtomicRwLock`].
///
/// Readers and writers run short closures under the lock; the closure style
/// keeps the critical sections bounded to memcpy-sized work.
pub struct AtomicRwCell<T> {
    lock: AtomicRwLock,
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialized through `lock`.
unsafe impl<T: Send> Send for AtomicRwCell<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicRwCell<T> {}

impl<T> AtomicRwCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: AtomicRwLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` with shared access. Returns `None` if the lock could not be
    /// acquired within the spin bound.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if !self.lock.lock_shared() {
            return None;
        }
        let result = f(unsafe { &*self.value.get() });
        self.lock.unlock_shared();
        Some(result)
    }

    /// Runs `f` with exclusive access. Returns `None` if the lock could not
    /// be acquired within the spin bound.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.lock.lock_exclusive() {
            return None;
        }
        let result = f(unsafe { &mut *self.value.get() });
        self.lock.unlock_exclusive();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_exclusive_excludes_shared() {
        let lock = AtomicRwLock::new();
        assert!(lock.lock_exclusive());
        assert!(!lock.try_lock_shared());
        assert!(!lock.try_lock_exclusive());
        lock.unlock_exclusive();
        assert!(lock.try_lock_shared());
        lock.unlock_shared();
    }

    #[test]
    fn test_shared_is_reentrant_for_readers() {
        let lock = AtomicRwLock::new();
        assert!(lock.lock_shared());
        assert!(lock.lock_shared());
        assert!(!lock.try_lock_exclusive());
        lock.unlock_shared();
        lock.unlock_shared();
        assert!(lock.try_lock_exclusive());
        lock.unlock_exclusive();
    }

    #[test]
    fn test_cell_concurrent_updates() {
        let cell = Arc::new(AtomicRwCell::new(0u64));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let cell = cell.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    cell.write(|v| *v += 1).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cell.read(|v| *v), Some(4000));
    }
}
