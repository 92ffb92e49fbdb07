//! Busy-wait spinlock
//!
//! For very short critical sections under heavy contention, where parking
//! the thread in the kernel costs more than spinning (the logging hot path,
//! counters touched on every fiber switch). Holders must never block or
//! switch fibers while holding it.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::lock::{Lock, RawLock, ScopedLock};

/// A value protected by a spinlock
pub type SpinLock<T> = Lock<RawSpinLock, T>;

/// Guard that releases the spinlock when dropped
pub type SpinLockGuard<'a, T> = ScopedLock<'a, RawSpinLock, T>;

/// Raw test-and-test-and-set spinlock
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Check if the lock is currently held (racy, for diagnostics)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawLock for RawSpinLock {
    #[inline]
    fn lock(&self) {
        loop {
            // Weak CAS can fail spuriously, the loop absorbs that
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            // Spin on a plain load until it looks free, with backoff
            let mut spin_count = 0u32;
            while self.locked.load(Ordering::Relaxed) {
                spin_count = spin_count.wrapping_add(1);
                for _ in 0..spin_count.min(64) {
                    core::hint::spin_loop();
                }
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
