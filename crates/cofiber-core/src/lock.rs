//! Data-carrying locks and their scoped guards
//!
//! The actual locking is delegated to a raw lock (`RawLock` for exclusive
//! locks, `RawRwLock` for reader/writer locks). The spinlock lives in this
//! crate; the OS-backed mutex and rw-mutex live in `cofiber-runtime`.
//!
//! Every guard acquires on construction and releases on drop, exactly once.
//! A guard can also be released and re-acquired explicitly with
//! `unlock()` / `lock()`; an internal "held" flag makes both idempotent.
//!
//! ```ignore
//! let counter: Mutex<u64> = Mutex::new(0);
//! {
//!     let mut guard = counter.lock();
//!     *guard += 1;
//!     guard.unlock();      // released early
//!     guard.unlock();      // no-op
//! }                        // nothing left to release
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// An exclusive lock without data
///
/// # Safety
///
/// `lock` must not return while another caller holds the lock, and
/// `try_lock` must only return true when it acquired it.
pub unsafe trait RawLock: Default + Send + Sync {
    /// Acquire, blocking or spinning until available
    fn lock(&self);

    /// Acquire only if free
    fn try_lock(&self) -> bool;

    /// Release
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn unlock(&self);
}

/// A reader-writer lock without data
///
/// # Safety
///
/// Shared holders must exclude exclusive holders and vice versa.
pub unsafe trait RawRwLock: Default + Send + Sync {
    fn lock_shared(&self);

    /// # Safety
    ///
    /// The calling thread must hold a shared lock.
    unsafe fn unlock_shared(&self);

    fn lock_exclusive(&self);

    /// # Safety
    ///
    /// The calling thread must hold the exclusive lock.
    unsafe fn unlock_exclusive(&self);
}

// ============================================================================
// Exclusive lock
// ============================================================================

/// A value protected by an exclusive raw lock
pub struct Lock<R: RawLock, T: ?Sized> {
    raw: R,
    data: UnsafeCell<T>,
}

// Safety: the raw lock serializes all access to T
unsafe impl<R: RawLock, T: ?Sized + Send> Send for Lock<R, T> {}
unsafe impl<R: RawLock, T: ?Sized + Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    /// Create a new lock containing the given value
    pub fn new(value: T) -> Self {
        Self {
            raw: R::default(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock and return the inner value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<R: RawLock, T: ?Sized> Lock<R, T> {
    /// Acquire the lock; released when the guard drops
    #[inline]
    pub fn lock(&self) -> ScopedLock<'_, R, T> {
        self.raw.lock();
        ScopedLock {
            lock: self,
            held: true,
            _not_send: PhantomData,
        }
    }

    /// Acquire the lock only if it is free
    #[inline]
    pub fn try_lock(&self) -> Option<ScopedLock<'_, R, T>> {
        if self.raw.try_lock() {
            Some(ScopedLock {
                lock: self,
                held: true,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Mutable access without locking; `&mut self` proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// The underlying raw lock
    pub fn raw(&self) -> &R {
        &self.raw
    }
}

impl<R: RawLock, T: Default> Default for Lock<R, T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<R: RawLock, T: ?Sized + fmt::Debug> fmt::Debug for Lock<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Lock").field("data", &&*guard).finish(),
            None => f.debug_struct("Lock").field("data", &"<locked>").finish(),
        }
    }
}

/// Scoped guard for `Lock`
pub struct ScopedLock<'a, R: RawLock, T: ?Sized> {
    lock: &'a Lock<R, T>,
    held: bool,
    // OS locks must be released by the thread that took them
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: RawLock, T: ?Sized> ScopedLock<'a, R, T> {
    /// Re-acquire after an explicit `unlock`; no-op while held
    pub fn lock(&mut self) {
        if !self.held {
            self.lock.raw.lock();
            self.held = true;
        }
    }

    /// Release early; no-op if already released
    pub fn unlock(&mut self) {
        if self.held {
            // Safety: held flag says this guard owns the lock
            unsafe { self.lock.raw.unlock() };
            self.held = false;
        }
    }

    /// Whether this guard currently owns the lock
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<'a, R: RawLock, T: ?Sized> Deref for ScopedLock<'a, R, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        crate::fiber_assert!(self.held, "guard used after unlock()");
        // Safety: we hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, R: RawLock, T: ?Sized> DerefMut for ScopedLock<'a, R, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        crate::fiber_assert!(self.held, "guard used after unlock()");
        // Safety: we hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, R: RawLock, T: ?Sized> Drop for ScopedLock<'a, R, T> {
    #[inline]
    fn drop(&mut self) {
        self.unlock();
    }
}

// ============================================================================
// Reader-writer lock
// ============================================================================

/// A value protected by a reader-writer raw lock
pub struct RwLock<R: RawRwLock, T: ?Sized> {
    raw: R,
    data: UnsafeCell<T>,
}

// Safety: shared access hands out &T to several threads, so T: Sync too
unsafe impl<R: RawRwLock, T: ?Sized + Send> Send for RwLock<R, T> {}
unsafe impl<R: RawRwLock, T: ?Sized + Send + Sync> Sync for RwLock<R, T> {}

impl<R: RawRwLock, T> RwLock<R, T> {
    pub fn new(value: T) -> Self {
        Self {
            raw: R::default(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<R: RawRwLock, T: ?Sized> RwLock<R, T> {
    /// Take the shared lock
    #[inline]
    pub fn read(&self) -> ReadScopedLock<'_, R, T> {
        self.raw.lock_shared();
        ReadScopedLock {
            lock: self,
            held: true,
            _not_send: PhantomData,
        }
    }

    /// Take the exclusive lock
    #[inline]
    pub fn write(&self) -> WriteScopedLock<'_, R, T> {
        self.raw.lock_exclusive();
        WriteScopedLock {
            lock: self,
            held: true,
            _not_send: PhantomData,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<R: RawRwLock, T: Default> Default for RwLock<R, T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Shared guard for `RwLock`
pub struct ReadScopedLock<'a, R: RawRwLock, T: ?Sized> {
    lock: &'a RwLock<R, T>,
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: RawRwLock, T: ?Sized> ReadScopedLock<'a, R, T> {
    pub fn lock(&mut self) {
        if !self.held {
            self.lock.raw.lock_shared();
            self.held = true;
        }
    }

    pub fn unlock(&mut self) {
        if self.held {
            unsafe { self.lock.raw.unlock_shared() };
            self.held = false;
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<'a, R: RawRwLock, T: ?Sized> Deref for ReadScopedLock<'a, R, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        crate::fiber_assert!(self.held, "read guard used after unlock()");
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, R: RawRwLock, T: ?Sized> Drop for ReadScopedLock<'a, R, T> {
    #[inline]
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Exclusive guard for `RwLock`
pub struct WriteScopedLock<'a, R: RawRwLock, T: ?Sized> {
    lock: &'a RwLock<R, T>,
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: RawRwLock, T: ?Sized> WriteScopedLock<'a, R, T> {
    pub fn lock(&mut self) {
        if !self.held {
            self.lock.raw.lock_exclusive();
            self.held = true;
        }
    }

    pub fn unlock(&mut self) {
        if self.held {
            unsafe { self.lock.raw.unlock_exclusive() };
            self.held = false;
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<'a, R: RawRwLock, T: ?Sized> Deref for WriteScopedLock<'a, R, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        crate::fiber_assert!(self.held, "write guard used after unlock()");
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, R: RawRwLock, T: ?Sized> DerefMut for WriteScopedLock<'a, R, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        crate::fiber_assert!(self.held, "write guard used after unlock()");
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, R: RawRwLock, T: ?Sized> Drop for WriteScopedLock<'a, R, T> {
    #[inline]
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

    /// Counts acquisitions so tests can observe exactly-once release
    #[derive(Default)]
    struct CountingLock {
        held: AtomicUsize,
    }

    unsafe impl RawLock for CountingLock {
        fn lock(&self) {
            assert_eq!(self.held.fetch_add(1, Ordering::SeqCst), 0, "double acquire");
        }

        fn try_lock(&self) -> bool {
            self.held
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }

        unsafe fn unlock(&self) {
            assert_eq!(self.held.fetch_sub(1, Ordering::SeqCst), 1, "double release");
        }
    }

    /// Readers count up, a writer is -1
    #[derive(Default)]
    struct CountingRwLock {
        state: AtomicIsize,
    }

    unsafe impl RawRwLock for CountingRwLock {
        fn lock_shared(&self) {
            assert!(self.state.fetch_add(1, Ordering::SeqCst) >= 0);
        }

        unsafe fn unlock_shared(&self) {
            assert!(self.state.fetch_sub(1, Ordering::SeqCst) > 0);
        }

        fn lock_exclusive(&self) {
            assert_eq!(self.state.swap(-1, Ordering::SeqCst), 0);
        }

        unsafe fn unlock_exclusive(&self) {
            assert_eq!(self.state.swap(0, Ordering::SeqCst), -1);
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock: Lock<CountingLock, u32> = Lock::new(1);
        {
            let mut guard = lock.lock();
            *guard = 42;
            assert_eq!(lock.raw().held.load(Ordering::SeqCst), 1);
        }
        assert_eq!(lock.raw().held.load(Ordering::SeqCst), 0);
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn test_explicit_unlock_is_idempotent() {
        let lock: Lock<CountingLock, u32> = Lock::new(0);
        let mut guard = lock.lock();
        guard.unlock();
        guard.unlock();
        assert!(!guard.is_held());
        assert_eq!(lock.raw().held.load(Ordering::SeqCst), 0);

        guard.lock();
        guard.lock();
        assert!(guard.is_held());
        *guard += 1;
        drop(guard);
        assert_eq!(lock.raw().held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_released_on_early_return() {
        fn bump(lock: &Lock<CountingLock, u32>, bail: bool) -> Option<u32> {
            let mut guard = lock.lock();
            if bail {
                return None;
            }
            *guard += 1;
            Some(*guard)
        }

        let lock: Lock<CountingLock, u32> = Lock::new(0);
        assert_eq!(bump(&lock, true), None);
        assert_eq!(bump(&lock, false), Some(1));
        assert_eq!(lock.raw().held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_released_on_panic() {
        let lock: Lock<CountingLock, u32> = Lock::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.lock();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(lock.raw().held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_try_lock() {
        let lock: Lock<CountingLock, u32> = Lock::new(0);
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_deref_after_unlock_aborts() {
        crate::testing::expect_abort(
            "lock::tests::test_deref_after_unlock_aborts",
            "guard used after unlock()",
            || {
                let lock: Lock<CountingLock, u32> = Lock::new(0);
                let mut guard = lock.lock();
                guard.unlock();
                let _value: u32 = *guard;
            },
        );
    }

    #[test]
    fn test_rwlock_guards() {
        let lock: RwLock<CountingRwLock, Vec<u32>> = RwLock::new(vec![1]);
        {
            let r1 = lock.read();
            let r2 = lock.read();
            assert_eq!(r1.len() + r2.len(), 2);
            assert_eq!(lock.raw.state.load(Ordering::SeqCst), 2);
        }
        {
            let mut w = lock.write();
            w.push(2);
            w.unlock();
            w.unlock();
            assert_eq!(lock.raw.state.load(Ordering::SeqCst), 0);
        }
        assert_eq!(*lock.read(), vec![1, 2]);
        assert_eq!(lock.into_inner(), vec![1, 2]);
    }
}
