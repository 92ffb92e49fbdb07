//! pthread-backed raw locks

use cofiber_core::lock::{Lock, RawLock, RawRwLock, ReadScopedLock, RwLock, ScopedLock, WriteScopedLock};
use cofiber_core::fatal;
use nix::errno::Errno;
use std::cell::UnsafeCell;

/// A value protected by a pthread mutex
pub type Mutex<T> = Lock<RawMutex, T>;
pub type MutexGuard<'a, T> = ScopedLock<'a, RawMutex, T>;

/// A value protected by a pthread reader-writer lock
pub type RwMutex<T> = RwLock<RawRwMutex, T>;
pub type RwMutexReadGuard<'a, T> = ReadScopedLock<'a, RawRwMutex, T>;
pub type RwMutexWriteGuard<'a, T> = WriteScopedLock<'a, RawRwMutex, T>;

#[inline]
fn check(op: &str, rc: libc::c_int) {
    if rc != 0 {
        fatal!("{} failed: {}", op, Errno::from_raw(rc));
    }
}

/// Exclusive OS mutex
///
/// Boxed so the pthread object never moves after initialization.
pub struct RawMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// Safety: pthread mutexes are made to be shared between threads
unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub fn new() -> Self {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        check("pthread_mutex_init", unsafe {
            libc::pthread_mutex_init(inner.get(), std::ptr::null())
        });
        Self { inner }
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawLock for RawMutex {
    #[inline]
    fn lock(&self) {
        check("pthread_mutex_lock", unsafe {
            libc::pthread_mutex_lock(self.inner.get())
        });
    }

    #[inline]
    fn try_lock(&self) -> bool {
        match unsafe { libc::pthread_mutex_trylock(self.inner.get()) } {
            0 => true,
            libc::EBUSY => false,
            rc => fatal!("pthread_mutex_trylock failed: {}", Errno::from_raw(rc)),
        }
    }

    #[inline]
    unsafe fn unlock(&self) {
        check("pthread_mutex_unlock", libc::pthread_mutex_unlock(self.inner.get()));
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        unsafe { libc::pthread_mutex_destroy(self.inner.get()) };
    }
}

/// Reader-writer OS lock
pub struct RawRwMutex {
    inner: Box<UnsafeCell<libc::pthread_rwlock_t>>,
}

unsafe impl Send for RawRwMutex {}
unsafe impl Sync for RawRwMutex {}

impl RawRwMutex {
    pub fn new() -> Self {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_RWLOCK_INITIALIZER));
        check("pthread_rwlock_init", unsafe {
            libc::pthread_rwlock_init(inner.get(), std::ptr::null())
        });
        Self { inner }
    }
}

impl Default for RawRwMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawRwLock for RawRwMutex {
    #[inline]
    fn lock_shared(&self) {
        check("pthread_rwlock_rdlock", unsafe {
            libc::pthread_rwlock_rdlock(self.inner.get())
        });
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        check("pthread_rwlock_unlock", libc::pthread_rwlock_unlock(self.inner.get()));
    }

    #[inline]
    fn lock_exclusive(&self) {
        check("pthread_rwlock_wrlock", unsafe {
            libc::pthread_rwlock_wrlock(self.inner.get())
        });
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        check("pthread_rwlock_unlock", libc::pthread_rwlock_unlock(self.inner.get()));
    }
}

impl Drop for RawRwMutex {
    fn drop(&mut self) {
        unsafe { libc::pthread_rwlock_destroy(self.inner.get()) };
    }
}
