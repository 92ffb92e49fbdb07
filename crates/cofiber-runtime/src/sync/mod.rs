//! OS-backed synchronization primitives
//!
//! - `Semaphore` - counting semaphore (POSIX `sem_t` on Linux, a
//!   Mutex+Condvar pair elsewhere)
//! - `Mutex<T>` - exclusive pthread mutex around a value
//! - `RwMutex<T>` - pthread reader-writer lock around a value
//!
//! The spinlock and the generic guard machinery live in `cofiber-core`.
//! Any failure of the underlying OS primitive is fatal.

mod mutex;
mod semaphore;

pub use mutex::{Mutex, MutexGuard, RawMutex, RawRwMutex, RwMutex, RwMutexReadGuard, RwMutexWriteGuard};
pub use semaphore::Semaphore;

pub use cofiber_core::spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
