//! # cofiber-core
//!
//! Core types for the cofiber coroutine runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks, OS locks and threads are in `cofiber-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber lifecycle state
//! - `error` - Error types
//! - `lock` - Data-carrying locks and scoped guards over raw locks
//! - `spinlock` - Busy-wait raw lock
//! - `kprint` - Kernel-style leveled logging macros
//! - `assert` - `fatal!` and `fiber_assert!`
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod lock;
pub mod spinlock;
pub mod kprint;
pub mod assert;
pub mod env;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use id::FiberId;
pub use state::FiberState;
pub use error::{ConfigError, FiberError, FiberResult, MemoryError, ThreadError};
pub use lock::{Lock, RawLock, RawRwLock, ReadScopedLock, RwLock, ScopedLock, WriteScopedLock};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_raw, env_key};

/// Constants shared across the runtime
pub mod constants {
    /// Smallest stack a sub-fiber may be created with
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Name given to threads created without one
    pub const UNKNOWN_THREAD_NAME: &str = "UNKNOWN";

    /// Longest OS-level thread name on Linux (15 bytes + NUL)
    pub const MAX_OS_THREAD_NAME: usize = 15;
}
