//! # cofiber-runtime
//!
//! Platform-specific half of the cofiber coroutine runtime.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - Fiber stacks (malloc or mmap with a guard page)
//! - OS-backed mutex, reader-writer mutex and semaphore
//! - The OS thread wrapper
//! - The fiber engine and its thread-local slots
//! - The configuration registry

pub mod arch;
pub mod config;
pub mod fiber;
pub mod stack;
pub mod sync;
pub mod thread;
pub mod tls;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{Config, ConfigVar, ConfigVarBase};
pub use fiber::Fiber;
pub use stack::{MallocStackAllocator, MmapStackAllocator, Stack, StackAllocator};
pub use sync::{Mutex, MutexGuard, RwMutex, RwMutexReadGuard, RwMutexWriteGuard, Semaphore};
pub use thread::{current_thread_id, Thread, ThreadInfo};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("Unsupported platform");
    }
}
