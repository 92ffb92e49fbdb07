//! # cofiber - stackful cooperative fibers
//!
//! User-level coroutines on top of OS threads, plus the thread wrapper and
//! locks they are built with.
//!
//! ## Features
//!
//! - **Fibers**: each with its own stack, switched by hand-written assembly
//! - **Two-level switching**: a per-thread main fiber swaps sub-fibers in,
//!   sub-fibers yield back to it
//! - **Fault containment**: a panicking fiber ends up EXCEPT, the thread
//!   carries on
//! - **Threads**: named OS threads whose identity is final when `new` returns
//! - **Locks**: mutex, reader-writer mutex, spinlock and semaphore with
//!   scoped guards
//!
//! ## Quick Start
//!
//! ```ignore
//! use cofiber::{Fiber, FiberState, Thread};
//!
//! fn main() {
//!     cofiber::init();
//!
//!     let mut t = Thread::new(|| {
//!         let fiber = Fiber::new(|| {
//!             println!("start");
//!             Fiber::yield_to_hold();
//!             println!("end");
//!         }, 0).unwrap();
//!
//!         fiber.swap_in();                        // prints "start"
//!         assert_eq!(fiber.state(), FiberState::Hold);
//!         fiber.swap_in();                        // prints "end"
//!         assert_eq!(fiber.state(), FiberState::Term);
//!     }, "worker-1");
//!
//!     t.join().unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │          Fiber::new, swap_in, yield_to_*, Thread::new       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Fiber Engine                            │
//! │      main fiber per thread, trampoline, TLS slots           │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Context  │      │   Stack   │      │  Config   │
//!    │  switch   │      │ allocator │      │ registry  │
//!    └───────────┘      └───────────┘      └───────────┘
//!                              │
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │     Thread wrapper, Mutex / RwMutex / Semaphore         │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use cofiber_core::{
    ConfigError,
    FiberError,
    FiberId,
    FiberResult,
    FiberState,
    MemoryError,
    ThreadError,
    ScopedLock,
    ReadScopedLock,
    WriteScopedLock,
    SpinLock,
    SpinLockGuard,
};

// Re-export kprint macros for logging
pub use cofiber_core::{kprint, kprintln, kfatal, kerror, kwarn, kinfo, kdebug, ktrace, fatal, fiber_assert};
pub use cofiber_core::kprint::{
    logger, set_flush_enabled, set_log_level, LogLevel, Logger, ROOT_LOGGER, SYSTEM_LOGGER,
};

// Re-export env utilities
pub use cofiber_core::{env_get, env_get_bool, env_get_opt, env_get_raw, env_key};

// Re-export runtime types
pub use cofiber_runtime::{
    current_thread_id,
    Config,
    ConfigVar,
    ConfigVarBase,
    Fiber,
    MallocStackAllocator,
    MmapStackAllocator,
    Mutex,
    MutexGuard,
    RwMutex,
    RwMutexReadGuard,
    RwMutexWriteGuard,
    Semaphore,
    StackAllocator,
    Thread,
    ThreadInfo,
};
pub use cofiber_runtime::config;

use std::sync::Once;

/// Bring the runtime up in a defined order
///
/// 1. Logging, from `COFIBER_LOG_LEVEL` / `COFIBER_FLUSH_EPRINT`, else the
///    build-time default level; OS thread ids for every thread's log lines
/// 2. Register `fiber.stack_size`
/// 3. Apply `COFIBER_*` environment overrides to registered variables
/// 4. Log every later change of the stack size
///
/// Safe to call more than once; only the first call does anything. Fibers
/// work without it, using the build-time stack size.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        cofiber_core::kprint::init();
        cofiber_core::kprint::set_tid_provider(current_thread_id);
        if env_get_raw("COFIBER_LOG_LEVEL").is_none() {
            if let Some(level) = LogLevel::parse(config::defaults::LOG_LEVEL) {
                set_log_level(level);
            }
        }

        let Some(stack_size) = config::fiber_stack_size_var() else {
            kerror!(
                target: SYSTEM_LOGGER,
                "{} is registered with a non-u32 type",
                config::FIBER_STACK_SIZE
            );
            return;
        };
        let applied = Config::apply_env();
        config::watch_stack_size();

        kinfo!(
            target: SYSTEM_LOGGER,
            "cofiber initialized: fiber stack {} bytes, {} env override(s)",
            stack_size.value(),
            applied
        );
    });
}
