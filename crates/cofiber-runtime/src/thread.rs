//! OS thread wrapper
//!
//! `Thread::new` does not return until the spawned thread has registered
//! its identity, recorded its OS id and taken ownership of the callback.
//! Anything the caller reads from the returned `Thread` is therefore final.
//!
//! ```ignore
//! let mut t = Thread::new(|| work(), "worker-1");
//! assert_eq!(t.name(), "worker-1");   // never a placeholder
//! t.join()?;
//! ```
//!
//! A `Thread` that is dropped without `join` detaches its OS thread. If the
//! OS refuses to create a thread the process aborts.

use crate::sync::{Mutex, Semaphore};
use cofiber_core::constants::{MAX_OS_THREAD_NAME, UNKNOWN_THREAD_NAME};
use cofiber_core::error::{FiberResult, ThreadError};
use cofiber_core::kprint::SYSTEM_LOGGER;
use cofiber_core::{fatal, kdebug, kerror, kprint};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identity of a thread started through `Thread`
///
/// Shared between the `Thread` handle and the thread itself.
pub struct ThreadInfo {
    id: AtomicI32,
    name: Mutex<String>,
}

impl ThreadInfo {
    fn new(name: String) -> Self {
        Self {
            id: AtomicI32::new(-1),
            name: Mutex::new(name),
        }
    }

    /// OS thread id
    #[inline]
    pub fn id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn set_name(&self, name: &str) {
        let mut guard = self.name.lock();
        guard.clear();
        guard.push_str(name);
    }
}

impl fmt::Debug for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadInfo")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

thread_local! {
    /// Identity of the calling thread, if it was started by `Thread`
    static CURRENT_THREAD: RefCell<Option<Arc<ThreadInfo>>> = const { RefCell::new(None) };

    /// Name of the calling thread; unset reads as "UNKNOWN"
    static THREAD_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// OS id of the calling thread
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_thread_id() -> i32 {
    nix::unistd::gettid().as_raw()
}

/// Process-unique id of the calling thread (no `gettid` on this platform)
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn current_thread_id() -> i32 {
    static NEXT: AtomicI32 = AtomicI32::new(1);
    thread_local! {
        static ID: i32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

/// Longest prefix of `name` the OS accepts as a thread name
fn os_thread_name(name: &str) -> String {
    let mut end = name.len().min(MAX_OS_THREAD_NAME);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].replace('\0', "")
}

/// Handle to an OS thread
pub struct Thread {
    info: Arc<ThreadInfo>,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawn a thread running `cb`
    ///
    /// Blocks until the new thread has published its id and name. An empty
    /// name becomes "UNKNOWN"; the OS-level name is cut to 15 bytes, while
    /// `name()` keeps the full string.
    pub fn new<F>(cb: F, name: &str) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(cb, name, None)
    }

    /// Like `new`, with an explicit OS stack size in bytes
    pub fn with_stack_size<F>(cb: F, name: &str, stack_size: usize) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(cb, name, Some(stack_size))
    }

    fn spawn<F>(cb: F, name: &str, stack_size: Option<usize>) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        kprint::set_tid_provider(current_thread_id);
        let name = if name.is_empty() {
            UNKNOWN_THREAD_NAME
        } else {
            name
        };
        let info = Arc::new(ThreadInfo::new(name.to_string()));
        let started = Arc::new(Semaphore::new(0));

        let mut builder = std::thread::Builder::new().name(os_thread_name(name));
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let spawned = builder.spawn({
            let info = Arc::clone(&info);
            let started = Arc::clone(&started);
            move || {
                let tid = current_thread_id();
                info.id.store(tid, Ordering::Release);
                let name = info.name();
                kprint::set_thread_context(tid, &name);
                THREAD_NAME.with(|n| *n.borrow_mut() = Some(name));
                CURRENT_THREAD.with(|t| *t.borrow_mut() = Some(info));

                // The closure owns `cb` from here on
                started.notify();
                drop(started);

                cb();
            }
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => fatal!("failed to spawn thread '{}': {}", name, e),
        };

        started.wait();
        kdebug!(target: SYSTEM_LOGGER, "thread '{}' started, tid {}", name, info.id());

        Thread {
            info,
            handle: Some(handle),
        }
    }

    /// Wait for the thread to finish
    ///
    /// A second call returns immediately. Fails if the callback panicked.
    pub fn join(&mut self) -> FiberResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|_| {
            kerror!(
                target: SYSTEM_LOGGER,
                "thread '{}' (tid {}) panicked",
                self.info.name(),
                self.info.id()
            );
            ThreadError::Panicked.into()
        })
    }

    /// Whether `join` has not been called yet
    #[inline]
    pub fn is_joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// OS thread id
    #[inline]
    pub fn id(&self) -> i32 {
        self.info.id()
    }

    pub fn name(&self) -> String {
        self.info.name()
    }

    /// Shared identity record
    pub fn info(&self) -> Arc<ThreadInfo> {
        Arc::clone(&self.info)
    }

    /// Identity of the calling thread; `None` unless it was started by `Thread`
    pub fn current() -> Option<Arc<ThreadInfo>> {
        CURRENT_THREAD
            .try_with(|t| t.borrow().clone())
            .ok()
            .flatten()
    }

    /// Name of the calling thread
    pub fn current_name() -> String {
        THREAD_NAME
            .try_with(|n| n.borrow().clone())
            .ok()
            .flatten()
            .unwrap_or_else(|| UNKNOWN_THREAD_NAME.to_string())
    }

    /// Rename the calling thread; empty names are ignored
    pub fn set_current_name(name: &str) {
        if name.is_empty() {
            return;
        }
        if let Some(info) = Self::current() {
            info.set_name(name);
        }
        THREAD_NAME.with(|n| *n.borrow_mut() = Some(name.to_string()));
        kprint::set_thread_name(name);
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Dropping a JoinHandle detaches the thread
            kdebug!(target: SYSTEM_LOGGER, "detaching thread '{}'", self.info.name());
            drop(handle);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("joinable", &self.is_joinable())
            .finish()
    }
}
