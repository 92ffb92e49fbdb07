//! Kernel-style print macros for cofiber
//!
//! Provides thread-safe, optionally-flushing leveled output on stderr, one
//! atomic line per call. Every leveled line carries the calling thread's
//! context: OS thread id, thread name and the id of the fiber running on it.
//!
//! Lines may be tagged with a logger name. Untagged lines belong to the
//! `root` logger; the runtime's own diagnostics go to `system`:
//!
//! ```ignore
//! kerror!(target: SYSTEM_LOGGER, "fiber {} panicked", id);
//! logger("app").log(LogLevel::Info, format_args!("ready"));
//! ```
//!
//! # Environment Variables
//!
//! - `COFIBER_FLUSH_EPRINT=1` - Flush stderr after each print (useful for debugging crashes)
//! - `COFIBER_LOG_LEVEL=<level>` - 0=off, 1=fatal, 2=error, 3=warn, 4=info, 5=debug, 6=trace
//!
//! # Usage
//!
//! ```ignore
//! use cofiber_core::{kinfo, kerror};
//!
//! kinfo!("fiber {} started", id);
//! kerror!("callback panicked: {}", msg);
//! ```
//!
//! Output looks like:
//!
//! ```text
//! [INFO ] [48211:worker-1 f=3] fiber 3 started
//! [ERROR] [48211:worker-1 f=3] system: fiber 3 panicked: boom
//! ```

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::env::{env_get_bool, env_get_opt};

/// Log levels, most severe first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Fatal,
            2 => LogLevel::Error,
            3 => LogLevel::Warn,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "fatal" | "1" => Some(LogLevel::Fatal),
            "error" | "2" => Some(LogLevel::Error),
            "warn" | "3" => Some(LogLevel::Warn),
            "info" | "4" => Some(LogLevel::Info),
            "debug" | "5" => Some(LogLevel::Debug),
            "trace" | "6" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Fatal => "[FATAL]",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        LogLevel::parse(s).ok_or(())
    }
}

/// Logger of untagged lines
pub const ROOT_LOGGER: &str = "root";

/// Logger of the runtime's own diagnostics
pub const SYSTEM_LOGGER: &str = "system";

/// A named logger
///
/// Loggers share the global level and sink. Every name except `root` is
/// printed after the thread context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logger {
    name: &'static str,
}

impl Logger {
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level_enabled(level)
    }

    pub fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        _klog_target_impl(self.name, level, args);
    }
}

/// Get the logger called `name`
#[inline]
pub const fn logger(name: &'static str) -> Logger {
    Logger { name }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Source of OS thread ids for threads the runtime never registered
static TID_PROVIDER: OnceLock<fn() -> i32> = OnceLock::new();

/// Sentinel for "no fiber on this thread"
const NO_FIBER: u64 = u64::MAX;

thread_local! {
    /// OS thread id of the calling thread (0 until the runtime sets it)
    static CTX_TID: Cell<i32> = const { Cell::new(0) };

    /// Name of the calling thread as known to the runtime
    static CTX_NAME: RefCell<String> = const { RefCell::new(String::new()) };

    /// Fiber currently running on this thread
    static CTX_FIBER: Cell<u64> = const { Cell::new(NO_FIBER) };
}

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let flush = env_get_bool("COFIBER_FLUSH_EPRINT", FLUSH_ENABLED.load(Ordering::Relaxed));
    FLUSH_ENABLED.store(flush, Ordering::Relaxed);

    if let Some(level) = env_get_opt::<LogLevel>("COFIBER_LOG_LEVEL") {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Check if flush is enabled
#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

// ============================================================================
// Per-thread context
// ============================================================================

/// Record the OS thread id and name for this thread's log lines
pub fn set_thread_context(tid: i32, name: &str) {
    let _ = CTX_TID.try_with(|c| c.set(tid));
    set_thread_name(name);
}

/// Install the function that supplies OS thread ids
///
/// Used for threads whose context was never set explicitly. The first
/// provider wins.
pub fn set_tid_provider(provider: fn() -> i32) {
    let _ = TID_PROVIDER.set(provider);
}

/// OS thread id shown in this thread's log lines (0 if unknown)
pub fn thread_tid() -> i32 {
    CTX_TID
        .try_with(|c| {
            if c.get() == 0 {
                if let Some(provider) = TID_PROVIDER.get() {
                    c.set(provider());
                }
            }
            c.get()
        })
        .unwrap_or(0)
}

/// Update the thread name shown in this thread's log lines
pub fn set_thread_name(name: &str) {
    let _ = CTX_NAME.try_with(|n| {
        if let Ok(mut n) = n.try_borrow_mut() {
            n.clear();
            n.push_str(name);
        }
    });
}

/// Record the fiber now running on this thread
#[inline]
pub fn set_fiber_id(id: u64) {
    let _ = CTX_FIBER.try_with(|c| c.set(id));
}

/// Forget the fiber context (thread has no fiber any more)
#[inline]
pub fn clear_fiber_id() {
    let _ = CTX_FIBER.try_with(|c| c.set(NO_FIBER));
}

fn write_context(out: &mut impl Write, target: &str) {
    let tid = thread_tid();
    let fiber = CTX_FIBER.try_with(|c| c.get()).unwrap_or(NO_FIBER);
    let _ = CTX_NAME.try_with(|n| match n.try_borrow() {
        Ok(name) if !name.is_empty() => {
            let _ = write!(out, "[{}:{}", tid, name);
        }
        _ => {
            let _ = write!(out, "[{}", tid);
        }
    });
    if fiber == NO_FIBER {
        let _ = write!(out, " f=-] ");
    } else {
        let _ = write!(out, " f={}] ", fiber);
    }
    if target != ROOT_LOGGER {
        let _ = write!(out, "{}: ", target);
    }
}

// ============================================================================
// Output
// ============================================================================

/// Internal: Write and optionally flush
///
/// Uses a lock on stderr to ensure atomic line output.
#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Internal: Write with newline and optionally flush
#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Internal: Leveled print with thread/fiber context
#[doc(hidden)]
#[inline]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    _klog_target_impl(ROOT_LOGGER, level, args);
}

/// Internal: Leveled print to a named logger
#[doc(hidden)]
pub fn _klog_target_impl(target: &str, level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    write_context(&mut handle, target);
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() || level == LogLevel::Fatal {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

/// Fatal level log, emitted right before an abort or a failed assertion
#[macro_export]
macro_rules! kfatal {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Fatal,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Fatal,
            format_args!($($arg)*)
        );
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_target_impl(
            $target,
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)+)
        );
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}
