//! Fatal-error and assertion macros
//!
//! Neither kind of failure is handed back to a caller:
//!
//! - `fatal!` - the substrate itself broke (a pthread call failed). Logs at
//!   FATAL and aborts the process.
//! - `fiber_assert!` - the caller broke a documented precondition. Logs at
//!   FATAL with a backtrace and aborts. It never unwinds, so a broken
//!   precondition inside a fiber is not mistaken for a callback fault.

/// Capture a backtrace of the calling thread, regardless of `RUST_BACKTRACE`
#[doc(hidden)]
pub fn _backtrace() -> std::backtrace::Backtrace {
    std::backtrace::Backtrace::force_capture()
}

/// Log a fatal message and abort the process
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::kfatal!(target: $crate::kprint::SYSTEM_LOGGER, $($arg)*);
        ::std::process::abort()
    }};
}

/// Assert a precondition; on failure log it with a backtrace and abort
#[macro_export]
macro_rules! fiber_assert {
    ($cond:expr $(,)?) => {{
        if !$cond {
            $crate::fatal!(
                "assertion failed: {}\nbacktrace:\n{}",
                stringify!($cond),
                $crate::assert::_backtrace()
            );
        }
    }};
    ($cond:expr, $($arg:tt)+) => {{
        if !$cond {
            $crate::fatal!(
                "assertion failed: {} {}\nbacktrace:\n{}",
                stringify!($cond),
                format_args!($($arg)+),
                $crate::assert::_backtrace()
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::testing::expect_abort;

    #[test]
    fn test_assert_passes() {
        fiber_assert!(1 + 1 == 2);
        fiber_assert!(true, "never shown {}", 1);
    }

    #[test]
    fn test_assert_aborts_with_message() {
        expect_abort(
            "assert::tests::test_assert_aborts_with_message",
            "assertion failed: 1 > 2 one is not bigger",
            || fiber_assert!(1 > 2, "one is not bigger"),
        );
    }

    #[test]
    fn test_assert_is_not_caught_by_catch_unwind() {
        expect_abort(
            "assert::tests::test_assert_is_not_caught_by_catch_unwind",
            "assertion failed: false",
            || {
                let _ = std::panic::catch_unwind(|| fiber_assert!(false));
            },
        );
    }

    #[test]
    fn test_fatal_aborts() {
        expect_abort("assert::tests::test_fatal_aborts", "[FATAL]", || {
            fatal!("semaphore broke: {}", "EINVAL")
        });
    }
}
