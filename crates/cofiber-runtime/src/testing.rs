//! Test helper for checks that must end the process

use std::os::unix::process::ExitStatusExt;
use std::process::Command;

/// Set in the child so it runs the body instead of spawning again
const CHILD_ENV: &str = "COFIBER_EXPECT_ABORT";

/// Run `body` in a child copy of the test binary and expect it to abort
///
/// `test` is the full path of the calling test. The child runs just that
/// test, which executes `body`; it must die of SIGABRT with `needle` in
/// its stderr.
pub(crate) fn expect_abort<F: FnOnce()>(test: &str, needle: &str, body: F) {
    if std::env::var_os(CHILD_ENV).is_some() {
        body();
        return;
    }

    let exe = std::env::current_exe().unwrap();
    let out = Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .env("COFIBER_LOG_LEVEL", "info")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(
        out.status.signal(),
        Some(libc::SIGABRT),
        "child exited with {}\n{}",
        out.status,
        stderr
    );
    assert!(stderr.contains(needle), "missing {:?} in:\n{}", needle, stderr);
}
