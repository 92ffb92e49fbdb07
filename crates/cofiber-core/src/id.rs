//! Fiber identifier type

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a fiber
///
/// Sub-fibers are numbered from 1 upward in creation order. The value 0 is
/// shared by every thread's main fiber.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u64);

/// Last id handed out to a sub-fiber
static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(0);

impl FiberId {
    /// Id carried by every main fiber
    pub const MAIN: FiberId = FiberId(0);

    /// Create a FiberId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        FiberId(id)
    }

    /// Allocate the next sub-fiber id (monotonic, process-wide)
    #[inline]
    pub fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is a main-fiber id
    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for FiberId {
    #[inline]
    fn from(id: u64) -> Self {
        FiberId(id)
    }
}

impl From<FiberId> for u64 {
    #[inline]
    fn from(id: FiberId) -> Self {
        id.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "FiberId(MAIN)")
        } else {
            write!(f, "FiberId({})", self.0)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_id_basics() {
        let id = FiberId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert!(!id.is_main());
        assert!(FiberId::MAIN.is_main());
        assert_eq!(format!("{:?}", FiberId::MAIN), "FiberId(MAIN)");
    }

    #[test]
    fn test_next_is_monotonic() {
        let a = FiberId::next();
        let b = FiberId::next();
        assert!(b > a);
        assert!(!a.is_main());
    }

    #[test]
    fn test_fiber_id_conversions() {
        let id: FiberId = 100u64.into();
        let raw: u64 = id.into();
        assert_eq!(raw, 100);
    }
}
