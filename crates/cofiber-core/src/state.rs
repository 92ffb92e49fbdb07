//! Fiber lifecycle state

use core::fmt;

/// State of a fiber
///
/// ```text
///   new/reset ──► Init ──swap_in──► Exec ──yield_to_ready──► Ready
///                                    │  ──yield_to_hold───► Hold
///                                    │  ──callback returns─► Term
///                                    └──callback panics──► Except
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created (or reset) with a callback, never switched into
    Init = 0,

    /// Yielded and wants to be resumed
    Ready = 1,

    /// Yielded and parked until someone resumes it explicitly
    Hold = 2,

    /// Currently executing on its thread
    Exec = 3,

    /// Callback returned normally
    Term = 4,

    /// Callback panicked; the panic was contained at the fiber boundary
    Except = 5,
}

impl FiberState {
    /// States in which a fiber's stack may be released or reused
    #[inline]
    pub const fn is_reusable(&self) -> bool {
        matches!(self, FiberState::Init | FiberState::Term | FiberState::Except)
    }

    /// Check if the fiber's callback has finished (normally or not)
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, FiberState::Term | FiberState::Except)
    }

    /// Check if the fiber can be switched into
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, FiberState::Init | FiberState::Ready | FiberState::Hold)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            FiberState::Init => "INIT",
            FiberState::Ready => "READY",
            FiberState::Hold => "HOLD",
            FiberState::Exec => "EXEC",
            FiberState::Term => "TERM",
            FiberState::Except => "EXCEPT",
        }
    }
}

impl From<u8> for FiberState {
    fn from(v: u8) -> Self {
        match v {
            0 => FiberState::Init,
            1 => FiberState::Ready,
            2 => FiberState::Hold,
            3 => FiberState::Exec,
            4 => FiberState::Term,
            _ => FiberState::Except,
        }
    }
}

impl From<FiberState> for u8 {
    fn from(state: FiberState) -> u8 {
        state as u8
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(FiberState::Init.is_reusable());
        assert!(FiberState::Term.is_reusable());
        assert!(FiberState::Except.is_reusable());
        assert!(!FiberState::Exec.is_reusable());
        assert!(!FiberState::Hold.is_reusable());
        assert!(!FiberState::Ready.is_reusable());

        assert!(FiberState::Term.is_terminated());
        assert!(!FiberState::Init.is_terminated());

        assert!(FiberState::Hold.is_resumable());
        assert!(!FiberState::Exec.is_resumable());
        assert!(!FiberState::Term.is_resumable());
    }

    #[test]
    fn test_state_u8_roundtrip() {
        for s in [FiberState::Init, FiberState::Hold, FiberState::Except] {
            assert_eq!(FiberState::from(u8::from(s)), s);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FiberState::Except.to_string(), "EXCEPT");
        assert_eq!(format!("{}", FiberState::Hold), "HOLD");
    }
}
