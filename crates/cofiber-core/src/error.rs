//! Error types for the cofiber runtime

use core::fmt;

/// Result type for runtime operations
pub type FiberResult<T> = Result<T, FiberError>;

/// Errors that can be returned to a caller
///
/// Substrate failures (a broken mutex, a failed semaphore wait) are not
/// represented here: those abort the process through `fatal!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberError {
    /// Operation not allowed in the fiber's current state
    InvalidState,

    /// Stack allocation or release failed
    MemoryError(MemoryError),

    /// OS thread creation or join failed
    ThreadError(ThreadError),

    /// Configuration registry error
    ConfigError(ConfigError),

    /// Raw errno from a platform call
    PlatformError(i32),
}

impl fmt::Display for FiberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberError::InvalidState => write!(f, "invalid fiber state"),
            FiberError::MemoryError(e) => write!(f, "memory error: {}", e),
            FiberError::ThreadError(e) => write!(f, "thread error: {}", e),
            FiberError::ConfigError(e) => write!(f, "config error: {}", e),
            FiberError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for FiberError {}

/// Stack memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// malloc or mmap returned nothing
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// Requested stack size is zero or overflows when page-rounded
    InvalidSize(usize),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::InvalidSize(size) => write!(f, "invalid stack size {}", size),
        }
    }
}

impl From<MemoryError> for FiberError {
    fn from(e: MemoryError) -> Self {
        FiberError::MemoryError(e)
    }
}

/// OS thread errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// The thread's callback panicked; reported by join
    Panicked,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Panicked => write!(f, "thread panicked"),
        }
    }
}

impl From<ThreadError> for FiberError {
    fn from(e: ThreadError) -> Self {
        FiberError::ThreadError(e)
    }
}

/// Configuration registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Name contains characters outside `[a-z0-9._]`
    InvalidName(String),

    /// Name already registered with a different value type
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Value string could not be parsed into the variable's type
    ParseFailed { name: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidName(name) => write!(f, "invalid config name '{}'", name),
            ConfigError::TypeMismatch { name, expected, actual } => write!(
                f,
                "config '{}' exists with type {} (requested {})",
                name, actual, expected
            ),
            ConfigError::ParseFailed { name, value } => {
                write!(f, "cannot parse '{}' for config '{}'", value, name)
            }
        }
    }
}

impl From<ConfigError> for FiberError {
    fn from(e: ConfigError) -> Self {
        FiberError::ConfigError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = FiberError::InvalidState;
        assert_eq!(format!("{}", e), "invalid fiber state");

        let e = FiberError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: stack allocation failed");

        let e: FiberError = ConfigError::InvalidName("Bad Name".into()).into();
        assert_eq!(format!("{}", e), "config error: invalid config name 'Bad Name'");
    }

    #[test]
    fn test_error_conversion() {
        let err: FiberError = ThreadError::Panicked.into();
        assert!(matches!(err, FiberError::ThreadError(ThreadError::Panicked)));
        assert_eq!(err.to_string(), "thread error: thread panicked");

        let err: FiberError = MemoryError::InvalidSize(0).into();
        assert!(matches!(err, FiberError::MemoryError(MemoryError::InvalidSize(0))));
    }
}
