//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults, and
//! the mapping from dotted config names to environment keys.
//!
//! # Usage
//!
//! ```ignore
//! use cofiber_core::env::{env_get, env_get_bool, env_key};
//!
//! let size: usize = env_get("COFIBER_FIBER_STACK_SIZE", 1 << 20);
//! let debug: bool = env_get_bool("COFIBER_DEBUG", false);
//! assert_eq!(env_key("fiber.stack_size"), "COFIBER_FIBER_STACK_SIZE");
//! ```

use std::str::FromStr;

/// Prefix of every environment key owned by cofiber
pub const ENV_PREFIX: &str = "COFIBER_";

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else returns false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Get environment variable as raw string, if set
#[inline]
pub fn env_get_raw(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Map a dotted config name to its environment key
///
/// `fiber.stack_size` becomes `COFIBER_FIBER_STACK_SIZE`.
pub fn env_key(config_name: &str) -> String {
    let mut key = String::with_capacity(ENV_PREFIX.len() + config_name.len());
    key.push_str(ENV_PREFIX);
    for c in config_name.chars() {
        key.push(if c == '.' { '_' } else { c.to_ascii_uppercase() });
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__COFIBER_TEST_UNSET_12345__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__COFIBER_TEST_UNSET_12345__");
        assert!(val.is_none());
        assert!(env_get_raw("__COFIBER_TEST_UNSET_12345__").is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__COFIBER_TEST_NUM__", "123");
        let val: usize = env_get("__COFIBER_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__COFIBER_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__COFIBER_TEST_BOOL__", "YES");
        assert!(env_get_bool("__COFIBER_TEST_BOOL__", false));

        std::env::set_var("__COFIBER_TEST_BOOL__", "0");
        assert!(!env_get_bool("__COFIBER_TEST_BOOL__", true));

        std::env::remove_var("__COFIBER_TEST_BOOL__");
        assert!(env_get_bool("__COFIBER_TEST_BOOL__", true));
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__COFIBER_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__COFIBER_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__COFIBER_TEST_INVALID__");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("fiber.stack_size"), "COFIBER_FIBER_STACK_SIZE");
        assert_eq!(env_key("log"), "COFIBER_LOG");
    }
}
