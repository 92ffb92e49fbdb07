//! Architecture-specific context switching
//!
//! Each architecture module provides the same three items:
//!
//! - `Context` - callee-saved register file of a suspended execution
//! - `init_context` - prepare a fresh context that starts in an entry function
//! - `switch_context` - save the running context, resume another
//!
//! The switch never fails and never chains: resuming a context jumps to
//! exactly the target it was given.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{Context, init_context, switch_context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{Context, init_context, switch_context};
    } else {
        compile_error!("Unsupported architecture");
    }
}

/// Entry function signature for a fresh context; it must never return
pub type EntryFn = extern "C" fn(usize) -> !;
