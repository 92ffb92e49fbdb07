//! Compile-time defaults
//!
//! Generated by `build.rs` from the library values, merged with the file
//! named by `COFIBER_CONFIG_RS` when it is set at build time.

include!(concat!(env!("OUT_DIR"), "/cofiber_defaults.rs"));
