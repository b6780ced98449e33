//! Shared domain types for the script runtime scheduler.
//!
//! Pure data and normalization logic only. No I/O, no async runtime.

pub mod execution;
pub mod session;
pub mod settings;
pub mod types;
