//! Foundational low-level utilities shared across Courier crates.
//!
//! Provides the clock and expiry helpers used by delivery records, adapter
//! receipts, and inbox entries.

pub mod time_utils;

pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix_ms};
