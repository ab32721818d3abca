//! Shared foundations for the wagate workspace: the gateway-wide error
//! taxonomy and the safe-serialisation rules for upstream envelopes.

pub mod error;
pub mod sanitize;

pub use error::{Error, Result};

/// Current unix time in milliseconds.
pub fn unix_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
