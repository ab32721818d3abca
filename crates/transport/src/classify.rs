//! Upstream error classification.
//!
//! The upstream library emits noisy but recoverable errors during normal
//! operation (MAC verification retries, stream resets while a QR scan is in
//! flight). These are classified here and logged at the appropriate level by
//! the caller; the process-wide error sink is never touched.

use serde::Serialize;

/// How an upstream-reported error should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamErrorClass {
    /// Message decryption retry; upstream recovers on its own.
    BenignMacRetry,
    /// Stream reset while (re-)authenticating; the reconnect path handles it.
    BenignStreamReset,
    /// Anything else.
    Fatal,
}

const MAC_RETRY_MARKERS: &[&str] = &["Bad MAC", "failed to decrypt message"];
const STREAM_RESET_MARKERS: &[&str] = &["Stream Errored", "stream errored", "restart required"];

/// Classify an upstream error string.
#[must_use]
pub fn classify_upstream_error(message: &str) -> UpstreamErrorClass {
    if MAC_RETRY_MARKERS.iter().any(|m| message.contains(m)) {
        return UpstreamErrorClass::BenignMacRetry;
    }
    if STREAM_RESET_MARKERS.iter().any(|m| message.contains(m)) {
        return UpstreamErrorClass::BenignStreamReset;
    }
    UpstreamErrorClass::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_failures_are_benign() {
        assert_eq!(
            classify_upstream_error("Bad MAC Error: mac mismatch in session 3"),
            UpstreamErrorClass::BenignMacRetry
        );
        assert_eq!(
            classify_upstream_error("failed to decrypt message with any known session"),
            UpstreamErrorClass::BenignMacRetry
        );
    }

    #[test]
    fn stream_resets_are_benign() {
        assert_eq!(
            classify_upstream_error("Connection closed: Stream Errored (restart required)"),
            UpstreamErrorClass::BenignStreamReset
        );
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(
            classify_upstream_error("ENOTFOUND web.whatsapp.com"),
            UpstreamErrorClass::Fatal
        );
    }
}
