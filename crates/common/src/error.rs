use thiserror::Error;

/// Crate-wide result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed gateway errors shared across the workspace.
///
/// Every variant carries a stable short code (see [`Error::code`]) that the
/// control API embeds in response envelopes and maps to an HTTP status.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested entity (instance, webhook, history row) does not exist.
    #[error("not found: {entity}")]
    NotFound { entity: String },

    /// An instance with the given phone already exists.
    #[error("instance already exists: {phone}")]
    AlreadyExists { phone: String },

    /// Input payload or parameter failed validation.
    #[error("invalid input: {message}")]
    BadInput { message: String },

    /// A send was attempted against an instance that is not active.
    #[error("instance not connected: {phone} ({status})")]
    NotConnected { phone: String, status: String },

    /// An operation exceeded its deadline.
    #[error("timed out: {operation}")]
    Timeout { operation: String },

    /// The upstream chat service reported an error.
    #[error("upstream error: {message}")]
    Upstream { message: String },

    /// A persistence operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON (de)serialisation failed.
    #[error(transparent)]
    Serialisation(#[from] serde_json::Error),

    /// Anything else.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    #[must_use]
    pub fn not_found(entity: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
        }
    }

    #[must_use]
    pub fn already_exists(phone: impl Into<String>) -> Self {
        Self::AlreadyExists {
            phone: phone.into(),
        }
    }

    #[must_use]
    pub fn bad_input(message: impl std::fmt::Display) -> Self {
        Self::BadInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_connected(phone: impl Into<String>, status: impl Into<String>) -> Self {
        Self::NotConnected {
            phone: phone.into(),
            status: status.into(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn upstream(message: impl std::fmt::Display) -> Self {
        Self::Upstream {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }

    /// Stable short code for API envelopes and log correlation.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::BadInput { .. } => "bad_input",
            Self::NotConnected { .. } => "not_connected",
            Self::Timeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Storage(_) => "storage",
            Self::Serialisation(_) => "serialisation",
            Self::Internal { .. } => "internal",
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::not_found("instance 123").code(), "not_found");
        assert_eq!(Error::already_exists("628").code(), "already_exists");
        assert_eq!(Error::bad_input("empty to").code(), "bad_input");
        assert_eq!(
            Error::not_connected("628", "reconnecting").code(),
            "not_connected"
        );
        assert_eq!(Error::timeout("group metadata query").code(), "timeout");
    }

    #[test]
    fn serde_errors_map_to_serialisation() {
        let err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        assert_eq!(Error::from(err).code(), "serialisation");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::not_connected("628123", "qr_ready");
        assert!(err.to_string().contains("628123"));
        assert!(err.to_string().contains("qr_ready"));
    }
}
