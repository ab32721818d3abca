//! Persisted entity records and their column-level enums.

use serde::{Deserialize, Serialize};

use wagate_common::{Error, Result};

// ── Instance ────────────────────────────────────────────────────────────────

/// Connection lifecycle status of an instance, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Connecting,
    QrReady,
    Active,
    Reconnecting,
    Inactive,
    Error,
    LoggedOut,
}

impl InstanceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::QrReady => "qr_ready",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Inactive => "inactive",
            Self::Error => "error",
            Self::LoggedOut => "logged_out",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "connecting" => Ok(Self::Connecting),
            "qr_ready" => Ok(Self::QrReady),
            "active" => Ok(Self::Active),
            "reconnecting" => Ok(Self::Reconnecting),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            "logged_out" => Ok(Self::LoggedOut),
            other => Err(Error::internal(format!("unknown instance status: {other}"))),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted instance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub phone: String,
    pub name: String,
    pub alias: Option<String>,
    pub status: InstanceStatus,
    /// Per-instance plugin override map (name → enabled).
    pub plugin_overrides: std::collections::HashMap<String, bool>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

// ── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            other => Err(Error::internal(format!(
                "unknown message direction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Other => "other",
        }
    }

    /// Unknown upstream kinds collapse to [`MessageKind::Other`].
    #[must_use]
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" => Self::Document,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Received,
}

impl MessageStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Received => "received",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            "received" => Ok(Self::Received),
            other => Err(Error::internal(format!("unknown message status: {other}"))),
        }
    }
}

/// A persisted message row. `content` is the sanitised JSON envelope: text
/// body, push name, upstream message id, upstream timestamp, raw envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub instance_id: String,
    pub direction: MessageDirection,
    pub from_jid: String,
    pub to_jid: String,
    pub kind: MessageKind,
    pub content: serde_json::Value,
    pub status: MessageStatus,
    pub sent_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

/// Listing filter for messages of one instance.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub direction: Option<MessageDirection>,
    pub limit: Option<i64>,
}

/// Per-instance message counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageStats {
    pub incoming: i64,
    pub outgoing: i64,
    pub by_status: Vec<(String, i64)>,
}

// ── Webhook subscription ────────────────────────────────────────────────────

/// A persisted webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: String,
    pub instance_id: String,
    pub webhook_type: String,
    pub event: String,
    pub url: String,
    pub enabled: bool,
    pub created_at_ms: i64,
}

// ── Webhook delivery history ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl HistoryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(Error::internal(format!("unknown history status: {other}"))),
        }
    }
}

/// An immutable record of one webhook delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookHistoryRecord {
    pub id: String,
    pub instance_id: String,
    pub webhook_id: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub status: HistoryStatus,
    pub http_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    /// Response headers as a JSON object; absent when no response arrived.
    pub response_headers: Option<serde_json::Value>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub triggered_at_ms: i64,
    pub completed_at_ms: Option<i64>,
}

/// Listing filter for delivery history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub instance_id: Option<String>,
    pub webhook_id: Option<String>,
    pub status: Option<HistoryStatus>,
    pub event: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<i64>,
}

/// Aggregate delivery statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub by_event: Vec<(String, i64)>,
    pub by_status: Vec<(String, i64)>,
    pub avg_response_time_ms: Option<f64>,
}

// ── Instance log ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::internal(format!("unknown log level: {other}"))),
        }
    }
}

/// One append-only per-instance log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLogRecord {
    pub id: i64,
    pub instance_id: String,
    pub level: LogLevel,
    pub message: String,
    pub created_at_ms: i64,
}
