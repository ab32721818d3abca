//! Typed events and payloads exchanged with a chat transport.

use {
    serde::{Deserialize, Serialize},
    wagate_common::sanitize::RawValue,
};

/// Identity bound to a session after a successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundUser {
    /// Upstream user id (full JID).
    pub id: String,
    pub name: Option<String>,
}

/// Why a session closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseReason {
    /// Upstream status/close code, when the protocol supplied one.
    pub code: Option<u32>,
    /// True when the upstream service ended the session permanently.
    pub logged_out: bool,
    pub detail: String,
}

impl CloseReason {
    #[must_use]
    pub fn logged_out(detail: impl Into<String>) -> Self {
        Self {
            code: None,
            logged_out: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn dropped(code: Option<u32>, detail: impl Into<String>) -> Self {
        Self {
            code,
            logged_out: false,
            detail: detail.into(),
        }
    }
}

/// One inbound message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Upstream message id.
    pub id: String,
    /// Chat the message arrived in (user or group JID).
    pub chat_jid: String,
    /// Actual sender (differs from `chat_jid` in groups).
    pub sender_jid: String,
    pub push_name: Option<String>,
    /// Upstream message kind string; unknown kinds are kept verbatim.
    pub kind: String,
    pub text: Option<String>,
    /// Upstream send timestamp in unix milliseconds.
    pub timestamp_ms: i64,
    /// True for messages this session itself sent (echoes).
    pub from_self: bool,
    /// The raw upstream envelope, pre-sanitisation.
    pub raw: RawValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupParticipantsAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl GroupParticipantsAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Promote => "promote",
            Self::Demote => "demote",
        }
    }
}

/// A group membership change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipantsUpdate {
    pub group_jid: String,
    pub action: GroupParticipantsAction,
    pub participants: Vec<String>,
}

/// Events a connected session emits, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A login QR code was advertised.
    Qr { code: String },
    /// The transport is (re)establishing the upstream socket.
    Connecting,
    /// Session opened; identity is now bound.
    Open { user: BoundUser },
    /// Session keys changed; the credential blob was rewritten.
    CredentialsUpdate,
    /// A batch of inbound messages.
    Messages { batch: Vec<InboundEnvelope> },
    /// Group membership changed.
    GroupParticipants(GroupParticipantsUpdate),
    /// The session closed.
    Closed { reason: CloseReason },
}

/// Acknowledgement returned by a send operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// Outbound media descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    pub admin: bool,
}

/// Metadata for one group chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub jid: String,
    pub subject: String,
    pub participants: Vec<GroupParticipant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_parse_matches_wire_names() {
        assert_eq!(MediaKind::parse("image").ok(), Some(MediaKind::Image));
        assert_eq!(MediaKind::parse("document").ok(), Some(MediaKind::Document));
        assert!(MediaKind::parse("sticker").is_err());
    }

    #[test]
    fn media_payload_serialises_type_field() {
        let payload = MediaPayload {
            kind: MediaKind::Video,
            url: "https://example.com/v.mp4".into(),
            caption: None,
            filename: None,
        };
        let json = serde_json::to_value(&payload).unwrap_or_default();
        assert_eq!(json["type"], "video");
        assert!(json.get("caption").is_none());
    }
}
