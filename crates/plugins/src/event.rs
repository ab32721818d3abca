//! The typed envelope plugins receive and the capabilities they get back.

use {
    async_trait::async_trait,
    wagate_common::Result,
    wagate_storage::types::MessageRecord,
    wagate_transport::GroupParticipantsUpdate,
};

/// One event flowing through an instance's plugin chain.
#[derive(Debug, Clone)]
pub enum PluginEvent {
    /// An inbound message, already persisted.
    MessageReceived {
        phone: String,
        message: MessageRecord,
    },
    /// A group membership change (not persisted as a message).
    GroupParticipants {
        phone: String,
        update: GroupParticipantsUpdate,
    },
}

impl PluginEvent {
    /// The owning instance's phone.
    #[must_use]
    pub fn phone(&self) -> &str {
        match self {
            Self::MessageReceived { phone, .. } | Self::GroupParticipants { phone, .. } => phone,
        }
    }
}

/// What a plugin may do to the owning instance.
///
/// Implemented by the instance itself; sends issued here flow through the
/// normal outbound pipeline (persistence, webhook fan-out, logs).
#[async_trait]
pub trait PluginApi: Send + Sync {
    fn phone(&self) -> &str;

    async fn send_text(&self, to: &str, text: &str) -> Result<()>;
}
