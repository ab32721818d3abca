//! `message-logger` plugin: traces inbound message metadata.

use std::sync::Arc;

use {async_trait::async_trait, tracing::info, wagate_common::Result};

use crate::{
    event::{PluginApi, PluginEvent},
    registry::PluginHandler,
};

/// Logs every inbound message the chain sees.
pub struct MessageLoggerPlugin;

#[async_trait]
impl PluginHandler for MessageLoggerPlugin {
    fn name(&self) -> &str {
        "message-logger"
    }

    fn description(&self) -> &str {
        "Logs inbound message metadata for debugging"
    }

    fn default_enabled(&self) -> bool {
        true
    }

    async fn handle(&self, event: &PluginEvent, _api: Arc<dyn PluginApi>) -> Result<()> {
        if let PluginEvent::MessageReceived { phone, message } = event {
            info!(
                %phone,
                from = %message.from_jid,
                kind = message.kind.as_str(),
                message_id = %message.id,
                "inbound message"
            );
        }
        Ok(())
    }
}
