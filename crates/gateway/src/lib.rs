//! HTTP control plane over the instance manager.
//!
//! Thin request/response layer: routes decode input, call manager or store
//! methods, and wrap the result in the `{success, data | error, message}`
//! envelope. No business logic lives here.

pub mod envelope;
pub mod instances;
pub mod plugins;
pub mod send;
pub mod server;
pub mod webhooks;

use std::sync::Arc;

use {
    wagate_common::Error,
    wagate_config::GatewayConfig,
    wagate_instance::InstanceManager,
    wagate_plugins::PluginRegistry,
    wagate_storage::{
        InstanceLogStore, InstanceStore, MessageStore, WebhookHistoryStore, WebhookStore,
        retention::RetentionSweeper, types::InstanceRecord,
    },
};

use envelope::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<InstanceManager>,
    pub registry: Arc<PluginRegistry>,
    pub instances: Arc<dyn InstanceStore>,
    pub messages: Arc<dyn MessageStore>,
    pub logs: Arc<dyn InstanceLogStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub history: Arc<dyn WebhookHistoryStore>,
    pub sweeper: Arc<RetentionSweeper>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Persisted record for a phone, or 404.
    pub(crate) async fn record(&self, phone: &str) -> Result<InstanceRecord, ApiError> {
        let digits = wagate_transport::jid::normalize_phone(phone);
        self.instances
            .find_by_phone(&digits)
            .await?
            .ok_or_else(|| Error::not_found(format!("instance {phone}")).into())
    }
}
