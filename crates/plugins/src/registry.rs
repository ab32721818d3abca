//! Plugin registry: the process-wide handler set.
//!
//! The handler set is fixed at process start; [`PluginRegistry::reload`]
//! drops every handler and re-registers the builtin set, so a reload is
//! observable (welcome batches reset) without any runtime code loading.

use std::sync::{Arc, RwLock};

use {
    async_trait::async_trait,
    serde::Serialize,
    tracing::info,
    wagate_common::Result,
};

use crate::event::{PluginApi, PluginEvent};

/// One event handler.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// Stable plugin name, used as the override-map key.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the plugin author ships it enabled. New instances ignore
    /// this and start with every plugin disabled; the flag is surfaced to
    /// operators as a hint.
    fn default_enabled(&self) -> bool {
        false
    }

    /// Declared default configuration, merged into the envelope surfaced
    /// by the control API.
    fn default_config(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn handle(&self, event: &PluginEvent, api: Arc<dyn PluginApi>) -> Result<()>;
}

/// Listing entry for the control API.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub default_enabled: bool,
    pub default_config: serde_json::Value,
}

/// Process-wide handler set.
pub struct PluginRegistry {
    handlers: RwLock<Vec<Arc<dyn PluginHandler>>>,
}

impl PluginRegistry {
    /// Registry holding the builtin plugin set.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            handlers: RwLock::new(crate::bundled::builtin_handlers()),
        }
    }

    /// Empty registry, for tests that register their own handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn PluginHandler>) {
        info!(plugin = handler.name(), "plugin registered");
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(handler);
    }

    /// Drop every handler and re-register the builtin set.
    pub fn reload(&self) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let previous = handlers.len();
        *handlers = crate::bundled::builtin_handlers();
        info!(previous, current = handlers.len(), "plugin registry reloaded");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.iter().find(|h| h.name() == name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers
            .iter()
            .map(|h| PluginDescriptor {
                name: h.name().to_string(),
                description: h.description().to_string(),
                default_enabled: h.default_enabled(),
                default_config: h.default_config(),
            })
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn PluginHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.clone()
    }
}
