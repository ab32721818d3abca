//! Per-instance plugin chain.
//!
//! Holds the instance's override map (plugin name → enabled) and runs the
//! enabled subset concurrently for each event. Every plugin starts
//! disabled; only an explicit override turns one on. Handler failures are
//! logged and contained — the chain never propagates them to the caller.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    event::{PluginApi, PluginEvent},
    registry::PluginRegistry,
};

/// Effective state of one plugin for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub default_enabled: bool,
}

/// The enabled-plugin view of one instance.
pub struct PluginChain {
    phone: String,
    registry: Arc<PluginRegistry>,
    overrides: RwLock<HashMap<String, bool>>,
}

impl PluginChain {
    pub fn new(
        phone: impl Into<String>,
        registry: Arc<PluginRegistry>,
        overrides: HashMap<String, bool>,
    ) -> Self {
        Self {
            phone: phone.into(),
            registry,
            overrides: RwLock::new(overrides),
        }
    }

    /// Effective per-plugin status, registry order.
    pub fn status(&self) -> Vec<PluginStatus> {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        self.registry
            .descriptors()
            .into_iter()
            .map(|d| PluginStatus {
                enabled: overrides.get(&d.name).copied().unwrap_or(false),
                name: d.name,
                description: d.description,
                default_enabled: d.default_enabled,
            })
            .collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        overrides.get(name).copied().unwrap_or(false)
    }

    pub fn enable(&self, name: &str) {
        self.set(name, true);
    }

    pub fn disable(&self, name: &str) {
        self.set(name, false);
    }

    fn set(&self, name: &str, enabled: bool) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        overrides.insert(name.to_string(), enabled);
        info!(phone = %self.phone, plugin = name, enabled, "plugin override set");
    }

    /// Merge a partial override map.
    pub fn set_map(&self, partial: &HashMap<String, bool>) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        for (name, enabled) in partial {
            overrides.insert(name.clone(), *enabled);
        }
    }

    /// Replace the override map with the latest persisted value, logging
    /// the differences.
    pub fn sync_from(&self, persisted: HashMap<String, bool>) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        for (name, enabled) in &persisted {
            let before = overrides.get(name).copied().unwrap_or(false);
            if before != *enabled {
                info!(
                    phone = %self.phone,
                    plugin = %name,
                    from = before,
                    to = enabled,
                    "plugin override changed by sync"
                );
            }
        }
        for name in overrides.keys() {
            if !persisted.contains_key(name) && overrides.get(name) == Some(&true) {
                info!(phone = %self.phone, plugin = %name, "plugin override dropped by sync");
            }
        }
        *overrides = persisted;
    }

    /// Snapshot of the override map, for persistence.
    pub fn overrides(&self) -> HashMap<String, bool> {
        self.overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run every enabled plugin concurrently and wait for all of them to
    /// settle. Failures are logged with the plugin name and phone.
    pub async fn dispatch(&self, event: &PluginEvent, api: Arc<dyn PluginApi>) {
        let enabled: Vec<_> = {
            let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
            self.registry
                .snapshot()
                .into_iter()
                .filter(|h| overrides.get(h.name()).copied().unwrap_or(false))
                .collect()
        };
        if enabled.is_empty() {
            return;
        }
        debug!(phone = %self.phone, count = enabled.len(), "dispatching plugin chain");

        let futures = enabled.into_iter().map(|handler| {
            let api = Arc::clone(&api);
            let phone = self.phone.clone();
            async move {
                if let Err(e) = handler.handle(event, api).await {
                    warn!(phone = %phone, plugin = handler.name(), error = %e, "plugin failed");
                }
            }
        });
        futures::future::join_all(futures).await;
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use {async_trait::async_trait, wagate_common::Result};

    use {
        super::*,
        crate::registry::PluginHandler,
    };

    struct CountingPlugin {
        plugin_name: &'static str,
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl PluginHandler for CountingPlugin {
        fn name(&self) -> &str {
            self.plugin_name
        }

        fn description(&self) -> &str {
            "counts invocations"
        }

        async fn handle(&self, _event: &PluginEvent, _api: Arc<dyn PluginApi>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(wagate_common::Error::internal("boom"));
            }
            Ok(())
        }
    }

    struct NoopApi;

    #[async_trait]
    impl PluginApi for NoopApi {
        fn phone(&self) -> &str {
            "628111"
        }

        async fn send_text(&self, _to: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn event() -> PluginEvent {
        PluginEvent::GroupParticipants {
            phone: "628111".into(),
            update: wagate_transport::GroupParticipantsUpdate {
                group_jid: "g@g.us".into(),
                action: wagate_transport::GroupParticipantsAction::Add,
                participants: vec!["a@s.whatsapp.net".into()],
            },
        }
    }

    fn registry_with(handlers: Vec<Arc<dyn PluginHandler>>) -> Arc<PluginRegistry> {
        let registry = PluginRegistry::empty();
        for handler in handlers {
            registry.register(handler);
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn disabled_by_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = registry_with(vec![Arc::new(CountingPlugin {
            plugin_name: "counter",
            calls: Arc::clone(&calls),
            fail: false,
        })]);
        let chain = PluginChain::new("628111", registry, HashMap::new());

        chain.dispatch(&event(), Arc::new(NoopApi)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enabled_plugins_run_and_failures_are_contained() {
        let ok_calls = Arc::new(AtomicU32::new(0));
        let bad_calls = Arc::new(AtomicU32::new(0));
        let registry = registry_with(vec![
            Arc::new(CountingPlugin {
                plugin_name: "bad",
                calls: Arc::clone(&bad_calls),
                fail: true,
            }),
            Arc::new(CountingPlugin {
                plugin_name: "good",
                calls: Arc::clone(&ok_calls),
                fail: false,
            }),
        ]);
        let chain = PluginChain::new("628111", registry, HashMap::new());
        chain.enable("bad");
        chain.enable("good");

        // Must not panic or error out even though "bad" fails.
        chain.dispatch(&event(), Arc::new(NoopApi)).await;
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sync_replaces_overrides() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = registry_with(vec![Arc::new(CountingPlugin {
            plugin_name: "counter",
            calls: Arc::clone(&calls),
            fail: false,
        })]);
        let chain = PluginChain::new("628111", registry, HashMap::new());
        chain.enable("counter");

        chain.sync_from(HashMap::new());
        assert!(!chain.is_enabled("counter"));

        chain.sync_from(HashMap::from([("counter".to_string(), true)]));
        assert!(chain.is_enabled("counter"));
    }

    #[tokio::test]
    async fn set_map_merges_partial() {
        let registry = registry_with(vec![]);
        let chain = PluginChain::new(
            "628111",
            registry,
            HashMap::from([("a".to_string(), true)]),
        );
        chain.set_map(&HashMap::from([("b".to_string(), true)]));
        assert!(chain.is_enabled("a"));
        assert!(chain.is_enabled("b"));
    }
}
