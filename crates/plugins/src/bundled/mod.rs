//! Builtin plugins.

pub mod message_logger;
pub mod welcome;

use std::sync::Arc;

use crate::registry::PluginHandler;

/// The handler set registered at process start (and on reload).
pub fn builtin_handlers() -> Vec<Arc<dyn PluginHandler>> {
    vec![
        Arc::new(welcome::WelcomePlugin::new()),
        Arc::new(message_logger::MessageLoggerPlugin),
    ]
}
