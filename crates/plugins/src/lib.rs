//! Per-instance plugin system: a fixed registry of event handlers and a
//! per-instance chain controlling which of them run.

pub mod bundled;
pub mod chain;
pub mod event;
pub mod registry;

pub use {
    chain::{PluginChain, PluginStatus},
    event::{PluginApi, PluginEvent},
    registry::{PluginDescriptor, PluginHandler, PluginRegistry},
};
