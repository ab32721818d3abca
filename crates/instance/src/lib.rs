//! The instance core: one supervised WhatsApp session per phone number and
//! the process-wide manager that creates, restores, restarts, and tears
//! them down.

pub mod instance;
pub mod manager;
pub mod snapshot;

pub use {
    instance::{Instance, InstanceDeps},
    manager::{InstanceManager, ManagerStatus},
    snapshot::InstanceSnapshot,
};
