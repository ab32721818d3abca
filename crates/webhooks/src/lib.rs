//! Outbound webhook fan-out with per-attempt delivery history.

pub mod dispatcher;
pub mod events;

pub use {
    dispatcher::{AttemptOutcome, DispatcherOptions, WebhookDispatcher},
    events::{CONNECTION_UPDATE, MESSAGE_RECEIVED, MESSAGE_SENT},
};
