//! Event names the gateway emits.

/// Connection lifecycle changes, with a sub-status in the payload.
pub const CONNECTION_UPDATE: &str = "connection.update";

/// An inbound message finished the ingestion pipeline.
pub const MESSAGE_RECEIVED: &str = "message.received";

/// An outbound message was acknowledged by the upstream service.
pub const MESSAGE_SENT: &str = "message.sent";

/// All emitted event names, for API validation.
pub const ALL: &[&str] = &[CONNECTION_UPDATE, MESSAGE_RECEIVED, MESSAGE_SENT];
