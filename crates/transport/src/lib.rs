//! Chat transport abstraction.
//!
//! An instance talks to the upstream chat service only through the
//! [`ChatTransport`] trait and the typed [`TransportEvent`] stream a
//! [`TransportFactory`] hands it on connect. The production adapter
//! ([`bridge`]) speaks JSON frames over a WebSocket to the external
//! protocol bridge; [`mock`] is a scriptable in-memory implementation for
//! lifecycle tests.

pub mod bridge;
pub mod classify;
pub mod jid;
pub mod mock;
pub mod traits;
pub mod types;

pub use {
    classify::{UpstreamErrorClass, classify_upstream_error},
    traits::{ChatTransport, TransportFactory},
    types::{
        BoundUser, CloseReason, GroupMetadata, GroupParticipant, GroupParticipantsAction,
        GroupParticipantsUpdate, InboundEnvelope, MediaKind, MediaPayload, SendReceipt,
        TransportEvent,
    },
};
