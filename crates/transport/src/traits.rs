//! The transport trait family an instance consumes.

use std::{path::Path, sync::Arc};

use {async_trait::async_trait, tokio::sync::mpsc, wagate_common::Result};

use crate::types::{
    BoundUser, GroupMetadata, MediaPayload, SendReceipt, TransportEvent,
};

/// A live upstream session.
///
/// All operations are safe to call from the owning instance task; concurrent
/// sends from the same instance are permitted and are not serialised here.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Bound identity. `None` until the session has opened.
    fn user(&self) -> Option<BoundUser>;

    async fn send_text(&self, jid: &str, text: &str) -> Result<SendReceipt>;

    async fn send_media(&self, jid: &str, media: &MediaPayload) -> Result<SendReceipt>;

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata>;

    /// End the upstream session permanently, invalidating credentials.
    async fn logout(&self) -> Result<()>;

    /// Close the socket without logging out; credentials stay valid.
    async fn close(&self) -> Result<()>;
}

/// Opens transports. One factory serves every instance in the process.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a session for `phone` using the credential blob under
    /// `auth_dir`, creating the directory on first use. Events arrive on
    /// the returned receiver in upstream order.
    async fn connect(
        &self,
        phone: &str,
        auth_dir: &Path,
    ) -> Result<(Arc<dyn ChatTransport>, mpsc::Receiver<TransportEvent>)>;
}
