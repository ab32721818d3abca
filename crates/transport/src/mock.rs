//! In-memory transport for lifecycle and pipeline tests.
//!
//! A [`MockTransportFactory`] hands out scriptable sessions: tests push
//! [`TransportEvent`]s through the handle returned by [`MockTransportFactory::handle`]
//! and inspect the sends recorded by the session.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    wagate_common::{Error, Result},
};

use crate::{
    traits::{ChatTransport, TransportFactory},
    types::{BoundUser, GroupMetadata, MediaPayload, SendReceipt, TransportEvent},
};

/// A text or media send recorded by a mock session.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub jid: String,
    pub text: Option<String>,
    pub media: Option<MediaPayload>,
}

/// One scriptable in-memory session.
pub struct MockTransport {
    phone: String,
    events: mpsc::Sender<TransportEvent>,
    user: Mutex<Option<BoundUser>>,
    sends: Mutex<Vec<RecordedSend>>,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    fail_sends: AtomicBool,
    fail_group_queries: AtomicBool,
    group_queries: AtomicU32,
    logged_out: AtomicBool,
    closed: AtomicBool,
    counter: AtomicU32,
}

impl MockTransport {
    fn new(phone: &str, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            phone: phone.to_string(),
            events,
            user: Mutex::new(None),
            sends: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            fail_sends: AtomicBool::new(false),
            fail_group_queries: AtomicBool::new(false),
            group_queries: AtomicU32::new(0),
            logged_out: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counter: AtomicU32::new(0),
        }
    }

    pub fn set_user(&self, user: BoundUser) {
        *self.user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_group_queries(&self, fail: bool) {
        self.fail_group_queries.store(fail, Ordering::SeqCst);
    }

    pub fn put_group(&self, metadata: GroupMetadata) {
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups.insert(metadata.jid.clone(), metadata);
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn group_query_count(&self) -> u32 {
        self.group_queries.load(Ordering::SeqCst)
    }

    pub fn was_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, send: RecordedSend) -> Result<SendReceipt> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::upstream("mock send failure"));
        }
        let mut sends = self.sends.lock().unwrap_or_else(|e| e.into_inner());
        sends.push(send);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            message_id: format!("mock-{}-{n}", self.phone),
        })
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn user(&self) -> Option<BoundUser> {
        self.user.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<SendReceipt> {
        self.record(RecordedSend {
            jid: jid.to_string(),
            text: Some(text.to_string()),
            media: None,
        })
    }

    async fn send_media(&self, jid: &str, media: &MediaPayload) -> Result<SendReceipt> {
        self.record(RecordedSend {
            jid: jid.to_string(),
            text: None,
            media: Some(media.clone()),
        })
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        self.group_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_group_queries.load(Ordering::SeqCst) {
            return Err(Error::upstream("mock group query failure"));
        }
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups
            .get(jid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("group {jid}")))
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Closed {
                reason: crate::types::CloseReason::logged_out("logged out by gateway"),
            })
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Closed {
                reason: crate::types::CloseReason::dropped(None, "closed by gateway"),
            })
            .await;
        Ok(())
    }
}

/// A live mock session handle: the transport plus the event sender feeding
/// its instance.
#[derive(Clone)]
pub struct MockHandle {
    pub transport: Arc<MockTransport>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl MockHandle {
    /// Push one event into the instance's stream.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Factory producing mock sessions, one per connect call.
#[derive(Default)]
pub struct MockTransportFactory {
    handles: Mutex<HashMap<String, MockHandle>>,
    scripts: Mutex<HashMap<String, Vec<TransportEvent>>>,
    connects: Mutex<HashMap<String, u32>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events replayed automatically on every future connect for `phone`.
    pub fn script(&self, phone: &str, events: Vec<TransportEvent>) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.insert(phone.to_string(), events);
    }

    /// Handle for the most recent session opened for `phone`.
    pub fn handle(&self, phone: &str) -> Option<MockHandle> {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.get(phone).cloned()
    }

    /// How many times `phone` has connected.
    pub fn connect_count(&self, phone: &str) -> u32 {
        let connects = self.connects.lock().unwrap_or_else(|e| e.into_inner());
        connects.get(phone).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(
        &self,
        phone: &str,
        auth_dir: &Path,
    ) -> Result<(Arc<dyn ChatTransport>, mpsc::Receiver<TransportEvent>)> {
        std::fs::create_dir_all(auth_dir)
            .map_err(|e| Error::internal(format!("create auth dir: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let transport = Arc::new(MockTransport::new(phone, event_tx.clone()));

        {
            let mut connects = self.connects.lock().unwrap_or_else(|e| e.into_inner());
            *connects.entry(phone.to_string()).or_insert(0) += 1;
        }
        {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.insert(phone.to_string(), MockHandle {
                transport: Arc::clone(&transport),
                events: event_tx.clone(),
            });
        }

        let script = {
            let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            scripts.get(phone).cloned()
        };
        if let Some(events) = script {
            let tx = event_tx.clone();
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok((transport, event_rx))
    }
}
