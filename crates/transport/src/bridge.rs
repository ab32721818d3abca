//! Production transport adapter: JSON frames over a WebSocket to the
//! upstream protocol bridge.
//!
//! The bridge process owns the actual wire protocol; this adapter opens one
//! socket per instance, translates bridge frames into [`TransportEvent`]s,
//! and correlates send/query responses by request id.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, RwLock as StdRwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    wagate_common::{Error, Result, sanitize::RawValue},
};

use crate::{
    classify::{UpstreamErrorClass, classify_upstream_error},
    traits::{ChatTransport, TransportFactory},
    types::{
        BoundUser, CloseReason, GroupMetadata, GroupParticipantsAction, GroupParticipantsUpdate,
        InboundEnvelope, MediaPayload, SendReceipt, TransportEvent,
    },
};

const CONNECT_RETRIES: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

// ── Wire frames ─────────────────────────────────────────────────────────────

/// Commands sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Login {
        phone: &'a str,
        auth_dir: String,
    },
    SendText {
        request_id: &'a str,
        jid: &'a str,
        text: &'a str,
    },
    SendMedia {
        request_id: &'a str,
        jid: &'a str,
        media: &'a MediaPayload,
    },
    GroupMetadata {
        request_id: &'a str,
        jid: &'a str,
    },
    Logout,
    Close,
}

/// One inbound message as framed by the bridge.
#[derive(Debug, Deserialize)]
struct BridgeInbound {
    id: String,
    chat_jid: String,
    sender_jid: String,
    push_name: Option<String>,
    kind: String,
    text: Option<String>,
    timestamp_ms: i64,
    #[serde(default)]
    from_self: bool,
    #[serde(default)]
    raw: serde_json::Value,
}

/// Frames received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BridgeFrame {
    Qr {
        code: String,
    },
    Connecting,
    Open {
        user_id: String,
        user_name: Option<String>,
    },
    CredentialsUpdate,
    Messages {
        batch: Vec<BridgeInbound>,
    },
    GroupParticipants {
        group_jid: String,
        action: GroupParticipantsAction,
        participants: Vec<String>,
    },
    Closed {
        code: Option<u32>,
        #[serde(default)]
        logged_out: bool,
        #[serde(default)]
        detail: String,
    },
    SendResult {
        request_id: String,
        success: bool,
        message_id: Option<String>,
        error: Option<String>,
    },
    GroupMetadataResult {
        request_id: String,
        metadata: Option<GroupMetadata>,
        error: Option<String>,
    },
    UpstreamError {
        message: String,
    },
}

// ── Connector (factory) ─────────────────────────────────────────────────────

/// Opens one bridge socket per instance.
pub struct BridgeConnector {
    url: String,
    group_query_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, group_query_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            group_query_timeout,
        }
    }
}

#[async_trait]
impl TransportFactory for BridgeConnector {
    async fn connect(
        &self,
        phone: &str,
        auth_dir: &Path,
    ) -> Result<(Arc<dyn ChatTransport>, mpsc::Receiver<TransportEvent>)> {
        std::fs::create_dir_all(auth_dir)
            .map_err(|e| Error::internal(format!("create auth dir: {e}")))?;

        let stream = connect_with_retry(&self.url, CONNECT_RETRIES).await?;
        let (mut sink, source) = stream.split();

        let (command_tx, mut command_rx) = mpsc::channel::<String>(EVENT_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // Writer task: owns the sink.
        tokio::spawn(async move {
            while let Some(frame) = command_rx.recv().await {
                if let Err(e) = sink.send(Message::text(frame)).await {
                    warn!(error = %e, "bridge socket write failed");
                    break;
                }
            }
        });

        let transport = Arc::new(BridgeTransport {
            phone: phone.to_string(),
            command_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            user: Arc::new(StdRwLock::new(None)),
            group_query_timeout: self.group_query_timeout,
        });

        transport
            .send_command(&BridgeCommand::Login {
                phone,
                auth_dir: auth_dir.to_string_lossy().into_owned(),
            })
            .await?;

        spawn_read_loop(Arc::clone(&transport), source, event_tx);
        info!(%phone, "bridge session opened");

        Ok((transport, event_rx))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_with_retry(url: &str, retries: u32) -> Result<WsStream> {
    let mut last_error = String::new();
    for attempt in 0..retries {
        match connect_async(url).await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) => {
                last_error = e.to_string();
                debug!(url, attempt, error = %last_error, "bridge connect failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
        }
    }
    Err(Error::upstream(format!(
        "bridge unreachable at {url}: {last_error}"
    )))
}

// ── Transport handle ────────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeFrame>>>>;

/// Live bridge-backed session.
pub struct BridgeTransport {
    phone: String,
    command_tx: mpsc::Sender<String>,
    pending: PendingMap,
    user: Arc<StdRwLock<Option<BoundUser>>>,
    group_query_timeout: Duration,
}

impl BridgeTransport {
    async fn send_command(&self, command: &BridgeCommand<'_>) -> Result<()> {
        let frame = serde_json::to_string(command)?;
        self.command_tx
            .send(frame)
            .await
            .map_err(|_| Error::upstream("bridge socket is closed"))
    }

    /// Register a waiter, send the command, and await the correlated reply.
    async fn request(
        &self,
        request_id: String,
        command: BridgeCommand<'_>,
        timeout: Duration,
        operation: &str,
    ) -> Result<BridgeFrame> {
        let (tx, rx) = oneshot::channel();
        self.pending_insert(request_id.clone(), tx);
        if let Err(e) = self.send_command(&command).await {
            self.pending_remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => {
                self.pending_remove(&request_id);
                Err(Error::upstream("bridge dropped the reply channel"))
            },
            Err(_) => {
                self.pending_remove(&request_id);
                Err(Error::timeout(operation))
            },
        }
    }

    fn pending_insert(&self, request_id: String, tx: oneshot::Sender<BridgeFrame>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(request_id, tx);
    }

    fn pending_remove(&self, request_id: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(request_id);
    }
}

#[async_trait]
impl ChatTransport for BridgeTransport {
    fn user(&self) -> Option<BoundUser> {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<SendReceipt> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = self
            .request(
                request_id.clone(),
                BridgeCommand::SendText {
                    request_id: &request_id,
                    jid,
                    text,
                },
                SEND_TIMEOUT,
                "send text",
            )
            .await?;
        send_result(frame)
    }

    async fn send_media(&self, jid: &str, media: &MediaPayload) -> Result<SendReceipt> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = self
            .request(
                request_id.clone(),
                BridgeCommand::SendMedia {
                    request_id: &request_id,
                    jid,
                    media,
                },
                SEND_TIMEOUT,
                "send media",
            )
            .await?;
        send_result(frame)
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = self
            .request(
                request_id.clone(),
                BridgeCommand::GroupMetadata {
                    request_id: &request_id,
                    jid,
                },
                self.group_query_timeout,
                "group metadata query",
            )
            .await?;
        match frame {
            BridgeFrame::GroupMetadataResult {
                metadata: Some(metadata),
                ..
            } => Ok(metadata),
            BridgeFrame::GroupMetadataResult { error, .. } => Err(Error::upstream(
                error.unwrap_or_else(|| "group metadata unavailable".into()),
            )),
            other => Err(Error::upstream(format!(
                "unexpected bridge reply: {other:?}"
            ))),
        }
    }

    async fn logout(&self) -> Result<()> {
        self.send_command(&BridgeCommand::Logout).await
    }

    async fn close(&self) -> Result<()> {
        self.send_command(&BridgeCommand::Close).await
    }
}

fn send_result(frame: BridgeFrame) -> Result<SendReceipt> {
    match frame {
        BridgeFrame::SendResult {
            success: true,
            message_id: Some(message_id),
            ..
        } => Ok(SendReceipt { message_id }),
        BridgeFrame::SendResult { error, .. } => Err(Error::upstream(
            error.unwrap_or_else(|| "send rejected by upstream".into()),
        )),
        other => Err(Error::upstream(format!(
            "unexpected bridge reply: {other:?}"
        ))),
    }
}

// ── Read loop ───────────────────────────────────────────────────────────────

fn spawn_read_loop(
    transport: Arc<BridgeTransport>,
    mut source: futures::stream::SplitStream<WsStream>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    tokio::spawn(async move {
        let phone = transport.phone.clone();
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let frame: BridgeFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%phone, error = %e, "discarding malformed bridge frame");
                    continue;
                },
            };
            if let Some(event) = translate_frame(&transport, frame) {
                let is_close = matches!(event, TransportEvent::Closed { .. });
                if event_tx.send(event).await.is_err() || is_close {
                    break;
                }
            }
        }
        // Socket gone without a Closed frame: synthesise one so the state
        // machine observes the drop.
        let _ = event_tx
            .send(TransportEvent::Closed {
                reason: CloseReason::dropped(None, "bridge socket closed"),
            })
            .await;
        debug!(%phone, "bridge read loop ended");
    });
}

/// Map one bridge frame to a transport event, resolving request waiters
/// in place.
fn translate_frame(transport: &BridgeTransport, frame: BridgeFrame) -> Option<TransportEvent> {
    match frame {
        BridgeFrame::Qr { code } => Some(TransportEvent::Qr { code }),
        BridgeFrame::Connecting => Some(TransportEvent::Connecting),
        BridgeFrame::Open { user_id, user_name } => {
            let user = BoundUser {
                id: user_id,
                name: user_name,
            };
            *transport.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
            Some(TransportEvent::Open { user })
        },
        BridgeFrame::CredentialsUpdate => Some(TransportEvent::CredentialsUpdate),
        BridgeFrame::Messages { batch } => Some(TransportEvent::Messages {
            batch: batch
                .into_iter()
                .map(|m| InboundEnvelope {
                    id: m.id,
                    chat_jid: m.chat_jid,
                    sender_jid: m.sender_jid,
                    push_name: m.push_name,
                    kind: m.kind,
                    text: m.text,
                    timestamp_ms: m.timestamp_ms,
                    from_self: m.from_self,
                    raw: RawValue::from_upstream_json(&m.raw),
                })
                .collect(),
        }),
        BridgeFrame::GroupParticipants {
            group_jid,
            action,
            participants,
        } => Some(TransportEvent::GroupParticipants(GroupParticipantsUpdate {
            group_jid,
            action,
            participants,
        })),
        BridgeFrame::Closed {
            code,
            logged_out,
            detail,
        } => Some(TransportEvent::Closed {
            reason: CloseReason {
                code,
                logged_out,
                detail,
            },
        }),
        BridgeFrame::SendResult { ref request_id, .. }
        | BridgeFrame::GroupMetadataResult { ref request_id, .. } => {
            let request_id = request_id.clone();
            let waiter = {
                let mut pending = transport
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                pending.remove(&request_id)
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(frame);
                },
                None => {
                    debug!(%request_id, "bridge reply for unknown request");
                },
            }
            None
        },
        BridgeFrame::UpstreamError { message } => {
            match classify_upstream_error(&message) {
                UpstreamErrorClass::BenignMacRetry | UpstreamErrorClass::BenignStreamReset => {
                    debug!(phone = %transport.phone, %message, "benign upstream error")
                },
                UpstreamErrorClass::Fatal => {
                    warn!(phone = %transport.phone, %message, "upstream error")
                },
            }
            None
        },
    }
}
