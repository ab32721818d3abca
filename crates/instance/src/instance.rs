//! One supervised session: connection state machine, inbound/outbound
//! pipelines, plugin chain, webhook fan-out, group metadata cache.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex as StdMutex, RwLock as StdRwLock,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio::sync::{Mutex, RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wagate_common::{Error, Result, sanitize::safe_serialize, unix_now_ms},
};

use {
    wagate_config::GatewayConfig,
    wagate_plugins::{PluginApi, PluginChain, PluginEvent, PluginRegistry},
    wagate_storage::{
        InstanceLogStore, InstanceStore, MessageStore,
        retention::remove_credentials,
        types::{
            InstanceRecord, InstanceStatus, LogLevel, MessageDirection, MessageKind,
            MessageRecord, MessageStatus,
        },
    },
    wagate_transport::{
        BoundUser, ChatTransport, CloseReason, GroupMetadata, GroupParticipantsUpdate,
        InboundEnvelope, MediaPayload, TransportEvent, TransportFactory, jid,
    },
    wagate_webhooks::{CONNECTION_UPDATE, MESSAGE_RECEIVED, MESSAGE_SENT, WebhookDispatcher},
};

use crate::snapshot::InstanceSnapshot;

/// Shared services an instance needs. One bundle serves every instance.
#[derive(Clone)]
pub struct InstanceDeps {
    pub instances: Arc<dyn InstanceStore>,
    pub messages: Arc<dyn MessageStore>,
    pub logs: Arc<dyn InstanceLogStore>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub registry: Arc<PluginRegistry>,
    pub factory: Arc<dyn TransportFactory>,
    pub config: Arc<GatewayConfig>,
}

struct Profile {
    name: String,
    alias: Option<String>,
}

/// One tenant session.
pub struct Instance {
    id: String,
    phone: String,
    created_at_ms: i64,
    profile: StdRwLock<Profile>,
    status: StdRwLock<InstanceStatus>,
    qr: StdRwLock<Option<String>>,
    user: StdRwLock<Option<BoundUser>>,
    reconnect_attempts: AtomicU32,
    /// Single-shot: set by restart, cleared on the first close after it.
    manual_restart: AtomicBool,
    transport: RwLock<Option<Arc<dyn ChatTransport>>>,
    chain: PluginChain,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    /// Token owning the current event loop; replaced on every start.
    cancel: StdMutex<CancellationToken>,
    deps: InstanceDeps,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("phone", &self.phone)
            .finish()
    }
}

impl Instance {
    pub fn from_record(record: &InstanceRecord, deps: InstanceDeps) -> Arc<Self> {
        let chain = PluginChain::new(
            record.phone.clone(),
            Arc::clone(&deps.registry),
            record.plugin_overrides.clone(),
        );
        Arc::new(Self {
            id: record.id.clone(),
            phone: record.phone.clone(),
            created_at_ms: record.created_at_ms,
            profile: StdRwLock::new(Profile {
                name: record.name.clone(),
                alias: record.alias.clone(),
            }),
            status: StdRwLock::new(InstanceStatus::Pending),
            qr: StdRwLock::new(None),
            user: StdRwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            manual_restart: AtomicBool::new(false),
            transport: RwLock::new(None),
            chain,
            groups: Mutex::new(HashMap::new()),
            cancel: StdMutex::new(CancellationToken::new()),
            deps,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn chain(&self) -> &PluginChain {
        &self.chain
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn qr_code(&self) -> Option<String> {
        self.qr.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let profile = self.profile.read().unwrap_or_else(|e| e.into_inner());
        let status = self.status();
        InstanceSnapshot {
            id: self.id.clone(),
            phone: self.phone.clone(),
            name: profile.name.clone(),
            alias: profile.alias.clone(),
            status: status.as_str().to_string(),
            is_connected: status == InstanceStatus::Active,
            qr_code: self.qr_code(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            user_id: self
                .user
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(|u| u.id.clone()),
            created_at_ms: self.created_at_ms,
        }
    }

    /// Mirror a profile patch from the store into memory.
    pub fn set_profile(&self, name: Option<&str>, alias: Option<&str>) {
        let mut profile = self.profile.write().unwrap_or_else(|e| e.into_inner());
        if let Some(name) = name {
            profile.name = name.to_string();
        }
        if let Some(alias) = alias {
            profile.alias = Some(alias.to_string());
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Open the transport and run the event loop until the session closes.
    pub fn start<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let token = {
                let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
                guard.cancel();
                let token = CancellationToken::new();
                *guard = token.clone();
                token
            };

            self.transition(InstanceStatus::Connecting, InstanceStatus::Connecting)
                .await;
            let auth_dir = self.deps.config.auth_dir_for(&self.phone);

            match self.deps.factory.connect(&self.phone, &auth_dir).await {
                Ok((transport, events)) => {
                    *self.transport.write().await = Some(transport);
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.run_event_loop(events, token).await;
                    });
                    Ok(())
                },
                Err(e) => {
                    self.log(LogLevel::Error, &format!("failed to open transport: {e}"))
                        .await;
                    self.transition(InstanceStatus::Error, InstanceStatus::Error)
                        .await;
                    Err(e)
                },
            }
        })
    }

    /// Mark the next close as operator-initiated. Single-shot: the first
    /// close observed after this clears the mark.
    pub fn mark_manual_restart(&self) {
        self.manual_restart.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    /// Manual restart: close without logging out, wait for the session to
    /// settle, then reconnect with the credentials intact.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        info!(phone = %self.phone, "manual restart requested");
        self.mark_manual_restart();

        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!(phone = %self.phone, error = %e, "close during restart failed");
            }
        }
        tokio::time::sleep(self.deps.config.restart_quiesce()).await;
        self.start().await
    }

    /// Tear the session down: cancel the event loop, optionally log out
    /// upstream, close the socket, and (on logout) delete credentials.
    pub async fn shutdown(&self, logout: bool) {
        {
            let guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            guard.cancel();
        }
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            if logout && let Err(e) = transport.logout().await {
                debug!(phone = %self.phone, error = %e, "logout failed");
            }
            if let Err(e) = transport.close().await {
                debug!(phone = %self.phone, error = %e, "close failed");
            }
        }
        *self.qr.write().unwrap_or_else(|e| e.into_inner()) = None;
        if logout {
            remove_credentials(&self.deps.config.auth_root, &self.phone);
        }
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = InstanceStatus::LoggedOut;
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        // Stream ended without a close frame.
                        self.handle_close(CloseReason::dropped(
                            None,
                            "transport stream ended",
                        ))
                        .await;
                        break;
                    },
                },
            };
            match event {
                TransportEvent::Closed { reason } => {
                    self.handle_close(reason).await;
                    break;
                },
                other => self.handle_event(other).await,
            }
        }
        debug!(phone = %self.phone, "event loop ended");
    }

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Qr { code } => {
                debug!(phone = %self.phone, "QR advertised");
                *self.qr.write().unwrap_or_else(|e| e.into_inner()) = Some(code.clone());
                self.transition(InstanceStatus::QrReady, InstanceStatus::QrReady)
                    .await;
                self.emit_connection_update("qr_ready", json!({ "qr": code }))
                    .await;
            },
            TransportEvent::Connecting => {
                self.transition(InstanceStatus::Connecting, InstanceStatus::Connecting)
                    .await;
                self.emit_connection_update("connecting", json!({})).await;
            },
            TransportEvent::Open { user } => {
                info!(phone = %self.phone, user_id = %user.id, "session open");
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                *self.qr.write().unwrap_or_else(|e| e.into_inner()) = None;
                *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
                self.transition(InstanceStatus::Active, InstanceStatus::Active)
                    .await;
                self.emit_connection_update("connected", json!({ "user": user.id }))
                    .await;
            },
            TransportEvent::CredentialsUpdate => {
                debug!(phone = %self.phone, "credentials updated");
            },
            TransportEvent::Messages { batch } => {
                for envelope in batch {
                    if envelope.from_self {
                        // Echoes of our own sends never enter the pipeline.
                        continue;
                    }
                    self.ingest(envelope).await;
                }
            },
            TransportEvent::GroupParticipants(update) => {
                self.group_participants(update).await;
            },
            TransportEvent::Closed { .. } => {
                // Handled by the event loop before reaching here.
            },
        }
    }

    /// Close handling: logout, manual restart, bounded reconnection, or
    /// giving up — in that order.
    async fn handle_close(self: &Arc<Self>, reason: CloseReason) {
        let manual = self.manual_restart.swap(false, Ordering::SeqCst);
        let transient = reason
            .code
            .is_some_and(|code| self.deps.config.transient_close_codes.contains(&code));
        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        let max_attempts = self.deps.config.reconnect.max_attempts;
        info!(
            phone = %self.phone,
            code = reason.code,
            logged_out = reason.logged_out,
            manual,
            transient,
            attempts,
            detail = %reason.detail,
            "session closed"
        );

        if reason.logged_out {
            self.soft_clean().await;
            self.emit_connection_update("logged_out", json!({ "reason": reason.detail }))
                .await;
            return;
        }

        // A transient close code overrides the manual-restart flag so a
        // stream reset during QR scan still reconnects.
        if manual && !transient {
            self.transport.write().await.take();
            self.transition(InstanceStatus::Inactive, InstanceStatus::Inactive)
                .await;
            self.emit_connection_update("manual_restart", json!({})).await;
            return;
        }

        if attempts < max_attempts {
            let attempt = attempts + 1;
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);
            self.transition(InstanceStatus::Reconnecting, InstanceStatus::Reconnecting)
                .await;
            self.emit_connection_update("reconnecting", json!({ "attempt": attempt }))
                .await;

            let this = Arc::clone(self);
            let token = {
                let guard = this.cancel.lock().unwrap_or_else(|e| e.into_inner());
                guard.clone()
            };
            let delay = self.deps.config.reconnect.delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if token.is_cancelled() {
                    return;
                }
                if let Err(e) = this.start().await {
                    warn!(phone = %this.phone, error = %e, "reconnect attempt failed");
                }
            });
            return;
        }

        self.log(
            LogLevel::Warn,
            &format!("giving up after {attempts} reconnection attempts"),
        )
        .await;
        self.soft_clean().await;
        self.emit_connection_update("logged_out", json!({ "reason": "reconnect limit" }))
            .await;
    }

    /// Soft-clean: drop runtime handles and credential bytes, keep the row.
    async fn soft_clean(&self) {
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!(phone = %self.phone, error = %e, "close during soft-clean failed");
            }
        }
        *self.qr.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        remove_credentials(&self.deps.config.auth_root, &self.phone);
        self.transition(InstanceStatus::LoggedOut, InstanceStatus::Inactive)
            .await;
    }

    // ── Inbound pipeline ────────────────────────────────────────────────────

    /// Persist → plugin chain → webhook fan-out. A failing stage is logged
    /// and the rest still run.
    async fn ingest(self: &Arc<Self>, envelope: InboundEnvelope) {
        let record = self.build_incoming_record(&envelope);

        if let Err(e) = self.deps.messages.create(&record).await {
            warn!(phone = %self.phone, error = %e, "failed to persist inbound message");
            self.log(LogLevel::Error, &format!("message persistence failed: {e}"))
                .await;
        }

        let event = PluginEvent::MessageReceived {
            phone: self.phone.clone(),
            message: record.clone(),
        };
        let api: Arc<dyn PluginApi> = Arc::clone(self) as Arc<dyn PluginApi>;
        self.chain.dispatch(&event, api).await;

        let data = serde_json::to_value(&record).unwrap_or_else(|_| json!({ "id": record.id }));
        if let Err(e) = self
            .deps
            .dispatcher
            .dispatch(&self.id, MESSAGE_RECEIVED, data)
            .await
        {
            warn!(phone = %self.phone, error = %e, "message.received fan-out failed");
        }
    }

    fn build_incoming_record(&self, envelope: &InboundEnvelope) -> MessageRecord {
        let raw = safe_serialize(&envelope.raw);
        let to_jid = self
            .user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|u| u.id.clone())
            .unwrap_or_else(|| self.phone.clone());
        MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: self.id.clone(),
            direction: MessageDirection::Incoming,
            from_jid: envelope.sender_jid.clone(),
            to_jid,
            kind: MessageKind::parse_lossy(&envelope.kind),
            content: json!({
                "text": envelope.text,
                "pushName": envelope.push_name,
                "chatJid": envelope.chat_jid,
                "upstreamId": envelope.id,
                "upstreamTimestamp": envelope.timestamp_ms,
                "raw": raw,
            }),
            status: MessageStatus::Received,
            sent_at_ms: Some(envelope.timestamp_ms),
            created_at_ms: unix_now_ms(),
        }
    }

    /// Group updates run the plugin chain and webhook fan-out only; they
    /// are not persisted as messages.
    async fn group_participants(self: &Arc<Self>, update: GroupParticipantsUpdate) {
        let event = PluginEvent::GroupParticipants {
            phone: self.phone.clone(),
            update: update.clone(),
        };
        let api: Arc<dyn PluginApi> = Arc::clone(self) as Arc<dyn PluginApi>;
        self.chain.dispatch(&event, api).await;

        let data = json!({
            "type": "group_participants_update",
            "groupId": update.group_jid,
            "action": update.action.as_str(),
            "participants": update.participants,
        });
        if let Err(e) = self
            .deps
            .dispatcher
            .dispatch(&self.id, MESSAGE_RECEIVED, data)
            .await
        {
            warn!(phone = %self.phone, error = %e, "group update fan-out failed");
        }
    }

    // ── Outbound pipeline ───────────────────────────────────────────────────

    pub async fn send_text(&self, to: &str, text: &str) -> Result<MessageRecord> {
        if text.trim().is_empty() {
            return Err(Error::bad_input("message is empty"));
        }
        let jid = jid::to_user_jid(to)?;
        self.deliver(&jid, Some(text), None).await
    }

    pub async fn send_group_text(&self, group_id: &str, text: &str) -> Result<MessageRecord> {
        if text.trim().is_empty() {
            return Err(Error::bad_input("message is empty"));
        }
        let jid = jid::to_group_jid(group_id)?;
        self.deliver(&jid, Some(text), None).await
    }

    pub async fn send_media(&self, to: &str, media: &MediaPayload) -> Result<MessageRecord> {
        if media.url.trim().is_empty() {
            return Err(Error::bad_input("media url is empty"));
        }
        let jid = jid::to_user_jid(to)?;
        self.deliver(&jid, None, Some(media)).await
    }

    async fn deliver(
        &self,
        jid: &str,
        text: Option<&str>,
        media: Option<&MediaPayload>,
    ) -> Result<MessageRecord> {
        let status = self.status();
        if status != InstanceStatus::Active {
            return Err(Error::not_connected(&self.phone, status.as_str()));
        }
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::not_connected(&self.phone, status.as_str()))?;

        let result = match (text, media) {
            (Some(text), _) => transport.send_text(jid, text).await,
            (None, Some(media)) => transport.send_media(jid, media).await,
            (None, None) => Err(Error::bad_input("nothing to send")),
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                self.log(LogLevel::Error, &format!("send to {jid} failed: {e}"))
                    .await;
                return Err(e);
            },
        };

        let kind = media.map_or(MessageKind::Text, |m| {
            MessageKind::parse_lossy(m.kind.as_str())
        });
        let from_jid = self
            .user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|u| u.id.clone())
            .unwrap_or_else(|| self.phone.clone());
        let record = MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: self.id.clone(),
            direction: MessageDirection::Outgoing,
            from_jid,
            to_jid: jid.to_string(),
            kind,
            content: json!({
                "text": text,
                "media": media,
                "upstreamId": receipt.message_id,
            }),
            status: MessageStatus::Sent,
            sent_at_ms: Some(unix_now_ms()),
            created_at_ms: unix_now_ms(),
        };
        if let Err(e) = self.deps.messages.create(&record).await {
            warn!(phone = %self.phone, error = %e, "failed to persist outbound message");
        }

        let data = serde_json::to_value(&record).unwrap_or_else(|_| json!({ "id": record.id }));
        if let Err(e) = self.deps.dispatcher.dispatch(&self.id, MESSAGE_SENT, data).await {
            warn!(phone = %self.phone, error = %e, "message.sent fan-out failed");
        }
        self.log(LogLevel::Info, &format!("message sent to {jid}")).await;

        Ok(record)
    }

    // ── Group metadata cache ────────────────────────────────────────────────

    /// Memoised group metadata. A transport failure or timeout yields
    /// `None` and is not cached.
    pub async fn group_metadata(&self, group_id: &str) -> Option<GroupMetadata> {
        let jid = jid::to_group_jid(group_id).ok()?;
        {
            let cache = self.groups.lock().await;
            if let Some(metadata) = cache.get(&jid) {
                return Some(metadata.clone());
            }
        }

        let transport = self.transport.read().await.clone()?;
        let query = transport.group_metadata(&jid);
        match tokio::time::timeout(self.deps.config.group_query_timeout(), query).await {
            Ok(Ok(metadata)) => {
                let mut cache = self.groups.lock().await;
                cache.insert(jid, metadata.clone());
                Some(metadata)
            },
            Ok(Err(e)) => {
                warn!(phone = %self.phone, group = %jid, error = %e, "group metadata query failed");
                None
            },
            Err(_) => {
                warn!(phone = %self.phone, group = %jid, "group metadata query timed out");
                None
            },
        }
    }

    // ── Support ─────────────────────────────────────────────────────────────

    /// In-memory status is authoritative; the persisted value follows on
    /// every transition and readers tolerate brief lag.
    async fn transition(&self, memory: InstanceStatus, persisted: InstanceStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = memory;
        if let Err(e) = self.deps.instances.update_status(&self.phone, persisted).await {
            warn!(phone = %self.phone, status = persisted.as_str(), error = %e, "status persist failed");
        }
    }

    async fn emit_connection_update(&self, sub_status: &str, mut extra: Value) {
        if let Some(map) = extra.as_object_mut() {
            map.insert("status".into(), json!(sub_status));
            map.insert("phone".into(), json!(self.phone));
        }
        if let Err(e) = self
            .deps
            .dispatcher
            .dispatch(&self.id, CONNECTION_UPDATE, extra)
            .await
        {
            warn!(phone = %self.phone, error = %e, "connection.update fan-out failed");
        }
    }

    /// Write a persisted instance log line (best effort).
    pub async fn log(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.deps.logs.append(&self.id, level, message).await {
            warn!(phone = %self.phone, error = %e, "instance log write failed");
        }
    }
}

#[async_trait]
impl PluginApi for Instance {
    fn phone(&self) -> &str {
        &self.phone
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        Instance::send_text(self, to, text).await.map(|_| ())
    }
}
