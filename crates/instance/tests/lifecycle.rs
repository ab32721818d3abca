//! Instance lifecycle tests against the mock transport and an in-memory
//! store: connection state machine, bounded reconnection, restart
//! semantics, pipelines, and manager registry invariants.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    wagate_config::{GatewayConfig, ReconnectConfig},
    wagate_instance::{Instance, InstanceDeps, InstanceManager},
    wagate_plugins::{PluginApi, PluginEvent, PluginHandler, PluginRegistry},
    wagate_storage::{
        InstanceStore, MessageStore, WebhookHistoryStore, WebhookStore,
        types::{
            HistoryFilter, InstanceStatus, MessageDirection, MessageFilter, WebhookRecord,
        },
    },
    wagate_transport::{
        BoundUser, CloseReason, GroupMetadata, GroupParticipant, GroupParticipantsAction,
        GroupParticipantsUpdate, InboundEnvelope, TransportEvent,
        mock::{MockHandle, MockTransportFactory},
    },
    wagate_webhooks::{DispatcherOptions, WebhookDispatcher},
};

use wagate_common::sanitize::RawValue;

struct Harness {
    _tmp: tempfile::TempDir,
    pool: sqlx::SqlitePool,
    factory: Arc<MockTransportFactory>,
    registry: Arc<PluginRegistry>,
    config: Arc<GatewayConfig>,
    manager: InstanceManager,
}

impl Harness {
    fn deps(&self) -> InstanceDeps {
        deps_for(
            &self.pool,
            Arc::clone(&self.factory),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        )
    }

    async fn subscribe(&self, instance_id: &str, event: &str, url: &str) -> WebhookRecord {
        let record = WebhookRecord {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            webhook_type: "http".into(),
            event: event.into(),
            url: url.into(),
            enabled: true,
            created_at_ms: wagate_common::unix_now_ms(),
        };
        wagate_storage::SqliteWebhookStore::new(self.pool.clone())
            .create(&record)
            .await
            .unwrap();
        record
    }

    async fn history(&self, filter: &HistoryFilter) -> Vec<wagate_storage::types::WebhookHistoryRecord> {
        wagate_storage::SqliteWebhookHistoryStore::new(self.pool.clone())
            .list(filter)
            .await
            .unwrap()
    }

    async fn persisted_status(&self, phone: &str) -> InstanceStatus {
        wagate_storage::SqliteInstanceStore::new(self.pool.clone())
            .find_by_phone(phone)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

fn deps_for(
    pool: &sqlx::SqlitePool,
    factory: Arc<MockTransportFactory>,
    registry: Arc<PluginRegistry>,
    config: Arc<GatewayConfig>,
) -> InstanceDeps {
    let webhooks = Arc::new(wagate_storage::SqliteWebhookStore::new(pool.clone()));
    let history = Arc::new(wagate_storage::SqliteWebhookHistoryStore::new(pool.clone()));
    InstanceDeps {
        instances: Arc::new(wagate_storage::SqliteInstanceStore::new(pool.clone())),
        messages: Arc::new(wagate_storage::SqliteMessageStore::new(pool.clone())),
        logs: Arc::new(wagate_storage::SqliteInstanceLogStore::new(pool.clone())),
        dispatcher: Arc::new(WebhookDispatcher::new(
            webhooks,
            history,
            DispatcherOptions {
                timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )),
        registry,
        factory,
        config,
    }
}

async fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let pool = wagate_storage::connect("sqlite::memory:").await.unwrap();
    let factory = Arc::new(MockTransportFactory::new());
    let registry = Arc::new(PluginRegistry::empty());
    let config = Arc::new(GatewayConfig {
        auth_root: tmp.path().join("auth"),
        reconnect: ReconnectConfig {
            max_attempts: 5,
            delay_ms: 100,
        },
        restart_quiesce_ms: 30,
        group_query_timeout_ms: 200,
        ..Default::default()
    });
    let deps = deps_for(&pool, Arc::clone(&factory), Arc::clone(&registry), Arc::clone(&config));
    Harness {
        _tmp: tmp,
        pool,
        factory,
        registry,
        config,
        manager: InstanceManager::new(deps),
    }
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for<F>(mut predicate: F, deadline_ms: u64, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_millis(deadline_ms);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_status(instance: &Arc<Instance>, status: InstanceStatus) {
    let instance = Arc::clone(instance);
    wait_for(
        move || instance.status() == status,
        5_000,
        status.as_str(),
    )
    .await;
}

fn open_event() -> TransportEvent {
    TransportEvent::Open {
        user: BoundUser {
            id: "628123456789@s.whatsapp.net".into(),
            name: Some("I1".into()),
        },
    }
}

fn inbound(text: &str, from_self: bool) -> InboundEnvelope {
    InboundEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        chat_jid: "peer@s.whatsapp.net".into(),
        sender_jid: "peer@s.whatsapp.net".into(),
        push_name: Some("Peer".into()),
        kind: "text".into(),
        text: Some(text.into()),
        timestamp_ms: wagate_common::unix_now_ms(),
        from_self,
        raw: RawValue::object([
            ("body", RawValue::String(text.into())),
            ("mediaKey", RawValue::Bytes(vec![7, 7, 7])),
        ]),
    }
}

async fn connect_instance(harness: &Harness, phone: &str) -> (Arc<Instance>, MockHandle) {
    let instance = harness.manager.create(phone, "I1", None).await.unwrap();
    wait_for_status(&instance, InstanceStatus::Connecting).await;
    let handle = harness.factory.handle(phone).unwrap();
    handle.emit(open_event()).await;
    wait_for_status(&instance, InstanceStatus::Active).await;
    (instance, handle)
}

// ── Connection lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn create_advertises_qr_then_connects() {
    let harness = harness().await;
    let instance = harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap();
    assert_eq!(harness.manager.status().await.unwrap().total, 1);

    let handle = harness.factory.handle("628123456789").unwrap();
    handle
        .emit(TransportEvent::Qr {
            code: "qr-payload".into(),
        })
        .await;
    wait_for_status(&instance, InstanceStatus::QrReady).await;

    let snapshot = instance.snapshot();
    assert_eq!(snapshot.status, "qr_ready");
    assert_eq!(snapshot.qr_code.as_deref(), Some("qr-payload"));
    assert!(!snapshot.is_connected);

    handle.emit(open_event()).await;
    wait_for_status(&instance, InstanceStatus::Active).await;

    let snapshot = instance.snapshot();
    assert_eq!(snapshot.status, "active");
    assert!(snapshot.is_connected);
    assert!(snapshot.qr_code.is_none());
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(
        snapshot.user_id.as_deref(),
        Some("628123456789@s.whatsapp.net")
    );
}

#[tokio::test]
async fn duplicate_phone_never_coexists() {
    let harness = harness().await;
    harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap();

    // Same phone, different formatting: normalisation must collide.
    let err = harness
        .manager
        .create("+62 812-3456-789", "I2", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "already_exists");
    assert_eq!(harness.manager.status().await.unwrap().total, 1);
}

#[tokio::test]
async fn persisted_duplicate_is_rejected_too() {
    let harness = harness().await;
    harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap();

    // Second manager over the same store: in-memory map is empty, the
    // unique phone column must still reject.
    let other = InstanceManager::new(harness.deps());
    let err = other.create("628123456789", "I2", None).await.unwrap_err();
    assert_eq!(err.code(), "already_exists");
}

#[tokio::test]
async fn bounded_reconnection_ends_logged_out() {
    let harness = harness().await;
    // Every connect immediately drops the session.
    harness.factory.script("628123456789", vec![TransportEvent::Closed {
        reason: CloseReason::dropped(Some(428), "connection lost"),
    }]);

    let instance = harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap();
    harness
        .subscribe(instance.id(), "connection.update", "http://127.0.0.1:9/hook")
        .await;

    wait_for_status(&instance, InstanceStatus::LoggedOut).await;

    // Initial connect + five bounded reconnection attempts, no sixth.
    assert_eq!(harness.factory.connect_count("628123456789"), 6);
    assert_eq!(instance.snapshot().reconnect_attempts, 5);

    // Soft-clean: row survives as inactive, credentials are gone.
    assert_eq!(
        harness.persisted_status("628123456789").await,
        InstanceStatus::Inactive
    );
    assert!(!harness.config.auth_dir_for("628123456789").exists());

    // A connection.update attempt with sub-status logged_out was recorded.
    let rows = harness
        .history(&HistoryFilter {
            event: Some("connection.update".into()),
            ..Default::default()
        })
        .await;
    assert!(
        rows.iter()
            .any(|r| r.payload["data"]["status"] == "logged_out"),
        "expected a logged_out connection.update history row"
    );
}

#[tokio::test]
async fn logout_close_skips_reconnection() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    handle
        .emit(TransportEvent::Closed {
            reason: CloseReason::logged_out("logged out from phone"),
        })
        .await;
    wait_for_status(&instance, InstanceStatus::LoggedOut).await;

    assert_eq!(harness.factory.connect_count("628123456789"), 1);
    assert_eq!(
        harness.persisted_status("628123456789").await,
        InstanceStatus::Inactive
    );
}

#[tokio::test]
async fn manual_restart_preserves_credentials() {
    let harness = harness().await;
    let (instance, _handle) = connect_instance(&harness, "628123456789").await;

    let auth_dir = harness.config.auth_dir_for("628123456789");
    std::fs::write(auth_dir.join("creds.json"), b"{}").unwrap();

    instance.restart().await.unwrap();
    // Reconnected with a fresh transport; credentials still on disk.
    let factory = Arc::clone(&harness.factory);
    wait_for(
        move || factory.connect_count("628123456789") == 2,
        5_000,
        "reconnect after restart",
    )
    .await;
    assert!(auth_dir.join("creds.json").exists());

    let handle = harness.factory.handle("628123456789").unwrap();
    handle.emit(open_event()).await;
    wait_for_status(&instance, InstanceStatus::Active).await;

    // The session never visited logged_out: the row was never soft-cleaned.
    assert_eq!(
        harness.persisted_status("628123456789").await,
        InstanceStatus::Active
    );
}

#[tokio::test]
async fn manual_close_without_transient_code_goes_inactive() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    instance.mark_manual_restart();
    handle
        .emit(TransportEvent::Closed {
            reason: CloseReason::dropped(None, "operator close"),
        })
        .await;
    wait_for_status(&instance, InstanceStatus::Inactive).await;

    // No reconnection was scheduled.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.factory.connect_count("628123456789"), 1);
    assert!(harness.config.auth_dir_for("628123456789").exists());
}

#[tokio::test]
async fn transient_close_code_overrides_manual_restart() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    // Stream reset during QR scan (code 515) must reconnect even though a
    // manual restart is pending, or the user could never re-authenticate.
    instance.mark_manual_restart();
    handle
        .emit(TransportEvent::Closed {
            reason: CloseReason::dropped(Some(515), "stream reset"),
        })
        .await;

    let factory = Arc::clone(&harness.factory);
    wait_for(
        move || factory.connect_count("628123456789") == 2,
        5_000,
        "transient reconnect",
    )
    .await;
    assert_ne!(instance.status(), InstanceStatus::Inactive);
}

// ── Outbound pipeline ───────────────────────────────────────────────────────

#[tokio::test]
async fn send_validates_before_touching_the_store() {
    let harness = harness().await;
    let (instance, _handle) = connect_instance(&harness, "628123456789").await;

    let err = harness
        .manager
        .send_text("628123456789", "", "hi")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_input");

    let err = harness
        .manager
        .send_text("628123456789", "628999", "   ")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_input");

    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter::default())
        .await
        .unwrap();
    assert!(messages.is_empty(), "no message row may be persisted");
}

#[tokio::test]
async fn send_against_non_active_instance_is_not_connected() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    handle
        .emit(TransportEvent::Closed {
            reason: CloseReason::dropped(None, "flaky network"),
        })
        .await;
    wait_for_status(&instance, InstanceStatus::Reconnecting).await;

    let err = harness
        .manager
        .send_text("628123456789", "628999", "hi")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_connected");

    let err = harness
        .manager
        .send_text("620000000000", "628999", "hi")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn successful_send_persists_and_fans_out() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    harness
        .subscribe(instance.id(), "message.sent", "http://127.0.0.1:9/hook")
        .await;

    let record = harness
        .manager
        .send_text("628123456789", "+62 899 000 111", "hello there")
        .await
        .unwrap();
    assert_eq!(record.to_jid, "62899000111@s.whatsapp.net");
    assert_eq!(record.content["upstreamId"], "mock-628123456789-0");

    let sends = handle.transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].text.as_deref(), Some("hello there"));

    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter {
            direction: Some(MessageDirection::Outgoing),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);

    let rows = harness
        .history(&HistoryFilter {
            event: Some("message.sent".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn failed_send_surfaces_and_writes_error_log() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    handle.transport.set_fail_sends(true);

    let err = harness
        .manager
        .send_text("628123456789", "628999", "hi")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "upstream");

    let logs = wagate_storage::SqliteInstanceLogStore::new(harness.pool.clone());
    use wagate_storage::InstanceLogStore as _;
    let errors = logs
        .list(
            instance.id(),
            Some(wagate_storage::types::LogLevel::Error),
            None,
        )
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("failed"));
}

#[tokio::test]
async fn group_send_coerces_group_jid() {
    let harness = harness().await;
    let (_instance, handle) = connect_instance(&harness, "628123456789").await;

    harness
        .manager
        .send_group("628123456789", "12036304-5678", "hi all")
        .await
        .unwrap();
    assert_eq!(handle.transport.sends()[0].jid, "12036304-5678@g.us");
}

// ── Inbound pipeline ────────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_message_persists_sanitised_and_fans_out() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    harness
        .subscribe(instance.id(), "message.received", "http://127.0.0.1:9/hook")
        .await;

    handle
        .emit(TransportEvent::Messages {
            batch: vec![inbound("hello", false), inbound("echo", true)],
        })
        .await;

    wait_for_message_count(&harness.pool, instance.id(), 1).await;

    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter::default())
        .await
        .unwrap();
    // The self-originated echo bypassed the pipeline entirely.
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.direction, MessageDirection::Incoming);
    assert_eq!(message.content["text"], "hello");
    // Byte arrays in the raw envelope were sanitised, not stored verbatim.
    assert_eq!(message.content["raw"]["mediaKey"]["__type"], "bytes");

    let rows = harness
        .history(&HistoryFilter {
            event: Some("message.received".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(rows.len(), 1);
}

/// Poll the message store until `expected` rows exist for the instance.
async fn wait_for_message_count(pool: &sqlx::SqlitePool, instance_id: &str, expected: usize) {
    let store = wagate_storage::SqliteMessageStore::new(pool.clone());
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = store
            .find_by_instance(instance_id, &MessageFilter::default())
            .await
            .map(|v| v.len())
            .unwrap_or(0);
        if count == expected {
            return;
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for {expected} persisted messages (have {count})");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct RecordingPlugin {
    name: &'static str,
    fail: bool,
    seen: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl PluginHandler for RecordingPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "records events"
    }

    async fn handle(
        &self,
        event: &PluginEvent,
        _api: Arc<dyn PluginApi>,
    ) -> wagate_common::Result<()> {
        self.seen.lock().unwrap().push(event.phone().to_string());
        if self.fail {
            return Err(wagate_common::Error::internal("plugin blew up"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn plugin_failure_is_contained() {
    let harness = harness().await;
    let good_seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let bad_seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    harness.registry.register(Arc::new(RecordingPlugin {
        name: "bad",
        fail: true,
        seen: Arc::clone(&bad_seen),
    }));
    harness.registry.register(Arc::new(RecordingPlugin {
        name: "good",
        fail: false,
        seen: Arc::clone(&good_seen),
    }));

    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    instance.chain().enable("bad");
    instance.chain().enable("good");
    harness
        .subscribe(instance.id(), "message.received", "http://127.0.0.1:9/hook")
        .await;

    handle
        .emit(TransportEvent::Messages {
            batch: vec![inbound("trigger", false)],
        })
        .await;

    let good = Arc::clone(&good_seen);
    wait_for(move || !good.lock().unwrap().is_empty(), 5_000, "good plugin ran").await;
    assert_eq!(bad_seen.lock().unwrap().len(), 1);

    // Persistence and webhook fan-out were unaffected by the failure.
    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter::default())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    let rows = harness
        .history(&HistoryFilter {
            event: Some("message.received".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn group_updates_reach_plugins_but_are_not_persisted() {
    let harness = harness().await;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    harness.registry.register(Arc::new(RecordingPlugin {
        name: "observer",
        fail: false,
        seen: Arc::clone(&seen),
    }));

    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    instance.chain().enable("observer");

    handle
        .emit(TransportEvent::GroupParticipants(GroupParticipantsUpdate {
            group_jid: "team@g.us".into(),
            action: GroupParticipantsAction::Add,
            participants: vec!["new@s.whatsapp.net".into()],
        }))
        .await;

    let observed = Arc::clone(&seen);
    wait_for(move || !observed.lock().unwrap().is_empty(), 5_000, "group update seen").await;

    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter::default())
        .await
        .unwrap();
    assert!(messages.is_empty());
}

// ── Group metadata cache ────────────────────────────────────────────────────

#[tokio::test]
async fn group_metadata_is_memoised() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    handle.transport.put_group(GroupMetadata {
        jid: "team@g.us".into(),
        subject: "Team".into(),
        participants: vec![GroupParticipant {
            jid: "a@s.whatsapp.net".into(),
            admin: true,
        }],
    });

    let first = instance.group_metadata("team@g.us").await.unwrap();
    assert_eq!(first.subject, "Team");
    let second = instance.group_metadata("team@g.us").await.unwrap();
    assert_eq!(second.subject, "Team");
    assert_eq!(handle.transport.group_query_count(), 1, "second hit is cached");
}

#[tokio::test]
async fn group_metadata_failure_is_not_cached() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    handle.transport.set_fail_group_queries(true);
    assert!(instance.group_metadata("team@g.us").await.is_none());

    handle.transport.set_fail_group_queries(false);
    handle.transport.put_group(GroupMetadata {
        jid: "team@g.us".into(),
        subject: "Team".into(),
        participants: vec![],
    });
    assert!(instance.group_metadata("team@g.us").await.is_some());
    assert_eq!(handle.transport.group_query_count(), 2);
}

// ── Manager registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn view_degrades_for_instances_not_in_memory() {
    let harness = harness().await;
    harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap();

    // A different manager over the same store has nothing in memory.
    let other = InstanceManager::new(harness.deps());
    let view = other.view("628123456789").await.unwrap();
    assert_eq!(view.status, "disconnected");
    assert!(!view.is_connected);

    let err = other.view("629000000000").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn update_profile_mirrors_into_memory() {
    let harness = harness().await;
    let (instance, _handle) = connect_instance(&harness, "628123456789").await;

    let view = harness
        .manager
        .update_profile("628123456789", Some("renamed"), Some("work"))
        .await
        .unwrap();
    assert_eq!(view.name, "renamed");
    assert_eq!(instance.snapshot().alias.as_deref(), Some("work"));
}

#[tokio::test]
async fn delete_with_keep_record_soft_cleans() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;
    let auth_dir = harness.config.auth_dir_for("628123456789");
    assert!(auth_dir.exists());

    harness.manager.delete("628123456789", true).await.unwrap();

    assert!(harness.manager.get("628123456789").await.is_none());
    assert!(handle.transport.was_logged_out());
    assert!(!auth_dir.exists());
    assert_eq!(
        harness.persisted_status("628123456789").await,
        InstanceStatus::Inactive
    );
    // The kept row still owns the phone: re-creation stays rejected.
    let err = harness
        .manager
        .create("628123456789", "I1", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "already_exists");
    assert_eq!(instance.status(), InstanceStatus::LoggedOut);
}

#[tokio::test]
async fn delete_without_keep_record_cascades() {
    let harness = harness().await;
    let (instance, handle) = connect_instance(&harness, "628123456789").await;

    handle
        .emit(TransportEvent::Messages {
            batch: vec![inbound("to be cascaded", false)],
        })
        .await;
    wait_for_message_count(&harness.pool, instance.id(), 1).await;

    harness.manager.delete("628123456789", false).await.unwrap();

    let store = wagate_storage::SqliteInstanceStore::new(harness.pool.clone());
    assert!(store.find_by_phone("628123456789").await.unwrap().is_none());
    let messages = wagate_storage::SqliteMessageStore::new(harness.pool.clone())
        .find_by_instance(instance.id(), &MessageFilter::default())
        .await
        .unwrap();
    assert!(messages.is_empty(), "cascade must remove message rows");

    // Deleting again reports not found.
    let err = harness.manager.delete("628123456789", false).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn init_restores_running_instances_once() {
    let harness = harness().await;
    let (_instance, _handle) = connect_instance(&harness, "628123456789").await;
    assert_eq!(
        harness.persisted_status("628123456789").await,
        InstanceStatus::Active
    );

    let restored = InstanceManager::new(harness.deps());
    restored.init().await.unwrap();
    let factory = Arc::clone(&harness.factory);
    wait_for(
        move || factory.connect_count("628123456789") >= 2,
        5_000,
        "restored instance reconnects",
    )
    .await;
    let after_first = harness.factory.connect_count("628123456789");

    // Idempotent: a second init must not start anything again.
    restored.init().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.factory.connect_count("628123456789"), after_first);
}

#[tokio::test]
async fn ensure_default_materialises_single_mode_instance() {
    let harness = harness().await;
    let instance = harness.manager.ensure_default("628000000001").await.unwrap();
    assert_eq!(instance.phone(), "628000000001");

    // Idempotent.
    let again = harness.manager.ensure_default("628000000001").await.unwrap();
    assert_eq!(again.id(), instance.id());
}
