//! `welcome` plugin: greets new group participants in one batched message.
//!
//! Joins within the batching window are collected per group; when the
//! window elapses a single welcome text mentioning every pending
//! participant is sent. A participant who leaves before the window fires
//! is dropped from the batch, and an emptied batch cancels the send.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {async_trait::async_trait, tracing::debug, wagate_common::Result};

use wagate_transport::GroupParticipantsAction;

use crate::{
    event::{PluginApi, PluginEvent},
    registry::PluginHandler,
};

/// Default batching window before the welcome message goes out.
const BATCH_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct PendingBatch {
    participants: Vec<String>,
    /// Bumped on every arm; only the latest timer may fire.
    generation: u64,
}

/// Batches are isolated per owning instance: the key is (phone, group).
type BatchKey = (String, String);
type BatchMap = Arc<Mutex<HashMap<BatchKey, PendingBatch>>>;

/// Batched group-welcome sender.
pub struct WelcomePlugin {
    delay: Duration,
    groups: BatchMap,
}

impl WelcomePlugin {
    pub fn new() -> Self {
        Self::with_delay(BATCH_WINDOW)
    }

    /// Shorter windows are used by tests.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn enqueue(&self, phone: &str, group_jid: &str, participants: &[String], api: Arc<dyn PluginApi>) {
        let key = (phone.to_string(), group_jid.to_string());
        let generation = {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let batch = groups.entry(key.clone()).or_default();
            for participant in participants {
                if !batch.participants.contains(participant) {
                    batch.participants.push(participant.clone());
                }
            }
            batch.generation += 1;
            batch.generation
        };

        let groups = Arc::clone(&self.groups);
        let group_jid = group_jid.to_string();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let pending = {
                let mut map = groups.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&key) {
                    // A newer join re-armed the window; let that timer fire.
                    Some(batch) if batch.generation != generation => None,
                    Some(_) => map.remove(&key).map(|b| b.participants),
                    None => None,
                }
            };
            let Some(participants) = pending else {
                return;
            };
            if participants.is_empty() {
                return;
            }
            let text = welcome_message(&participants);
            if let Err(e) = api.send_text(&group_jid, &text).await {
                debug!(group_jid = %group_jid, error = %e, "welcome send failed");
            }
        });
    }

    fn dequeue(&self, phone: &str, group_jid: &str, participants: &[String]) {
        let key = (phone.to_string(), group_jid.to_string());
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(batch) = groups.get_mut(&key) {
            batch
                .participants
                .retain(|p| !participants.contains(p));
            if batch.participants.is_empty() {
                groups.remove(&key);
            }
        }
    }
}

impl Default for WelcomePlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn mention(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    format!("@{user}")
}

fn welcome_message(participants: &[String]) -> String {
    let mentions: Vec<String> = participants.iter().map(|p| mention(p)).collect();
    format!("Welcome to the group, {}!", mentions.join(", "))
}

#[async_trait]
impl PluginHandler for WelcomePlugin {
    fn name(&self) -> &str {
        "welcome"
    }

    fn description(&self) -> &str {
        "Greets new group participants with one batched welcome message"
    }

    fn default_config(&self) -> serde_json::Value {
        serde_json::json!({ "batch_window_secs": BATCH_WINDOW.as_secs() })
    }

    async fn handle(&self, event: &PluginEvent, api: Arc<dyn PluginApi>) -> Result<()> {
        let PluginEvent::GroupParticipants { phone, update } = event else {
            return Ok(());
        };
        match update.action {
            GroupParticipantsAction::Add => {
                self.enqueue(phone, &update.group_jid, &update.participants, api);
            },
            GroupParticipantsAction::Remove => {
                self.dequeue(phone, &update.group_jid, &update.participants);
            },
            GroupParticipantsAction::Promote | GroupParticipantsAction::Demote => {},
        }
        Ok(())
    }
}
