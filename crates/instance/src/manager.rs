//! The process-wide instance registry.
//!
//! Owns the phone → instance map. Lookups take the registry lock, clone the
//! handle, and release before any per-instance work — no lock is held
//! across a suspension point another component needs.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{info, warn},
    wagate_common::{Error, Result, unix_now_ms},
};

use {
    wagate_storage::{
        retention::remove_credentials,
        types::{InstanceRecord, InstanceStatus, MessageRecord},
    },
    wagate_transport::{MediaPayload, jid},
};

use crate::{
    instance::{Instance, InstanceDeps},
    snapshot::InstanceSnapshot,
};

/// Summary returned by the manager status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub initialized: bool,
    pub total: usize,
    pub connected: usize,
    pub instances: Vec<InstanceSnapshot>,
}

/// Process-wide authority over the set of live instances.
pub struct InstanceManager {
    deps: InstanceDeps,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    initialized: AtomicBool,
}

impl InstanceManager {
    pub fn new(deps: InstanceDeps) -> Self {
        Self {
            deps,
            instances: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Restore every persisted instance and start the ones that were last
    /// seen running. Idempotent; per-instance failures are logged and do
    /// not abort the manager.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let records = self.deps.instances.list().await?;
        info!(count = records.len(), "restoring persisted instances");

        for record in records {
            let instance = Instance::from_record(&record, self.deps.clone());
            {
                let mut map = self.instances.write().await;
                map.insert(record.phone.clone(), Arc::clone(&instance));
            }
            if matches!(
                record.status,
                InstanceStatus::Active | InstanceStatus::Connecting
            ) {
                if let Err(e) = instance.start().await {
                    warn!(phone = %record.phone, error = %e, "failed to start restored instance");
                }
            }
        }
        Ok(())
    }

    /// Create, persist, register, and start a new instance.
    pub async fn create(
        &self,
        phone: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<Arc<Instance>> {
        let phone = normalize(phone)?;
        if name.trim().is_empty() {
            return Err(Error::bad_input("name is empty"));
        }
        {
            let map = self.instances.read().await;
            if map.contains_key(&phone) {
                return Err(Error::already_exists(phone));
            }
        }

        let now = unix_now_ms();
        let record = InstanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            phone: phone.clone(),
            name: name.trim().to_string(),
            alias: alias.map(str::to_string),
            status: InstanceStatus::Pending,
            plugin_overrides: HashMap::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        // The unique phone column catches records that exist only on disk.
        self.deps.instances.create(&record).await?;

        let instance = Instance::from_record(&record, self.deps.clone());
        {
            let mut map = self.instances.write().await;
            map.insert(phone.clone(), Arc::clone(&instance));
        }
        info!(phone = %phone, "instance created");

        if let Err(e) = instance.start().await {
            warn!(phone = %phone, error = %e, "instance created but failed to start");
        }
        Ok(instance)
    }

    /// In-memory handle, or `None`.
    pub async fn get(&self, phone: &str) -> Option<Arc<Instance>> {
        let phone = normalize(phone).ok()?;
        let map = self.instances.read().await;
        map.get(&phone).cloned()
    }

    /// Status snapshot; degrades to the persisted record when the instance
    /// is not in memory.
    pub async fn view(&self, phone: &str) -> Result<InstanceSnapshot> {
        if let Some(instance) = self.get(phone).await {
            return Ok(instance.snapshot());
        }
        let phone = normalize(phone)?;
        let record = self
            .deps
            .instances
            .find_by_phone(&phone)
            .await?
            .ok_or_else(|| Error::not_found(format!("instance {phone}")))?;
        Ok(InstanceSnapshot::disconnected(&record))
    }

    /// Snapshot every known instance (persisted and in-memory).
    pub async fn views(&self) -> Result<Vec<InstanceSnapshot>> {
        let records = self.deps.instances.list().await?;
        let map = self.instances.read().await;
        Ok(records
            .iter()
            .map(|record| match map.get(&record.phone) {
                Some(instance) => instance.snapshot(),
                None => InstanceSnapshot::disconnected(record),
            })
            .collect())
    }

    /// Patch name/alias in the store and mirror into memory.
    pub async fn update_profile(
        &self,
        phone: &str,
        name: Option<&str>,
        alias: Option<&str>,
    ) -> Result<InstanceSnapshot> {
        let phone = normalize(phone)?;
        self.deps
            .instances
            .update_profile(&phone, name, alias)
            .await?;
        if let Some(instance) = self.get(&phone).await {
            instance.set_profile(name, alias);
        }
        self.view(&phone).await
    }

    /// Log out, stop, and remove an instance. With `keep_record` the
    /// persisted row survives as `inactive`; otherwise deletion cascades.
    pub async fn delete(&self, phone: &str, keep_record: bool) -> Result<()> {
        let phone = normalize(phone)?;
        let instance = {
            let mut map = self.instances.write().await;
            map.remove(&phone)
        };
        let record = self.deps.instances.find_by_phone(&phone).await?;
        if instance.is_none() && record.is_none() {
            return Err(Error::not_found(format!("instance {phone}")));
        }

        if let Some(instance) = &instance {
            instance.shutdown(true).await;
        }
        remove_credentials(&self.deps.config.auth_root, &phone);

        if record.is_some() {
            if keep_record {
                self.deps
                    .instances
                    .update_status(&phone, InstanceStatus::Inactive)
                    .await?;
            } else {
                self.deps.instances.delete(&phone).await?;
            }
        }
        info!(phone = %phone, keep_record, "instance deleted");
        Ok(())
    }

    /// Manual restart (credentials preserved).
    pub async fn restart(&self, phone: &str) -> Result<()> {
        let instance = self
            .get(phone)
            .await
            .ok_or_else(|| Error::not_found(format!("instance {phone}")))?;
        instance.restart().await
    }

    // ── Send passthroughs ───────────────────────────────────────────────────

    pub async fn send_text(&self, phone: &str, to: &str, message: &str) -> Result<MessageRecord> {
        if to.trim().is_empty() {
            return Err(Error::bad_input("destination is empty"));
        }
        let instance = self.require(phone).await?;
        instance.send_text(to, message).await
    }

    pub async fn send_group(
        &self,
        phone: &str,
        group_id: &str,
        message: &str,
    ) -> Result<MessageRecord> {
        if group_id.trim().is_empty() {
            return Err(Error::bad_input("group id is empty"));
        }
        let instance = self.require(phone).await?;
        instance.send_group_text(group_id, message).await
    }

    pub async fn send_media(
        &self,
        phone: &str,
        to: &str,
        media: &MediaPayload,
    ) -> Result<MessageRecord> {
        if to.trim().is_empty() {
            return Err(Error::bad_input("destination is empty"));
        }
        let instance = self.require(phone).await?;
        instance.send_media(to, media).await
    }

    // ── Status / shutdown ───────────────────────────────────────────────────

    pub async fn status(&self) -> Result<ManagerStatus> {
        let instances = self.views().await?;
        let connected = instances.iter().filter(|s| s.is_connected).count();
        Ok(ManagerStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            total: instances.len(),
            connected,
            instances,
        })
    }

    /// Best-effort close of every instance (process shutdown). Sessions
    /// stay authenticated; nothing is logged out.
    pub async fn shutdown(&self) {
        let instances: Vec<_> = {
            let map = self.instances.read().await;
            map.values().cloned().collect()
        };
        info!(count = instances.len(), "shutting down instances");
        for instance in instances {
            instance.shutdown(false).await;
        }
    }

    /// Materialise the anonymous instance used by single mode.
    pub async fn ensure_default(&self, phone: &str) -> Result<Arc<Instance>> {
        if let Some(instance) = self.get(phone).await {
            return Ok(instance);
        }
        let normalized = normalize(phone)?;
        if let Some(record) = self.deps.instances.find_by_phone(&normalized).await? {
            let instance = Instance::from_record(&record, self.deps.clone());
            {
                let mut map = self.instances.write().await;
                map.insert(normalized.clone(), Arc::clone(&instance));
            }
            if let Err(e) = instance.start().await {
                warn!(phone = %normalized, error = %e, "default instance failed to start");
            }
            return Ok(instance);
        }
        self.create(phone, "default", None).await
    }

    async fn require(&self, phone: &str) -> Result<Arc<Instance>> {
        self.get(phone)
            .await
            .ok_or_else(|| Error::not_found(format!("instance {phone}")))
    }
}

fn normalize(phone: &str) -> Result<String> {
    let digits = jid::normalize_phone(phone);
    if digits.is_empty() {
        return Err(Error::bad_input(format!("not a phone number: {phone}")));
    }
    Ok(digits)
}
