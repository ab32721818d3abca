//! Serialisable status views of an instance.

use serde::Serialize;

/// Point-in-time status view of one instance.
///
/// `status` is a plain string so the degraded view of a persisted-but-not-
/// running instance can report `disconnected`, which is not a lifecycle
/// state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: String,
    pub phone: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub status: String,
    pub is_connected: bool,
    pub qr_code: Option<String>,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at_ms: i64,
}

impl InstanceSnapshot {
    /// Degraded view built purely from a persisted row.
    pub fn disconnected(record: &wagate_storage::types::InstanceRecord) -> Self {
        Self {
            id: record.id.clone(),
            phone: record.phone.clone(),
            name: record.name.clone(),
            alias: record.alias.clone(),
            status: "disconnected".into(),
            is_connected: false,
            qr_code: None,
            reconnect_attempts: 0,
            user_id: None,
            created_at_ms: record.created_at_ms,
        }
    }
}
