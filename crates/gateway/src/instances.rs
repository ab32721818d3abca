//! Instance CRUD, lifecycle, and read-side routes.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    base64::Engine as _,
    serde::Deserialize,
    serde_json::json,
    wagate_common::Error,
    wagate_storage::types::{LogLevel, MessageDirection, MessageFilter},
};

use crate::{
    AppState,
    envelope::{ApiResult, ok, ok_message},
};

#[derive(Debug, Deserialize)]
pub struct CreateInstanceBody {
    pub phone: String,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInstanceBody {
    pub name: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub keep_record: bool,
}

pub async fn list(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.manager.views().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceBody>,
) -> ApiResult {
    let instance = state
        .manager
        .create(&body.phone, &body.name, body.alias.as_deref())
        .await?;
    Ok(ok(instance.snapshot()))
}

pub async fn get(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    Ok(ok(state.manager.view(&phone).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(body): Json<UpdateInstanceBody>,
) -> ApiResult {
    let view = state
        .manager
        .update_profile(&phone, body.name.as_deref(), body.alias.as_deref())
        .await?;
    Ok(ok(view))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Query(params): Query<DeleteParams>,
) -> ApiResult {
    state.manager.delete(&phone, params.keep_record).await?;
    Ok(ok_message(format!("instance {phone} deleted")))
}

pub async fn restart(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    state.manager.restart(&phone).await?;
    Ok(ok_message(format!("instance {phone} restarting")))
}

/// Connection snapshot; carries the QR payload (raw and base64) while the
/// session is waiting for a scan.
pub async fn connection(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    let snapshot = state.manager.view(&phone).await?;
    let qr_base64 = snapshot
        .qr_code
        .as_ref()
        .map(|qr| base64::engine::general_purpose::STANDARD.encode(qr.as_bytes()));
    Ok(ok(json!({
        "phone": snapshot.phone,
        "status": snapshot.status,
        "isConnected": snapshot.is_connected,
        "reconnectAttempts": snapshot.reconnect_attempts,
        "qrCode": snapshot.qr_code,
        "qrBase64": qr_base64,
        "userId": snapshot.user_id,
    })))
}

pub async fn ping(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    let instance = state
        .manager
        .get(&phone)
        .await
        .ok_or_else(|| Error::not_found(format!("instance {phone}")))?;
    let snapshot = instance.snapshot();
    Ok(ok(json!({
        "pong": true,
        "status": snapshot.status,
        "isConnected": snapshot.is_connected,
        "timestamp": wagate_common::unix_now_ms(),
    })))
}

pub async fn status(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.manager.status().await?))
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub level: Option<String>,
    pub limit: Option<i64>,
}

pub async fn logs(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Query(params): Query<LogParams>,
) -> ApiResult {
    let record = state.record(&phone).await?;
    let level = params
        .level
        .as_deref()
        .map(LogLevel::parse)
        .transpose()
        .map_err(|_| Error::bad_input("level must be one of debug|info|warn|error"))?;
    let logs = state.logs.list(&record.id, level, params.limit).await?;
    Ok(ok(logs))
}

#[derive(Debug, Deserialize)]
pub struct MessageParams {
    pub direction: Option<String>,
    pub limit: Option<i64>,
}

pub async fn messages(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Query(params): Query<MessageParams>,
) -> ApiResult {
    let record = state.record(&phone).await?;
    let direction = params
        .direction
        .as_deref()
        .map(MessageDirection::parse)
        .transpose()
        .map_err(|_| Error::bad_input("direction must be incoming|outgoing"))?;
    let filter = MessageFilter {
        direction,
        limit: params.limit,
    };
    Ok(ok(state.messages.find_by_instance(&record.id, &filter).await?))
}

pub async fn conversation(
    State(state): State<AppState>,
    Path((phone, jid)): Path<(String, String)>,
) -> ApiResult {
    let record = state.record(&phone).await?;
    Ok(ok(state.messages.conversation(&record.id, &jid).await?))
}

pub async fn message_stats(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult {
    let record = state.record(&phone).await?;
    Ok(ok(state.messages.stats(&record.id).await?))
}
