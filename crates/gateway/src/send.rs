//! Outbound send routes.

use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    wagate_common::Error,
    wagate_transport::MediaPayload,
};

use crate::{
    AppState,
    envelope::{ApiResult, ok},
};

#[derive(Debug, Deserialize)]
pub struct SendTextBody {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGroupBody {
    pub group_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMediaBody {
    pub to: String,
    pub media: Value,
}

pub async fn text(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(body): Json<SendTextBody>,
) -> ApiResult {
    let record = state
        .manager
        .send_text(&phone, &body.to, &body.message)
        .await?;
    Ok(ok(json!({
        "messageId": record.id,
        "upstreamId": record.content["upstreamId"],
        "to": record.to_jid,
        "status": record.status,
    })))
}

pub async fn group(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(body): Json<SendGroupBody>,
) -> ApiResult {
    let record = state
        .manager
        .send_group(&phone, &body.group_id, &body.message)
        .await?;
    Ok(ok(json!({
        "messageId": record.id,
        "upstreamId": record.content["upstreamId"],
        "to": record.to_jid,
        "status": record.status,
    })))
}

pub async fn media(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(body): Json<SendMediaBody>,
) -> ApiResult {
    // Decoded by hand so a bad `type` comes back as a 400, not a
    // deserialisation rejection.
    let media: MediaPayload = serde_json::from_value(body.media)
        .map_err(|e| Error::bad_input(format!("invalid media payload: {e}")))?;
    let record = state.manager.send_media(&phone, &body.to, &media).await?;
    Ok(ok(json!({
        "messageId": record.id,
        "upstreamId": record.content["upstreamId"],
        "to": record.to_jid,
        "status": record.status,
    })))
}
