//! Webhook subscription CRUD, delivery history queries, and retention.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    wagate_common::{Error, unix_now_ms},
    wagate_storage::types::{HistoryFilter, HistoryStatus, WebhookRecord},
    wagate_webhooks::events,
};

use crate::{
    AppState,
    envelope::{ApiError, ApiResult, ok, ok_message},
};

#[derive(Debug, Deserialize)]
pub struct CreateWebhookBody {
    pub event: String,
    pub url: String,
    #[serde(rename = "type")]
    pub webhook_type: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookBody {
    pub event: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
}

fn validate_event(event: &str) -> Result<(), ApiError> {
    if !events::ALL.contains(&event) {
        return Err(Error::bad_input(format!(
            "unknown event: {event} (expected one of {})",
            events::ALL.join(", ")
        ))
        .into());
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::bad_input("url must be http(s)").into());
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    let record = state.record(&phone).await?;
    Ok(ok(state.webhooks.list_by_instance(&record.id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(body): Json<CreateWebhookBody>,
) -> ApiResult {
    validate_event(&body.event)?;
    validate_url(&body.url)?;
    let record = state.record(&phone).await?;
    let webhook = WebhookRecord {
        id: uuid::Uuid::new_v4().to_string(),
        instance_id: record.id,
        webhook_type: body.webhook_type.unwrap_or_else(|| "http".into()),
        event: body.event,
        url: body.url,
        enabled: body.enabled.unwrap_or(true),
        created_at_ms: unix_now_ms(),
    };
    state.webhooks.create(&webhook).await?;
    Ok(ok(webhook))
}

/// Look a webhook up and verify it belongs to the instance in the path.
async fn owned_webhook(
    state: &AppState,
    phone: &str,
    webhook_id: &str,
) -> Result<WebhookRecord, ApiError> {
    let record = state.record(phone).await?;
    let webhook = state
        .webhooks
        .find_by_id(webhook_id)
        .await?
        .filter(|w| w.instance_id == record.id)
        .ok_or_else(|| Error::not_found(format!("webhook {webhook_id}")))?;
    Ok(webhook)
}

pub async fn update(
    State(state): State<AppState>,
    Path((phone, webhook_id)): Path<(String, String)>,
    Json(body): Json<UpdateWebhookBody>,
) -> ApiResult {
    if let Some(event) = &body.event {
        validate_event(event)?;
    }
    if let Some(url) = &body.url {
        validate_url(url)?;
    }
    let webhook = owned_webhook(&state, &phone, &webhook_id).await?;
    state
        .webhooks
        .update(
            &webhook.id,
            body.url.as_deref(),
            body.event.as_deref(),
            body.enabled,
        )
        .await?;
    let updated = state.webhooks.find_by_id(&webhook.id).await?;
    Ok(ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((phone, webhook_id)): Path<(String, String)>,
) -> ApiResult {
    let webhook = owned_webhook(&state, &phone, &webhook_id).await?;
    state.webhooks.delete(&webhook.id).await?;
    Ok(ok_message(format!("webhook {webhook_id} deleted")))
}

// ── History ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub status: Option<String>,
    pub event: Option<String>,
    pub webhook_id: Option<String>,
    /// Unix milliseconds, inclusive.
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<i64>,
}

impl HistoryParams {
    fn into_filter(self, instance_id: Option<String>) -> Result<HistoryFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(HistoryStatus::parse)
            .transpose()
            .map_err(|_| {
                Error::bad_input("status must be pending|success|failed|timeout")
            })?;
        Ok(HistoryFilter {
            instance_id,
            webhook_id: self.webhook_id,
            status,
            event: self.event,
            since_ms: self.since,
            until_ms: self.until,
            limit: self.limit,
        })
    }
}

pub async fn instance_history(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult {
    let record = state.record(&phone).await?;
    let filter = params.into_filter(Some(record.id))?;
    Ok(ok(state.history.list(&filter).await?))
}

pub async fn global_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult {
    let filter = params.into_filter(None)?;
    Ok(ok(state.history.list(&filter).await?))
}

pub async fn history_entry(
    State(state): State<AppState>,
    Path(history_id): Path<String>,
) -> ApiResult {
    let row = state
        .history
        .find_by_id(&history_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("history row {history_id}")))?;
    Ok(ok(row))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub phone: Option<String>,
}

pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult {
    let instance_id = match params.phone {
        Some(phone) => Some(state.record(&phone).await?.id),
        None => None,
    };
    Ok(ok(state.history.stats(instance_id.as_deref()).await?))
}

// ── Retention ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupBody {
    pub older_than_minutes: i64,
}

pub async fn cleanup(
    State(state): State<AppState>,
    Json(body): Json<CleanupBody>,
) -> ApiResult {
    if body.older_than_minutes <= 0 {
        return Err(Error::bad_input("olderThanMinutes must be positive").into());
    }
    let cutoff_ms = unix_now_ms() - body.older_than_minutes * 60_000;
    let report = state.sweeper.sweep(cutoff_ms).await?;
    Ok(ok(report))
}
