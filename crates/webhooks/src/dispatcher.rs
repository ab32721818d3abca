//! The per-instance webhook dispatcher.
//!
//! For each `(instance, event, data)` triple: resolve the enabled
//! subscriptions for that event, POST the payload to each concurrently
//! with a bounded total timeout, classify the outcome, and record exactly
//! one history row per attempt. No retries — a failed attempt is final and
//! lives on as its history row.

use std::{sync::Arc, time::Duration};

use {
    chrono::{TimeZone, Utc},
    serde_json::{Value, json},
    tracing::{debug, warn},
    wagate_common::{Result, unix_now_ms},
    wagate_storage::{
        WebhookHistoryStore, WebhookStore,
        types::{HistoryStatus, WebhookHistoryRecord, WebhookRecord},
    },
};

const PRODUCT: &str = "wagate";

/// Delivery tunables.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Total per-attempt timeout, connect included.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: format!("{PRODUCT}/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Outcome of one delivery attempt, as reported to the caller.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub webhook_id: String,
    pub status: HistoryStatus,
    pub http_status: Option<i64>,
    pub response_time_ms: i64,
}

/// Fans events out to enabled subscriptions and records every attempt.
pub struct WebhookDispatcher {
    webhooks: Arc<dyn WebhookStore>,
    history: Arc<dyn WebhookHistoryStore>,
    client: reqwest::Client,
    options: DispatcherOptions,
}

impl WebhookDispatcher {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        history: Arc<dyn WebhookHistoryStore>,
        options: DispatcherOptions,
    ) -> Self {
        // Timeout lives on the request, not the client, so one dispatcher
        // instance can serve tests with very short deadlines.
        Self {
            webhooks,
            history,
            client: reqwest::Client::new(),
            options,
        }
    }

    /// Deliver `event` to every enabled subscription of `instance_id`.
    ///
    /// Subscriptions fire concurrently and unordered. The returned
    /// outcomes are in subscription order; an empty vec means no
    /// subscription matched.
    pub async fn dispatch(
        &self,
        instance_id: &str,
        event: &str,
        data: Value,
    ) -> Result<Vec<AttemptOutcome>> {
        let subscriptions = self.webhooks.find_enabled(instance_id, event).await?;
        if subscriptions.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            instance_id,
            event,
            subscriptions = subscriptions.len(),
            "dispatching webhook event"
        );

        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": iso8601(unix_now_ms()),
            "instanceId": instance_id,
        });

        let attempts = subscriptions
            .iter()
            .map(|subscription| self.attempt(subscription, event, &payload));
        Ok(futures::future::join_all(attempts).await)
    }

    /// One delivery attempt: POST, classify, record history.
    async fn attempt(
        &self,
        subscription: &WebhookRecord,
        event: &str,
        payload: &Value,
    ) -> AttemptOutcome {
        let triggered_at_ms = unix_now_ms();
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&subscription.url)
            .timeout(self.options.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, &self.options.user_agent)
            .json(payload)
            .send()
            .await;

        let response_time_ms = started.elapsed().as_millis() as i64;
        let (status, http_status, response_headers, response_body, error_message) = match response
        {
            Ok(response) => {
                let code = response.status().as_u16() as i64;
                // Headers must be snapshotted before the body consumes the
                // response.
                let headers = headers_to_json(response.headers());
                let body = response.text().await.unwrap_or_default();
                if (200..300).contains(&code) {
                    (
                        HistoryStatus::Success,
                        Some(code),
                        Some(headers),
                        Some(body),
                        None,
                    )
                } else {
                    (
                        HistoryStatus::Failed,
                        Some(code),
                        Some(headers),
                        Some(body),
                        Some(format!("endpoint returned HTTP {code}")),
                    )
                }
            },
            Err(e) if e.is_timeout() => (
                HistoryStatus::Timeout,
                None,
                None,
                None,
                Some(format!(
                    "delivery timed out after {} ms",
                    self.options.timeout.as_millis()
                )),
            ),
            Err(e) => (HistoryStatus::Failed, None, None, None, Some(e.to_string())),
        };

        if status != HistoryStatus::Success {
            warn!(
                webhook_id = %subscription.id,
                url = %subscription.url,
                event,
                status = status.as_str(),
                error = error_message.as_deref().unwrap_or(""),
                "webhook delivery failed"
            );
        }

        let record = WebhookHistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: subscription.instance_id.clone(),
            webhook_id: subscription.id.clone(),
            event: event.to_string(),
            payload: payload.clone(),
            status,
            http_status,
            response_time_ms: Some(response_time_ms),
            response_headers,
            response_body,
            error_message,
            retry_count: 0,
            triggered_at_ms,
            completed_at_ms: Some(unix_now_ms()),
        };
        // A failed history write must not mask the delivery outcome.
        if let Err(e) = self.history.create(&record).await {
            warn!(webhook_id = %subscription.id, error = %e, "history write failed");
        }

        AttemptOutcome {
            webhook_id: subscription.id.clone(),
            status,
            http_status,
            response_time_ms,
        }
    }
}

/// Snapshot a response header map as a JSON object. Values that are not
/// valid UTF-8 are kept lossily; repeated header names keep the last value.
fn headers_to_json(headers: &reqwest::header::HeaderMap) -> Value {
    let mut map = serde_json::Map::with_capacity(headers.len());
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    Value::Object(map)
}

fn iso8601(unix_ms: i64) -> String {
    Utc.timestamp_millis_opt(unix_ms)
        .single()
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
