//! Router construction and serving.

use {
    axum::{
        Router,
        response::Json,
        routing::{get, patch, post},
    },
    serde_json::json,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
    wagate_common::Result,
};

use crate::{AppState, instances, plugins, send, webhooks};

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "wagate",
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

/// Build the control-plane router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(instances::status))
        // Instance lifecycle
        .route("/instances", get(instances::list).post(instances::create))
        .route(
            "/instances/{phone}",
            get(instances::get)
                .patch(instances::update)
                .delete(instances::delete),
        )
        .route("/instances/{phone}/restart", post(instances::restart))
        .route("/instances/{phone}/connection", get(instances::connection))
        .route("/instances/{phone}/ping", get(instances::ping))
        .route("/instances/{phone}/logs", get(instances::logs))
        // Messages
        .route("/instances/{phone}/messages", get(instances::messages))
        .route(
            "/instances/{phone}/messages/stats",
            get(instances::message_stats),
        )
        .route(
            "/instances/{phone}/messages/conversation/{jid}",
            get(instances::conversation),
        )
        // Sends
        .route("/instances/{phone}/send/text", post(send::text))
        .route("/instances/{phone}/send/group", post(send::group))
        .route("/instances/{phone}/send/media", post(send::media))
        // Plugins
        .route("/plugins", get(plugins::registry))
        .route("/plugins/reload", post(plugins::reload))
        .route(
            "/instances/{phone}/plugins",
            get(plugins::list).post(plugins::set_map),
        )
        .route(
            "/instances/{phone}/plugins/sync",
            post(plugins::sync),
        )
        .route(
            "/instances/{phone}/plugins/{name}/enable",
            post(plugins::enable),
        )
        .route(
            "/instances/{phone}/plugins/{name}/disable",
            post(plugins::disable),
        )
        // Webhooks
        .route(
            "/instances/{phone}/webhooks",
            get(webhooks::list).post(webhooks::create),
        )
        .route(
            "/instances/{phone}/webhooks/{webhook_id}",
            patch(webhooks::update).delete(webhooks::delete),
        )
        .route(
            "/instances/{phone}/webhooks/history",
            get(webhooks::instance_history),
        )
        .route("/webhooks/history", get(webhooks::global_history))
        .route("/webhooks/history/cleanup", post(webhooks::cleanup))
        .route("/webhooks/history/{history_id}", get(webhooks::history_entry))
        .route("/webhooks/stats", get(webhooks::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    bind: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| wagate_common::Error::internal(format!("bind {addr}: {e}")))?;
    info!(%addr, "control api listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| wagate_common::Error::internal(format!("server error: {e}")))?;
    Ok(())
}
