//! Per-instance plugin enablement routes and registry management.

use std::collections::HashMap;

use {
    axum::{
        Json,
        extract::{Path, State},
    },
    wagate_common::Error,
    wagate_instance::Instance,
};

use crate::{
    AppState,
    envelope::{ApiError, ApiResult, ok, ok_message},
};

async fn live_instance(
    state: &AppState,
    phone: &str,
) -> Result<std::sync::Arc<Instance>, ApiError> {
    state
        .manager
        .get(phone)
        .await
        .ok_or_else(|| Error::not_found(format!("instance {phone}")).into())
}

/// Persist the chain's current override map onto the instance row.
async fn persist_overrides(state: &AppState, instance: &Instance) -> Result<(), ApiError> {
    state
        .instances
        .set_plugin_overrides(instance.phone(), &instance.chain().overrides())
        .await?;
    Ok(())
}

pub async fn registry(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.registry.descriptors()))
}

pub async fn reload(State(state): State<AppState>) -> ApiResult {
    state.registry.reload();
    Ok(ok_message("plugin registry reloaded"))
}

pub async fn list(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    let instance = live_instance(&state, &phone).await?;
    Ok(ok(instance.chain().status()))
}

pub async fn enable(
    State(state): State<AppState>,
    Path((phone, name)): Path<(String, String)>,
) -> ApiResult {
    toggle(&state, &phone, &name, true).await
}

pub async fn disable(
    State(state): State<AppState>,
    Path((phone, name)): Path<(String, String)>,
) -> ApiResult {
    toggle(&state, &phone, &name, false).await
}

async fn toggle(state: &AppState, phone: &str, name: &str, enabled: bool) -> ApiResult {
    if state.registry.get(name).is_none() {
        return Err(Error::not_found(format!("plugin {name}")).into());
    }
    let instance = live_instance(state, phone).await?;
    if enabled {
        instance.chain().enable(name);
    } else {
        instance.chain().disable(name);
    }
    persist_overrides(state, &instance).await?;
    Ok(ok(instance.chain().status()))
}

/// Bulk-set a partial override map: `{"plugin-name": true, ...}`.
pub async fn set_map(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    Json(overrides): Json<HashMap<String, bool>>,
) -> ApiResult {
    for name in overrides.keys() {
        if state.registry.get(name).is_none() {
            return Err(Error::bad_input(format!("unknown plugin: {name}")).into());
        }
    }
    let instance = live_instance(&state, &phone).await?;
    instance.chain().set_map(&overrides);
    persist_overrides(&state, &instance).await?;
    Ok(ok(instance.chain().status()))
}

/// Replace the chain's overrides with the latest persisted value.
pub async fn sync(State(state): State<AppState>, Path(phone): Path<String>) -> ApiResult {
    let instance = live_instance(&state, &phone).await?;
    let record = state.record(&phone).await?;
    instance.chain().sync_from(record.plugin_overrides);
    Ok(ok(instance.chain().status()))
}
