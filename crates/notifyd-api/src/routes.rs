//! The four send routes (C17) and health probes.

use crate::auth::AuthenticatedTenant;
use crate::dto::{BatchSendRequest, SendRequest};
use crate::error::ApiError;
use axum::extract::{Extension, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use notifyd_bizconf::BizConfCache;
use notifyd_common::{BatchSendResp, Notification, SendResp};
use notifyd_strategy::{downgrade_to_async_immediate, StrategyDispatcher};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<StrategyDispatcher>,
    pub bizconf: Arc<BizConfCache>,
}

async fn needs_callback(bizconf: &BizConfCache, tenant_id: u64) -> Result<bool, ApiError> {
    let conf = bizconf.get(tenant_id).await?;
    Ok(conf.callback_conf.is_some())
}

/// Partitions the batch into a callback and a non-callback group and calls
/// `dispatcher.batch_send` once per group, concatenating the results. The
/// response order follows the grouping, not the caller's submission order.
async fn batch_send_grouped(
    state: &ApiState,
    notifications: Vec<Notification>,
) -> Result<BatchSendResp, ApiError> {
    let mut flags = Vec::with_capacity(notifications.len());
    for n in &notifications {
        flags.push(needs_callback(&state.bizconf, n.tenant_id).await?);
    }

    let mut with_cb = Vec::new();
    let mut without_cb = Vec::new();
    for (n, flag) in notifications.into_iter().zip(flags) {
        if flag {
            with_cb.push(n);
        } else {
            without_cb.push(n);
        }
    }

    let mut results = Vec::new();
    if !with_cb.is_empty() {
        results.extend(state.dispatcher.batch_send(with_cb, true).await?.results);
    }
    if !without_cb.is_empty() {
        results.extend(state.dispatcher.batch_send(without_cb, false).await?.results);
    }
    Ok(BatchSendResp { results })
}

async fn send(
    State(state): State<ApiState>,
    Extension(AuthenticatedTenant(tenant)): Extension<AuthenticatedTenant>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResp>, ApiError> {
    let notification = req.into_notification(tenant)?;
    let needs_cb = needs_callback(&state.bizconf, notification.tenant_id).await?;
    let resp = state.dispatcher.send(notification, needs_cb).await?;
    Ok(Json(resp))
}

async fn async_send(
    State(state): State<ApiState>,
    Extension(AuthenticatedTenant(tenant)): Extension<AuthenticatedTenant>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResp>, ApiError> {
    let mut notification = req.into_notification(tenant)?;
    downgrade_to_async_immediate(&mut notification);
    let needs_cb = needs_callback(&state.bizconf, notification.tenant_id).await?;
    let resp = state.dispatcher.send(notification, needs_cb).await?;
    Ok(Json(resp))
}

async fn batch_send(
    State(state): State<ApiState>,
    Extension(AuthenticatedTenant(tenant)): Extension<AuthenticatedTenant>,
    Json(req): Json<BatchSendRequest>,
) -> Result<Json<BatchSendResp>, ApiError> {
    let notifications = req.into_notifications(tenant)?;
    let resp = batch_send_grouped(&state, notifications).await?;
    Ok(Json(resp))
}

async fn batch_async_send(
    State(state): State<ApiState>,
    Extension(AuthenticatedTenant(tenant)): Extension<AuthenticatedTenant>,
    Json(req): Json<BatchSendRequest>,
) -> Result<Json<BatchSendResp>, ApiError> {
    let mut notifications = req.into_notifications(tenant)?;
    for n in &mut notifications {
        downgrade_to_async_immediate(n);
    }
    let resp = batch_send_grouped(&state, notifications).await?;
    Ok(Json(resp))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

pub fn send_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/notifications/send", post(send))
        .route("/api/v1/notifications/async-send", post(async_send))
        .route("/api/v1/notifications/batch-send", post(batch_send))
        .route("/api/v1/notifications/batch-async-send", post(batch_async_send))
        .with_state(state)
}

pub fn health_routes() -> Router {
    Router::new()
        .route("/q/health", get(health))
        .route("/q/health/live", get(health))
        .route("/q/health/ready", get(health))
}
