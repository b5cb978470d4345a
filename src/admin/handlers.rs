use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::crypto::RotatedKey;
use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::storage::{LinkToken, WebhookLogStats};
use crate::sync::{SweepReport, SyncReport};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub items: BTreeMap<String, i64>,
    pub webhooks: WebhookLogStats,
    pub encryption_key: Option<KeyStatus>,
}

#[derive(Serialize)]
pub struct KeyStatus {
    pub key_name: String,
    pub key_id: i64,
    pub version: i64,
    pub active: bool,
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    let db = &state.services.db;
    let key_name = state.services.cipher.key_name();

    let items = db
        .item_status_counts()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    let webhooks = db
        .webhook_log_stats()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    let key = db
        .latest_key(key_name)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        items: items.into_iter().collect(),
        webhooks,
        encryption_key: key.map(|k| KeyStatus {
            key_name: k.key_name,
            key_id: k.id,
            version: k.version,
            active: k.is_active,
        }),
    }))
}

pub async fn rotate_key(State(state): State<AppState>) -> ApiResult<Json<RotatedKey>> {
    let rotated = state
        .services
        .keys
        .rotate()
        .await
        .map_err(crate::error::ReconcileError::from)?;
    Ok(Json(rotated))
}

/// Exactly one of `client_id` (new connection) or `item_id` (update mode).
#[derive(Debug, Deserialize)]
pub struct LinkTokenRequestBody {
    pub client_id: Option<String>,
    pub item_id: Option<i64>,
}

pub async fn create_link_token(
    State(state): State<AppState>,
    Json(body): Json<LinkTokenRequestBody>,
) -> ApiResult<Json<LinkToken>> {
    let links = &state.services.links;
    let token = match (body.client_id, body.item_id) {
        (Some(client_id), None) => links.create_for_client(&client_id).await?,
        (None, Some(item_id)) => links.create_for_item(item_id).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of client_id or item_id".to_string(),
            ))
        }
    };
    Ok(Json(token))
}

pub async fn sync_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SyncReport>> {
    let report = state.services.syncer.sync_item(id).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct SweepParams {
    pub limit: Option<u32>,
}

pub async fn sync_sweep(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> ApiResult<Json<SweepReport>> {
    let limit = params
        .limit
        .unwrap_or_else(|| state.config.load().sync.sweep_batch);
    let report = state.services.syncer.sweep(limit).await?;
    Ok(Json(report))
}
