//! Inbound provider webhook route.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::storage::DeliveryWindows;
use crate::webhooks::WebhookRejection;

/// 200 once logged, 400 for non-object bodies, 503 when redelivery is needed.
pub async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let windows = {
        let config = state.config.load();
        DeliveryWindows {
            reclaim_after: Duration::from_secs(config.webhooks.reclaim_after_secs),
            dedup_window: Duration::from_secs(config.webhooks.dedup_window_secs),
        }
    };

    match state.services.webhooks.handle(&body, windows).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(WebhookRejection::Malformed) => {
            ApiError::BadRequest("body must be a JSON object".to_string()).into_response()
        }
        Err(WebhookRejection::Unavailable(reason)) => ApiError::Unavailable(reason).into_response(),
    }
}
