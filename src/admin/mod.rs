//! Operator API on a separate listener.
//!
//! | Route                          | Action                              |
//! |--------------------------------|-------------------------------------|
//! | `GET  /admin/status`           | item counts, webhook log, key state |
//! | `POST /admin/keys/rotate`      | new key version, cache cleared      |
//! | `POST /admin/link-tokens`      | create- or update-mode link token   |
//! | `POST /admin/items/{id}/sync`  | pull transactions for one item      |
//! | `POST /admin/sync/sweep`       | pull for items flagged for sync     |
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::routing::{get, post};
use axum::{middleware, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/keys/rotate", post(rotate_key))
        .route("/admin/link-tokens", post(create_link_token))
        .route("/admin/items/{id}/sync", post(sync_item))
        .route("/admin/sync/sweep", post(sync_sweep))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
