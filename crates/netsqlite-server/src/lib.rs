//! netsqlite server library logic.
//!
//! Two transports share one [`AppState`]: the JSON RPC router built by
//! [`app`] and the raw TCP protocol served by [`protocol::serve`].

pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;
pub mod protocol;
pub mod runtime;

use auth::TokenValidator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use netsqlite_db::PoolManager;
use netsqlite_types::rpc::{EXEC_PATH, PING_PATH, QUERY_PATH};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use runtime::ServerError;

/// Application state shared across all request handlers and raw sessions.
#[derive(Clone)]
pub struct AppState {
    /// Registry of per-database connection pools.
    pub manager: Arc<PoolManager>,
    /// Bearer token allow-list.
    pub validator: Arc<TokenValidator>,
}

/// Maximum request body size (8 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "databases": state.manager.len(),
    }))
}

/// Builds the RPC router.
///
/// `/health` is public; the three RPC routes sit behind
/// [`middleware::auth_middleware`].
pub fn app(state: AppState) -> Router {
    let rpc_routes = Router::new()
        .route(PING_PATH, post(api::ping_handler))
        .route(EXEC_PATH, post(api::exec_handler))
        .route(QUERY_PATH, post(api::query_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(rpc_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
