//! Route modules for Permastore Server

pub mod health;
pub mod packages;
pub mod search;
pub mod transactions;
pub mod wallet;

use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::ledger::is_valid_transaction_id;
use crate::state::AppState;
use crate::usage::track_usage;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config().server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/version", get(health::version_info))
        .nest("/api/v1/wallet", wallet::router())
        .nest("/api/v1/transactions", transactions::router())
        .nest("/api/v1/search", search::router())
        .nest("/api/v1/packages", packages::router())
        // Only matched routes report usage
        .route_layer(middleware::from_fn_with_state(state.clone(), track_usage))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub(crate) fn require_transaction_id(id: &str) -> Result<()> {
    if is_valid_transaction_id(id) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid transaction id {:?}: expected 43 base64url characters",
            id
        )))
    }
}

/// Wallet addresses share the shape of transaction ids.
pub(crate) fn require_address(address: &str) -> Result<()> {
    if is_valid_transaction_id(address) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid wallet address {:?}: expected 43 base64url characters",
            address
        )))
    }
}
