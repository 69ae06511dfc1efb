//! HTTP route handlers.

pub mod auth;
pub mod events;
pub mod query;

use std::sync::Arc;

use axum::Router;

use crate::error::ApiError;
use crate::server::AppState;

/// `/api/v1` routes reachable without a token.
pub fn public_routes() -> Router<Arc<AppState>> {
    auth::routes()
}

/// `/api/v1` routes behind the token gate.
pub fn gated_routes() -> Router<Arc<AppState>> {
    Router::new().merge(events::routes()).merge(query::routes())
}

/// Fallback for known paths hit with an unsupported method.
pub(crate) async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
