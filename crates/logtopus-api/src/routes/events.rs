//! Event ingestion.
//!
//! - `POST /events` - Validate and store one audit event

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;

use logtopus_core::event::AuditEvent;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::metrics::record_event_written;
use crate::server::AppState;

/// Creates the ingestion route.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/events",
        post(create_event).fallback(super::method_not_allowed),
    )
}

/// Store an audit event.
///
/// POST /api/v1/events
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "events",
    request_body = AuditEvent,
    responses(
        (status = 200, description = "Event stored"),
        (status = 400, description = "Malformed body, missing fields or store rejection", body = crate::error::ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 405, description = "Method not allowed", body = crate::error::ApiErrorBody),
        (status = 500, description = "Token authority unavailable", body = crate::error::ApiErrorBody),
    ),
    security(
        ("token" = [])
    )
)]
pub(crate) async fn create_event(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let mut event: AuditEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(e.to_string()).with_request_id(&ctx.request_id))?;

    let problems = event.validate();
    if !problems.is_empty() {
        return Err(ApiError::validation(&problems).with_request_id(&ctx.request_id));
    }
    event.normalize(Utc::now());

    let point = event
        .to_point()
        .map_err(|e| ApiError::bad_request(e.to_string()).with_request_id(&ctx.request_id))?;

    state.store.write_point(point).await.map_err(|e| {
        tracing::warn!(request_id = %ctx.request_id, error = %e, "event write failed");
        ApiError::store_write(e.to_string()).with_request_id(&ctx.request_id)
    })?;

    record_event_written();
    tracing::debug!(
        request_id = %ctx.request_id,
        identity = %ctx.identity,
        entity_type = %event.entity_type,
        event_type = %event.event_type,
        "event stored"
    );
    Ok(StatusCode::OK)
}
