//! Event queries.
//!
//! - `POST /query/events` - Return events matching the given filters

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;

use logtopus_core::event::{AuditEvent, events_from_records};
use logtopus_core::query::{FilterParams, build_query};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::metrics::record_events_returned;
use crate::server::AppState;

/// Creates the query route.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/query/events",
        post(query_events).fallback(super::method_not_allowed),
    )
}

/// Decodes the filter body. An empty body or `null` means no filters.
fn filter_params(body: &[u8]) -> Result<FilterParams, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FilterParams::new());
    }
    match serde_json::from_slice::<Value>(body).map_err(|e| ApiError::bad_request(e.to_string()))? {
        Value::Null => Ok(FilterParams::new()),
        Value::Object(params) => Ok(params),
        _ => Err(ApiError::bad_request("query body must be a JSON object")),
    }
}

/// Query audit events.
///
/// POST /api/v1/query/events
///
/// Every key except `_timeFrom` and `_timeTo` is an equality filter; all
/// filters must match.
#[utoipa::path(
    post,
    path = "/api/v1/query/events",
    tag = "events",
    request_body(content = std::collections::HashMap<String, serde_json::Value>, description = "Filter fields, plus optional `_timeFrom` / `_timeTo`"),
    responses(
        (status = 200, description = "Matching events", body = [AuditEvent]),
        (status = 400, description = "Malformed body or rejected filter value", body = crate::error::ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 405, description = "Method not allowed", body = crate::error::ApiErrorBody),
        (status = 500, description = "Store query failed", body = crate::error::ApiErrorBody),
    ),
    security(
        ("token" = [])
    )
)]
pub(crate) async fn query_events(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let params = filter_params(&body).map_err(|e| e.with_request_id(&ctx.request_id))?;
    let flux = build_query(&params, &state.config.influx.bucket, Utc::now())
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;

    let store_error = |e: logtopus_core::Error| {
        tracing::warn!(request_id = %ctx.request_id, error = %e, "event query failed");
        ApiError::store_query(e.to_string()).with_request_id(&ctx.request_id)
    };

    let records = state.store.query(&flux).await.map_err(store_error)?;
    let events = events_from_records(records)
        .collect::<logtopus_core::Result<Vec<_>>>()
        .map_err(store_error)?;

    record_events_returned(events.len());
    tracing::debug!(
        request_id = %ctx.request_id,
        filters = params.len(),
        returned = events.len(),
        "events queried"
    );
    Ok(Json(events))
}
