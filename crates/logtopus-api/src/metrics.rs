//! Metrics middleware and instrumentation for the Logtopus API.
//!
//! Provides Prometheus metrics for:
//! - Request duration and throughput
//! - Events written and returned
//! - Authentication denials by reason

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ============================================================================
// Metric Names
// ============================================================================

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "logtopus_api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "logtopus_api_requests_total";

/// Events accepted by the store.
pub const EVENTS_WRITTEN: &str = "logtopus_events_written_total";

/// Events returned by queries.
pub const EVENTS_RETURNED: &str = "logtopus_events_returned_total";

/// Requests rejected by the token gate or the credential check.
pub const AUTH_DENIED: &str = "logtopus_auth_denied_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// Returns `None` if another recorder was already installed by someone else.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }

    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install prometheus recorder");
            return PROMETHEUS_HANDLE.get().cloned();
        }
    };

    describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
    describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
    describe_counter!(EVENTS_WRITTEN, "Total number of audit events written");
    describe_counter!(EVENTS_RETURNED, "Total number of audit events returned by queries");
    describe_counter!(AUTH_DENIED, "Total number of rejected authentication attempts");

    tracing::info!("Prometheus metrics recorder initialized");
    Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// ============================================================================
// Metrics Middleware
// ============================================================================

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Captures:
/// - `logtopus_api_request_duration_seconds{endpoint, method, status_class}`
/// - `logtopus_api_requests_total{endpoint, method, status_class}`
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status_class = status_class(response.status());

    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    if duration > 1.0 {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = %response.status().as_u16(),
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

/// Returns the status class (2xx, 3xx, 4xx, 5xx) for a status code.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

// ============================================================================
// Metrics Endpoint
// ============================================================================

/// Handler for the `/metrics` endpoint.
///
/// Returns Prometheus-formatted metrics text.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Records one event accepted by the store.
///
/// Unlabelled; every event field is caller-controlled.
pub fn record_event_written() {
    counter!(EVENTS_WRITTEN).increment(1);
}

/// Records the number of events a query returned.
pub fn record_events_returned(count: usize) {
    counter!(EVENTS_RETURNED).increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Records a rejected authentication attempt.
pub fn record_auth_denied(reason: &'static str) {
    counter!(AUTH_DENIED, "reason" => reason).increment(1);
}
