//! Request context extraction and the token gate.
//!
//! Gated routes require a `Token` header carrying a JWT issued by
//! `/api/v1/auth`. The header name is fixed; `Authorization: Bearer` is not
//! consulted.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::State;
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ulid::Ulid;

use crate::audit::{REASON_AUTHORITY_UNAVAILABLE, REASON_MISSING_TOKEN};
use crate::error::ApiError;
use crate::metrics::record_auth_denied;
use crate::server::AppState;

/// Header carrying the token on gated routes.
pub const TOKEN_HEADER: &str = "Token";

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Message returned when the token header is absent.
pub const MISSING_TOKEN_MESSAGE: &str = "missing \"Token\" in header";

/// Correlation id of the current request.
///
/// Taken from `X-Request-Id` when the caller supplies one, otherwise a new ULID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self(header_string(headers, REQUEST_ID_HEADER).unwrap_or_else(|| Ulid::new().to_string()))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }
        let id = Self::from_headers(&parts.headers);
        parts.extensions.insert(id.clone());
        Ok(id)
    }
}

/// Per-request context of an authenticated caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identity the token was issued to.
    pub identity: String,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let RequestId(request_id) = RequestId::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});
        let resource = parts.uri.path().to_string();

        let ctx = authenticate(&parts.headers, state, &resource, request_id)?;
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn authenticate(
    headers: &HeaderMap,
    state: &AppState,
    resource: &str,
    request_id: String,
) -> Result<RequestContext, ApiError> {
    let Some(raw) = headers.get(TOKEN_HEADER) else {
        deny(state, resource, REASON_MISSING_TOKEN, &request_id);
        return Err(ApiError::unauthorized(MISSING_TOKEN_MESSAGE).with_request_id(request_id));
    };

    let Some(authority) = state.authority.as_deref() else {
        tracing::error!(request_id = %request_id, "token authority is not initialized");
        deny(state, resource, REASON_AUTHORITY_UNAVAILABLE, &request_id);
        return Err(ApiError::authority_unavailable().with_request_id(request_id));
    };

    let verified = raw
        .to_str()
        .map_err(|_| crate::auth::TokenError::Malformed)
        .and_then(|token| authority.verify_token(token));

    match verified {
        Ok(claims) => {
            state
                .audit
                .auth_allow(&claims.issued_to, resource, &request_id);
            Ok(RequestContext {
                identity: claims.issued_to,
                request_id,
            })
        }
        Err(err) => {
            tracing::info!(
                request_id = %request_id,
                resource = %resource,
                error = ?err,
                "token rejected"
            );
            deny(state, resource, err.reason(), &request_id);
            Err(ApiError::unauthorized(err.public_message()).with_request_id(request_id))
        }
    }
}

fn deny(state: &AppState, resource: &str, reason: &'static str, request_id: &str) {
    record_auth_denied(reason);
    state.audit.auth_deny(resource, reason, request_id);
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Token gate middleware.
///
/// Runs before method dispatch on gated routes and injects a verified
/// [`RequestContext`] into request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
