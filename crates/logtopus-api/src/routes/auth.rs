//! Credential exchange.
//!
//! - `POST /auth` - Exchange a user/password pair for a token

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::audit::REASON_BAD_CREDENTIALS;
use crate::context::RequestId;
use crate::error::ApiError;
use crate::metrics::record_auth_denied;
use crate::server::AppState;

/// Message returned when the pair does not match.
pub const BAD_CREDENTIALS_MESSAGE: &str = "Invalid username / password combination";

/// Login request.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Credentials {
    /// User name.
    #[serde(default)]
    pub user: String,
    /// Password.
    #[serde(default)]
    pub pass: String,
}

/// Issued token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Signed token to send in the `Token` header.
    pub token: String,
}

/// Creates the auth route.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/auth",
        post(issue_token).fallback(super::method_not_allowed),
    )
}

/// Exchange credentials for a token.
///
/// POST /api/v1/auth
#[utoipa::path(
    post,
    path = "/api/v1/auth",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Malformed body", body = crate::error::ApiErrorBody),
        (status = 401, description = "Bad credentials", body = crate::error::ApiErrorBody),
        (status = 405, description = "Method not allowed", body = crate::error::ApiErrorBody),
        (status = 500, description = "Token could not be issued", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn issue_token(
    State(state): State<Arc<AppState>>,
    RequestId(request_id): RequestId,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Json<TokenResponse>, ApiError> {
    let resource = uri.path();
    let credentials: Credentials = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(e.to_string()).with_request_id(request_id.clone()))?;

    if !state
        .credentials
        .authenticate(&credentials.user, &credentials.pass)
        .await
    {
        record_auth_denied(REASON_BAD_CREDENTIALS);
        state
            .audit
            .login_deny(&credentials.user, resource, REASON_BAD_CREDENTIALS, &request_id);
        return Err(ApiError::unauthorized(BAD_CREDENTIALS_MESSAGE).with_request_id(request_id));
    }

    let Some(authority) = state.authority.as_deref() else {
        tracing::error!(request_id = %request_id, "token authority is not initialized");
        return Err(ApiError::signing_failed().with_request_id(request_id));
    };

    let token = authority.issue_token(&credentials.user).map_err(|e| {
        tracing::error!(request_id = %request_id, error = %e, "failed to issue token");
        ApiError::signing_failed().with_request_id(request_id.clone())
    })?;

    state.audit.login_allow(&credentials.user, resource, &request_id);
    Ok(Json(TokenResponse { token }))
}
