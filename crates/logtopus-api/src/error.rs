//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use logtopus_core::event::FieldError;
use logtopus_core::query::QueryError;

use crate::context::REQUEST_ID_HEADER;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure categories and the status each one maps to.
///
/// Every [`ApiError`] is built from one of these, so moving a category to a
/// different status is a one-line change in [`ErrorClass::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed JSON, missing required fields, rejected filter values.
    ClientInput,
    /// Missing, malformed, expired or otherwise invalid credentials.
    Authentication,
    /// Wrong HTTP method on a known path.
    MethodNotAllowed,
    /// The token authority failed to initialize.
    AuthorityUnavailable,
    /// The store refused or failed a write.
    StoreWrite,
    /// The store failed a query or its result stream.
    StoreQuery,
    /// A token could not be issued.
    Signing,
}

impl ErrorClass {
    /// Returns the outward status code for this class.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::ClientInput | Self::StoreWrite => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::AuthorityUnavailable | Self::StoreQuery | Self::Signing => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    const fn code(self) -> &'static str {
        match self {
            Self::ClientInput => "BAD_REQUEST",
            Self::Authentication => "UNAUTHORIZED",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::AuthorityUnavailable => "AUTHORITY_UNAVAILABLE",
            Self::StoreWrite => "STORE_WRITE_FAILED",
            Self::StoreQuery => "STORE_QUERY_FAILED",
            Self::Signing => "SIGNING_FAILED",
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Structured details, e.g. a list of field errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    class: ErrorClass,
    message: String,
    details: Option<Value>,
    request_id: Option<String>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::ClientInput, message)
    }

    /// Returns a 400 listing every rejected field.
    #[must_use]
    pub fn validation(errors: &[FieldError]) -> Self {
        let mut error = Self::bad_request("bad request body");
        error.details = serde_json::to_value(errors).ok();
        error
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Authentication, message)
    }

    /// Returns an error response when the server cannot verify tokens at all.
    #[must_use]
    pub fn authority_unavailable() -> Self {
        Self::new(
            ErrorClass::AuthorityUnavailable,
            "Can't authenticate your request, please contact an administrator.",
        )
    }

    /// Returns an error response when a token could not be issued.
    #[must_use]
    pub fn signing_failed() -> Self {
        Self::new(
            ErrorClass::Signing,
            "An error occurred while issuing your token. Please contact an administrator.",
        )
    }

    /// Returns an error response for a failed store write.
    pub fn store_write(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::StoreWrite, message)
    }

    /// Returns an error response for a failed store query.
    pub fn store_query(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::StoreQuery, message)
    }

    /// Returns an error response for an unsupported method.
    #[must_use]
    pub fn method_not_allowed() -> Self {
        Self::new(ErrorClass::MethodNotAllowed, "Method Not Allowed")
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.class
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.class.status()
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured details, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Returns the request ID, if one was attached.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.class.code()
    }

    fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let request_id = self.request_id;
        let mut response = (
            status,
            Json(ApiErrorBody {
                code: code.to_string(),
                message: self.message,
                details: self.details,
                request_id: request_id.clone(),
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
        }

        response
    }
}

impl From<QueryError> for ApiError {
    fn from(value: QueryError) -> Self {
        Self::bad_request(value.to_string())
    }
}
