//! `OpenAPI` specification generation for `logtopus-api`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// `OpenAPI` documentation for the Logtopus REST API (`/api/v1/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Logtopus API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Audit event ingestion and query API"
    ),
    paths(
        crate::routes::auth::issue_token,
        crate::routes::events::create_event,
        crate::routes::query::query_events,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::auth::Credentials,
            crate::routes::auth::TokenResponse,
            logtopus_core::event::AuditEvent,
            logtopus_core::event::FieldError,
        )
    ),
    tags(
        (name = "auth", description = "Token exchange"),
        (name = "events", description = "Audit event ingestion and queries"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                crate::context::TOKEN_HEADER,
                "Token issued by POST /api/v1/auth",
            ))),
        );
    }
}

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Returns the generated `OpenAPI` spec serialized as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails (should not happen).
pub fn openapi_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&openapi())
}
