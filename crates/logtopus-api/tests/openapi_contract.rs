//! Structural checks on the generated `OpenAPI` document.

use anyhow::{Context, Result};
use serde_json::Value;

fn document() -> Result<Value> {
    let json = logtopus_api::openapi::openapi_json().context("serialize OpenAPI")?;
    serde_json::from_str(&json).context("parse OpenAPI JSON")
}

#[test]
fn every_route_is_documented_as_post() -> Result<()> {
    let doc = document()?;
    let paths = doc["paths"].as_object().context("paths missing")?;

    let mut names: Vec<_> = paths.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        ["/api/v1/auth", "/api/v1/events", "/api/v1/query/events"]
    );
    for (path, item) in paths {
        assert!(item.get("post").is_some(), "{path} has no POST operation");
    }
    Ok(())
}

#[test]
fn gated_routes_require_the_token_header() -> Result<()> {
    let doc = document()?;

    let scheme = &doc["components"]["securitySchemes"]["token"];
    assert_eq!(scheme["type"], "apiKey");
    assert_eq!(scheme["in"], "header");
    assert_eq!(scheme["name"], "Token");

    for path in ["/api/v1/events", "/api/v1/query/events"] {
        let security = &doc["paths"][path]["post"]["security"];
        assert!(
            security
                .as_array()
                .is_some_and(|reqs| reqs.iter().any(|r| r.get("token").is_some())),
            "{path} is not gated"
        );
    }
    assert!(doc["paths"]["/api/v1/auth"]["post"]["security"].is_null());
    Ok(())
}

#[test]
fn error_body_and_event_schemas_are_published() -> Result<()> {
    let doc = document()?;
    let schemas = doc["components"]["schemas"]
        .as_object()
        .context("schemas missing")?;
    for name in ["ApiErrorBody", "AuditEvent", "Credentials", "TokenResponse", "FieldError"] {
        assert!(schemas.contains_key(name), "schema {name} missing");
    }

    let event = &schemas["AuditEvent"]["properties"];
    for field in ["entityId", "entityType", "eventType", "timestamp", "details"] {
        assert!(event.get(field).is_some(), "AuditEvent.{field} missing");
    }
    Ok(())
}
