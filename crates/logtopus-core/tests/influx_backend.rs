//! Influx backend tests against an in-process fake server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use chrono::{TimeZone, Utc};
use serde_json::json;

use logtopus_core::prelude::*;

#[derive(Debug, Clone)]
struct Received {
    params: HashMap<String, String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Clone, Default)]
struct FakeInflux {
    writes: Arc<Mutex<Vec<Received>>>,
    queries: Arc<Mutex<Vec<Received>>>,
    reject_writes: bool,
    query_body: String,
}

async fn write_handler(
    State(fake): State<FakeInflux>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    fake.writes.lock().expect("lock").push(Received {
        params,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    if fake.reject_writes {
        (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"code": "invalid", "message": "unable to parse points"})),
        )
            .into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn query_handler(
    State(fake): State<FakeInflux>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    fake.queries.lock().expect("lock").push(Received {
        params,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    (StatusCode::OK, fake.query_body.clone())
}

async fn spawn_fake(fake: FakeInflux) -> Result<String> {
    let app = Router::new()
        .route("/api/v2/write", post(write_handler))
        .route("/api/v2/query", post(query_handler))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind fake influx")?;
    let addr = listener.local_addr().context("local addr")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn backend(url: String) -> Result<InfluxBackend> {
    InfluxBackend::new(InfluxConfig {
        url,
        token: "secret-token".to_string(),
        ..InfluxConfig::default()
    })
    .context("build backend")
}

fn sample_event() -> AuditEvent {
    AuditEvent {
        entity_id: "c-1".to_string(),
        entity_type: "Customer".to_string(),
        event_type: "login".to_string(),
        timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        details: [("attempts".to_string(), DetailValue::Float(2.0))]
            .into_iter()
            .collect(),
    }
}

#[tokio::test]
async fn write_point_posts_line_protocol() -> Result<()> {
    let fake = FakeInflux::default();
    let url = spawn_fake(fake.clone()).await?;
    let backend = backend(url)?;

    backend
        .write_point(sample_event().to_point()?)
        .await
        .context("write point")?;

    let writes = fake.writes.lock().expect("lock").clone();
    assert_eq!(writes.len(), 1);
    let write = &writes[0];
    assert_eq!(write.params.get("org").map(String::as_str), Some("Logtopus"));
    assert_eq!(write.params.get("bucket").map(String::as_str), Some("auditLog"));
    assert_eq!(write.params.get("precision").map(String::as_str), Some("ms"));
    assert_eq!(write.authorization.as_deref(), Some("Token secret-token"));
    assert_eq!(
        write.body,
        "Customer,eventType=login attempts=2i,entityId=\"c-1\" 1704067200000"
    );
    Ok(())
}

#[tokio::test]
async fn write_rejection_carries_store_message() -> Result<()> {
    let fake = FakeInflux {
        reject_writes: true,
        ..FakeInflux::default()
    };
    let url = spawn_fake(fake).await?;
    let backend = backend(url)?;

    let err = backend
        .write_point(sample_event().to_point()?)
        .await
        .expect_err("write should be rejected");
    match err {
        Error::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "unable to parse points");
        }
        other => anyhow::bail!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn query_decodes_rows_into_events() -> Result<()> {
    let fake = FakeInflux {
        query_body: "#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,string,long\r\n\
,result,table,_start,_stop,_time,_measurement,entityId,eventType,attempts\r\n\
,_result,0,1970-01-01T00:00:00Z,2026-01-01T00:00:00Z,2024-01-01T00:00:00Z,Customer,c-1,login,2\r\n\
\r\n"
            .to_string(),
        ..FakeInflux::default()
    };
    let url = spawn_fake(fake.clone()).await?;
    let backend = backend(url)?;

    let flux = build_query(&FilterParams::new(), "auditLog", Utc::now())?;
    let events: Vec<AuditEvent> = events_from_records(backend.query(&flux).await?)
        .collect::<logtopus_core::Result<_>>()?;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0], sample_event_with_integer_attempts());

    let queries = fake.queries.lock().expect("lock").clone();
    assert_eq!(queries.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&queries[0].body)?;
    assert_eq!(sent["query"], json!(flux));
    assert_eq!(sent["type"], "flux");
    assert_eq!(sent["dialect"]["annotations"], json!(["datatype"]));
    assert_eq!(queries[0].params.get("org").map(String::as_str), Some("Logtopus"));
    Ok(())
}

fn sample_event_with_integer_attempts() -> AuditEvent {
    let mut event = sample_event();
    event
        .details
        .insert("attempts".to_string(), DetailValue::Integer(2));
    event
}

#[tokio::test]
async fn query_reports_in_band_error_last() -> Result<()> {
    let fake = FakeInflux {
        query_body: "#datatype,string,string\r\n,error,reference\r\n,bucket not found,\r\n"
            .to_string(),
        ..FakeInflux::default()
    };
    let url = spawn_fake(fake).await?;
    let backend = backend(url)?;

    let results: Vec<_> = events_from_records(backend.query("from(bucket: \"x\")").await?).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], Err(Error::Query { message }) if message == "bucket not found"));
    Ok(())
}
