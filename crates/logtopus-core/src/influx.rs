//! `InfluxDB` v2 point store over HTTP.
//!
//! Writes use line protocol with millisecond precision; queries are Flux and
//! come back as annotated CSV decoded by [`crate::annotated_csv`].

use std::io::Cursor;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::annotated_csv::AnnotatedCsvRecords;
use crate::error::{Error, Result};
use crate::observability::store_span;
use crate::point::Point;
use crate::store::{PointStore, RecordStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Connection parameters for an `InfluxDB` v2 server.
#[derive(Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://localhost:8086`.
    pub url: String,
    /// API token sent as `Authorization: Token <token>`.
    #[serde(default)]
    pub token: String,
    /// Organization name.
    pub org: String,
    /// Bucket holding audit points.
    pub bucket: String,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "Logtopus".to_string(),
            bucket: "auditLog".to_string(),
            timeout_secs: 60,
            insecure_skip_verify: false,
        }
    }
}

impl std::fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("timeout_secs", &self.timeout_secs)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Point store backed by the `InfluxDB` v2 HTTP API.
pub struct InfluxBackend {
    config: InfluxConfig,
    client: RwLock<Option<reqwest::Client>>,
}

impl std::fmt::Debug for InfluxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl InfluxBackend {
    /// Creates a backend for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: InfluxConfig) -> Result<Self> {
        if config.insecure_skip_verify {
            tracing::warn!(url = %config.url, "TLS certificate verification disabled for store");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| Error::storage_with_source("failed to build store client", e))?;
        Ok(Self {
            config,
            client: RwLock::new(Some(client)),
        })
    }

    /// Returns the connection parameters.
    #[must_use]
    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    fn client(&self) -> Result<reqwest::Client> {
        let guard = self.client.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        guard
            .clone()
            .ok_or_else(|| Error::storage("store connection is closed"))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }

    fn token_header(&self) -> String {
        format!("Token {}", self.config.token)
    }
}

#[async_trait]
impl PointStore for InfluxBackend {
    async fn write_point(&self, point: Point) -> Result<()> {
        let line = point.to_line_protocol()?;
        let client = self.client()?;

        async move {
            let response = client
                .post(self.endpoint("/api/v2/write"))
                .query(&[
                    ("org", self.config.org.as_str()),
                    ("bucket", self.config.bucket.as_str()),
                    ("precision", "ms"),
                ])
                .header(AUTHORIZATION, self.token_header())
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(line)
                .send()
                .await
                .map_err(|e| Error::storage_with_source("write request failed", e))?;

            if response.status().is_success() {
                return Ok(());
            }
            Err(rejection(response).await)
        }
        .instrument(store_span("write_point", &self.config.bucket))
        .await
    }

    async fn query(&self, flux: &str) -> Result<RecordStream> {
        let client = self.client()?;
        let body = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "annotations": ["datatype"],
                "delimiter": ",",
                "dateTimeFormat": "RFC3339",
            },
        });

        async move {
            let response = client
                .post(self.endpoint("/api/v2/query"))
                .query(&[("org", self.config.org.as_str())])
                .header(AUTHORIZATION, self.token_header())
                .header(ACCEPT, "application/csv")
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::storage_with_source("query request failed", e))?;

            if !response.status().is_success() {
                return Err(rejection(response).await);
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::storage_with_source("failed to read query response", e))?;
            let records: RecordStream =
                Box::new(AnnotatedCsvRecords::new(Cursor::new(bytes.to_vec())));
            Ok(records)
        }
        .instrument(store_span("query", &self.config.bucket))
        .await
    }

    async fn close(&self) {
        let released = match self.client.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        };
        if released {
            tracing::info!(url = %self.config.url, "store connection closed");
        }
    }
}

async fn rejection(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
    Error::Rejected { status, message }
}
