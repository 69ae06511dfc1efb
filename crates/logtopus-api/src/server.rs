//! API server implementation.
//!
//! Provides health, metrics, and the `/api/v1` audit-event endpoints.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use logtopus_core::Result;
use logtopus_core::store::{MemoryPointStore, PointStore};

use crate::audit::AuditEmitter;
use crate::auth::TokenAuthority;
use crate::config::{Config, CorsConfig};
use crate::context::REQUEST_ID_HEADER;
use crate::credentials::{CredentialStore, StaticCredentials};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// Health Response
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Point store for events.
    pub store: Arc<dyn PointStore>,
    /// Token authority; `None` when the key pair could not be loaded.
    pub authority: Option<Arc<TokenAuthority>>,
    /// Credential check for the token exchange.
    pub credentials: Arc<dyn CredentialStore>,
    /// Security audit trail.
    pub audit: AuditEmitter,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &"<PointStore>")
            .field("authority", &self.authority)
            .field("credentials", &"<CredentialStore>")
            .finish_non_exhaustive()
    }
}

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. Does not touch the store.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// Server
// ============================================================================

/// The Logtopus API server.
pub struct Server {
    config: Config,
    store: Arc<dyn PointStore>,
    authority: Option<Arc<TokenAuthority>>,
    credentials: Arc<dyn CredentialStore>,
    audit: AuditEmitter,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("store", &"<PointStore>")
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            authority: self.authority.clone(),
            credentials: Arc::clone(&self.credentials),
            audit: self.audit.clone(),
        });

        let cors = self.build_cors_layer();
        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        // The gate is a route layer so it also covers the method fallback.
        let api = crate::routes::public_routes()
            .merge(crate::routes::gated_routes().route_layer(auth_layer));

        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .nest("/api/v1", api)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            // Middleware (order matters): metrics outermost for timing, then trace.
            .layer(cors)
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Builds the CORS layer from configuration.
    fn build_cors_layer(&self) -> CorsLayer {
        let cors_config = &self.config.cors;
        let cors = Self::build_cors_base(cors_config);
        Self::apply_cors_allowed_origins(cors, cors_config)
    }

    fn build_cors_base(cors_config: &CorsConfig) -> CorsLayer {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static("token"),
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_LENGTH,
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .max_age(Duration::from_secs(cors_config.max_age_seconds))
    }

    fn cors_allows_any_origin(cors_config: &CorsConfig) -> bool {
        cors_config.allowed_origins.len() == 1
            && cors_config
                .allowed_origins
                .first()
                .is_some_and(|origin| origin == "*")
    }

    fn apply_cors_allowed_origins(cors: CorsLayer, cors_config: &CorsConfig) -> CorsLayer {
        if cors_config.allowed_origins.is_empty() {
            return cors;
        }

        if Self::cors_allows_any_origin(cors_config) {
            return cors.allow_origin(Any);
        }

        let allowed: Vec<HeaderValue> = cors_config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) if origin != "*" => Some(value),
                _ => {
                    tracing::error!(origin = %origin, "Invalid CORS origin; ignoring");
                    None
                }
            })
            .collect();

        if allowed.is_empty() {
            tracing::warn!("All configured CORS origins were invalid; disabling CORS");
            cors
        } else {
            tracing::info!(origins = ?cors_config.allowed_origins, "CORS configured");
            cors.allow_origin(AllowOrigin::list(allowed))
        }
    }

    /// Binds the configured address and serves until `shutdown` turns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the address cannot be bound.
    pub async fn serve(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.validate_config()?;

        let listener = TcpListener::bind(&self.config.http_addr)
            .await
            .map_err(|e| logtopus_core::Error::Internal {
                message: format!("failed to bind to {}: {e}", self.config.http_addr),
            })?;

        self.serve_with_listener(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` turns `true`.
    ///
    /// Dropping the sender also counts as a shutdown request. After that no
    /// new connections are accepted and in-flight
    /// requests get the configured grace period. The store is closed once
    /// when serving ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while accepting connections.
    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        crate::metrics::init_metrics();

        let router = self.create_router();
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, debug = self.config.debug, "Starting Logtopus API server");
        }

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_requested(shutdown.clone()))
            .into_future();
        tokio::pin!(server);

        let result = tokio::select! {
            result = &mut server => result.map_err(|e| logtopus_core::Error::Internal {
                message: format!("server error: {e}"),
            }),
            () = async {
                shutdown_requested(shutdown).await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed; abandoning in-flight requests");
                Ok(())
            }
        };

        self.store.close().await;
        tracing::info!("Logtopus API server stopped");
        result
    }

    /// Creates a test router for the server.
    ///
    /// This is useful for integration tests where you want to test
    /// the routes without actually binding to a port.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    fn validate_config(&self) -> Result<()> {
        if !self.config.debug
            && self
                .config
                .cors
                .allowed_origins
                .iter()
                .any(|origin| origin == "*")
        {
            return Err(logtopus_core::Error::InvalidInput(
                "cors.allowed_origins cannot include '*' when debug=false".to_string(),
            ));
        }
        if self.authority.is_none() {
            tracing::warn!("no token authority configured; gated routes will answer 500");
        }
        Ok(())
    }
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    store: Arc<dyn PointStore>,
    authority: Option<Arc<TokenAuthority>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    audit: AuditEmitter,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("store", &"<PointStore>")
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            store: Arc::new(MemoryPointStore::new()),
            authority: None,
            credentials: None,
            audit: AuditEmitter::with_tracing(),
        }
    }
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the listen address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Enables debug mode.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Sets the point store.
    ///
    /// By default, the server uses an in-memory store intended only for tests/dev.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PointStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the token authority.
    #[must_use]
    pub fn authority(mut self, authority: Arc<TokenAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Sets the credential check. Defaults to the configured static pair.
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the audit emitter.
    #[must_use]
    pub fn audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = audit;
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(StaticCredentials::from(&self.config.credentials)) as Arc<dyn CredentialStore>
        });
        Server {
            config: self.config,
            store: self.store,
            authority: self.authority,
            credentials,
            audit: self.audit,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() -> Result<()> {
        let server = ServerBuilder::new().build();
        let router = server.test_router();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .context("build request")?;

        let response = router.oneshot(request).await.map_err(|err| match err {})?;

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .context("read response body")?;
        let health: HealthResponse = serde_json::from_slice(&body).context("parse JSON body")?;
        assert_eq!(health.status, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_rejects_other_methods() -> Result<()> {
        let router = ServerBuilder::new().build().test_router();

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/auth")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.map_err(|err| match err {})?;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .context("read response body")?;
        let json: serde_json::Value = serde_json::from_slice(&body).context("parse JSON body")?;
        assert_eq!(json["message"], "Method Not Allowed");
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() -> Result<()> {
        let router = ServerBuilder::new().build().test_router();

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/auth")
            .header("content-type", "application/json")
            .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
            .context("build request")?;
        let response = router.oneshot(request).await.map_err(|err| match err {})?;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        Ok(())
    }

    #[test]
    fn test_wildcard_cors_requires_debug() {
        let mut config = Config::default();
        config.cors.allowed_origins = vec!["*".to_string()];
        let server = ServerBuilder::new().config(config).build();
        assert!(server.validate_config().is_err());

        let mut config = Config::default();
        config.debug = true;
        config.cors.allowed_origins = vec!["*".to_string()];
        let server = ServerBuilder::new().config(config).build();
        assert!(server.validate_config().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_store_once() -> Result<()> {
        let store = MemoryPointStore::new();
        let server = ServerBuilder::new()
            .store(Arc::new(store.clone()))
            .build();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind listener")?;
        let (stop, shutdown) = watch::channel(false);

        let serving =
            tokio::spawn(async move { server.serve_with_listener(listener, shutdown).await });
        stop.send(true).context("signal shutdown")?;
        serving
            .await
            .context("join server task")?
            .context("serve")?;

        assert_eq!(store.close_count(), 1);
        Ok(())
    }
}
