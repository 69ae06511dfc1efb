//! # logtopus-api
//!
//! HTTP layer of the Logtopus audit-event service.
//!
//! - **Authentication**: credential exchange for Ed25519-signed tokens and
//!   the `Token` header gate in front of the event routes
//! - **Routing**: ingestion and query endpoints over a [`PointStore`]
//! - **Observability**: request tracing, Prometheus metrics, security audit log
//!
//! ## Endpoints
//!
//! ```text
//! GET  /health              - Health check
//! GET  /metrics             - Prometheus metrics
//! POST /api/v1/auth         - Exchange credentials for a token
//! POST /api/v1/events       - Store an audit event (token required)
//! POST /api/v1/query/events - Query audit events (token required)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use logtopus_api::server::Server;
//! use tokio::sync::watch;
//!
//! let server = Server::builder()
//!     .http_addr("0.0.0.0:5000")
//!     .authority(authority)
//!     .build();
//!
//! let (_stop, shutdown) = watch::channel(false);
//! server.serve(shutdown).await?;
//! ```
//!
//! [`PointStore`]: logtopus_core::store::PointStore

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{TokenAuthority, TokenError};
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::Server;
}
