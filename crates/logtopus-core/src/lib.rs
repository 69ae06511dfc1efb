//! # logtopus-core
//!
//! Domain layer of the Logtopus audit-event service.
//!
//! - **Event Model**: [`event::AuditEvent`], validation, normalization and the
//!   conversions to and from store points
//! - **Query Builder**: [`query::build_query`] compiles filter parameters into Flux
//! - **Point Store**: the [`store::PointStore`] trait with an in-memory
//!   implementation and an `InfluxDB` v2 backend
//! - **Observability**: logging initialization shared by the binaries
//!
//! ## Example
//!
//! ```rust
//! use logtopus_core::prelude::*;
//!
//! let event: AuditEvent = serde_json::from_str(
//!     r#"{"entityId": "c-1", "entityType": "Customer", "eventType": "login"}"#,
//! ).unwrap();
//! assert!(event.validate().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod annotated_csv;
pub mod error;
pub mod event;
pub mod influx;
pub mod observability;
pub mod point;
pub mod query;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{AuditEvent, DetailValue, FieldError, events_from_records};
    pub use crate::influx::{InfluxBackend, InfluxConfig};
    pub use crate::point::{FieldValue, Point};
    pub use crate::query::{FilterParams, QueryError, build_query};
    pub use crate::store::{MemoryPointStore, PointStore, QueryRecord, RecordStream};
}

pub use error::{Error, Result};
