//! Point-store abstraction.
//!
//! The store is an external time-series database reached through
//! [`PointStore`]. Implementations must be safe for concurrent use by many
//! requests at once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::event::{MEASUREMENT_COLUMN, TIME_COLUMN};
use crate::point::{FieldValue, Point};

/// One pivoted result row: every tag and field as a column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRecord {
    /// Row timestamp (`_time`), if the row carried one.
    pub time: Option<DateTime<Utc>>,
    /// Column values by name. Absent columns are simply missing.
    pub values: BTreeMap<String, FieldValue>,
}

impl QueryRecord {
    /// Builds the row a pivoted query would return for `point`.
    #[must_use]
    pub fn from_point(point: &Point) -> Self {
        let mut values = BTreeMap::new();
        values.insert("result".to_string(), FieldValue::Text("_result".to_string()));
        values.insert("table".to_string(), FieldValue::Integer(0));
        values.insert(
            MEASUREMENT_COLUMN.to_string(),
            FieldValue::Text(point.measurement().to_string()),
        );
        if let Some(time) = point.timestamp() {
            values.insert(
                TIME_COLUMN.to_string(),
                FieldValue::Text(time.to_rfc3339()),
            );
        }
        for (key, value) in point.tags() {
            values.insert(key.clone(), FieldValue::Text(value.clone()));
        }
        for (key, value) in point.fields() {
            values.insert(key.clone(), value.clone());
        }
        Self {
            time: point.timestamp(),
            values,
        }
    }
}

/// A lazy sequence of result rows.
///
/// A read error found after the last row is yielded as the final item.
pub type RecordStream = Box<dyn Iterator<Item = Result<QueryRecord>> + Send>;

/// Storage for audit points.
#[async_trait]
pub trait PointStore: Send + Sync + 'static {
    /// Writes one point.
    async fn write_point(&self, point: Point) -> Result<()>;

    /// Runs a Flux query and streams the pivoted rows.
    async fn query(&self, flux: &str) -> Result<RecordStream>;

    /// Releases the connection. Calling it more than once has no effect.
    async fn close(&self);
}

/// In-memory point store for tests and local development.
///
/// Answers every query with all stored points as pivoted rows; the Flux text
/// is recorded but not evaluated.
#[derive(Debug, Default, Clone)]
pub struct MemoryPointStore {
    points: Arc<RwLock<Vec<Point>>>,
    queries: Arc<RwLock<Vec<String>>>,
    write_failure: Option<String>,
    query_failure: Option<String>,
    trailing_failure: Option<String>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with a store rejection carrying `message`.
    #[must_use]
    pub fn failing_writes(mut self, message: impl Into<String>) -> Self {
        self.write_failure = Some(message.into());
        self
    }

    /// Makes every query fail up front with `message`.
    #[must_use]
    pub fn failing_queries(mut self, message: impl Into<String>) -> Self {
        self.query_failure = Some(message.into());
        self
    }

    /// Appends a read error after the last row of every query.
    #[must_use]
    pub fn with_trailing_error(mut self, message: impl Into<String>) -> Self {
        self.trailing_failure = Some(message.into());
        self
    }

    /// Returns a snapshot of the stored points.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn points(&self) -> Result<Vec<Point>> {
        let points = self.points.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(points.clone())
    }

    /// Returns every query received so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn queries(&self) -> Result<Vec<String>> {
        let queries = self.queries.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(queries.clone())
    }

    /// Returns how many times [`PointStore::close`] released the store.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn write_point(&self, point: Point) -> Result<()> {
        if let Some(message) = &self.write_failure {
            return Err(Error::Rejected {
                status: 400,
                message: message.clone(),
            });
        }
        // Same validation the wire encoding applies.
        point.to_line_protocol()?;

        let mut points = self.points.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        points.push(point);
        Ok(())
    }

    async fn query(&self, flux: &str) -> Result<RecordStream> {
        self.queries
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .push(flux.to_string());

        if let Some(message) = &self.query_failure {
            return Err(Error::query(message.clone()));
        }

        let rows: Vec<Result<QueryRecord>> = self
            .points()?
            .iter()
            .map(|point| Ok(QueryRecord::from_point(point)))
            .chain(
                self.trailing_failure
                    .clone()
                    .map(|message| Err(Error::query(message))),
            )
            .collect();
        Ok(Box::new(rows.into_iter()))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point() -> Point {
        Point::new("Customer")
            .with_tag("eventType", "login")
            .with_field("entityId", FieldValue::Text("c-1".into()))
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn from_point_pivots_tags_and_fields() {
        let record = QueryRecord::from_point(&point());
        assert_eq!(
            record.values.get(MEASUREMENT_COLUMN),
            Some(&FieldValue::Text("Customer".into()))
        );
        assert_eq!(
            record.values.get("eventType"),
            Some(&FieldValue::Text("login".into()))
        );
        assert_eq!(
            record.values.get("entityId"),
            Some(&FieldValue::Text("c-1".into()))
        );
        assert!(record.time.is_some());
    }

    #[tokio::test]
    async fn memory_store_writes_and_queries() -> Result<()> {
        let store = MemoryPointStore::new();
        store.write_point(point()).await?;
        store.write_point(point()).await?;

        let rows: Vec<_> = store.query("from(bucket: \"b\")").await?.collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(std::result::Result::is_ok));
        assert_eq!(store.queries()?, vec!["from(bucket: \"b\")".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_trailing_error_comes_last() -> Result<()> {
        let store = MemoryPointStore::new().with_trailing_error("boom");
        store.write_point(point()).await?;

        let rows: Vec<_> = store.query("q").await?.collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(Error::Query { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_rejects_configured_writes() {
        let store = MemoryPointStore::new().failing_writes("unable to parse");
        let err = store.write_point(point()).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { status: 400, .. }));
        assert!(store.points().unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_counts_closes() {
        let store = MemoryPointStore::new();
        let handle = store.clone();
        store.close().await;
        assert_eq!(handle.close_count(), 1);
    }
}
