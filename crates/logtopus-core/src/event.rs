//! The audit event model.
//!
//! An [`AuditEvent`] arrives as loosely typed JSON, is validated and
//! normalized once, and converted to a [`Point`] for the store. Reading goes
//! the other way: every pivoted result row becomes one event.
//!
//! Detail values are a closed set of variants ([`DetailValue`]) so the write
//! coercions are exhaustive:
//!
//! - integral floats are narrowed to integers
//! - lists become lists of strings (lossy for mixed element types)
//! - nested objects become an embedded JSON string
//! - nulls are dropped with a warning

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::point::{FieldValue, Point};
use crate::store::{QueryRecord, RecordStream};

/// Event field holding the entity identifier; stored as a point field.
pub const ENTITY_ID: &str = "entityId";
/// Event field holding the entity type; stored as the point measurement.
pub const ENTITY_TYPE: &str = "entityType";
/// Event field holding the event type; stored as a point tag.
pub const EVENT_TYPE: &str = "eventType";
/// Event field holding the event time.
pub const TIMESTAMP: &str = "timestamp";

/// Result column carrying the measurement.
pub const MEASUREMENT_COLUMN: &str = "_measurement";
/// Result column carrying the point time.
pub const TIME_COLUMN: &str = "_time";

/// Result columns that never surface as event details.
pub const HIDDEN_COLUMNS: [&str; 6] = ["_measurement", "_start", "_stop", "_time", "result", "table"];

/// Message attached to every missing required field.
pub const REQUIRED_FIELD_MESSAGE: &str = "required field missing value";

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Creates a "required field missing value" error for `field`.
    #[must_use]
    pub fn required(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: REQUIRED_FIELD_MESSAGE.to_string(),
        }
    }
}

/// A dynamically typed detail value.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailValue {
    /// JSON boolean.
    Bool(bool),
    /// Integral JSON number.
    Integer(i64),
    /// Non-integral (or out of `i64` range) JSON number.
    Float(f64),
    /// JSON string.
    Text(String),
    /// JSON array, elements rendered as strings.
    List(Vec<String>),
    /// Nested JSON object.
    Object(Map<String, Value>),
    /// JSON null.
    Null,
}

impl DetailValue {
    /// Converts the value into a point field following the write coercions.
    ///
    /// Returns `Ok(None)` for nulls, which are not stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a nested object cannot be serialized.
    pub fn to_field_value(&self) -> Result<Option<FieldValue>> {
        let value = match self {
            Self::Bool(value) => FieldValue::Bool(*value),
            Self::Integer(value) => FieldValue::Integer(*value),
            Self::Float(value) => narrow_float(*value),
            Self::Text(value) => FieldValue::Text(value.clone()),
            Self::List(values) => FieldValue::TextList(values.clone()),
            Self::Object(map) => {
                let encoded = serde_json::to_string(map).map_err(|e| Error::Encoding {
                    message: format!("cannot serialize nested detail: {e}"),
                })?;
                FieldValue::Text(encoded)
            }
            Self::Null => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl From<Value> for DetailValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Self::Integer(value)
                } else {
                    Self::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(value) => Self::Text(value),
            Value::Array(items) => Self::List(items.into_iter().map(list_item_text).collect()),
            Value::Object(map) => Self::Object(map),
        }
    }
}

impl From<FieldValue> for DetailValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(value) => Self::Bool(value),
            FieldValue::Integer(value) => Self::Integer(value),
            FieldValue::Float(value) => Self::Float(value),
            FieldValue::Text(value) => Self::Text(value),
            FieldValue::TextList(values) => Self::List(values),
        }
    }
}

impl Serialize for DetailValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::List(values) => values.serialize(serializer),
            Self::Object(map) => map.serialize(serializer),
            Self::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for DetailValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

/// Renders a list element the way lists are stored: strings verbatim,
/// everything else as its JSON text.
pub(crate) fn list_item_text(value: Value) -> String {
    match value {
        Value::String(value) => value,
        other => other.to_string(),
    }
}

/// Narrows a float to an integer when it is integral and in `i64` range.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn narrow_float(value: f64) -> FieldValue {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    if value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value < i64::MAX as f64
    {
        FieldValue::Integer(value as i64)
    } else {
        FieldValue::Float(value)
    }
}

/// The canonical unit of audit data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Identifies the actor or source. Required.
    #[serde(default)]
    pub entity_id: String,
    /// Grouping category; stored as the measurement.
    #[serde(default)]
    pub entity_type: String,
    /// Kind of event; stored as an indexed tag. Required.
    #[serde(default)]
    pub event_type: String,
    /// When the event happened. Defaulted to "now" by [`AuditEvent::normalize`].
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form details.
    #[serde(default, deserialize_with = "nullable_details")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub details: BTreeMap<String, DetailValue>,
}

fn nullable_details<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, DetailValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BTreeMap<String, DetailValue>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl AuditEvent {
    /// Reports every missing required field. Does not modify the event.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.entity_id.is_empty() {
            errors.push(FieldError::required(ENTITY_ID));
        }
        if self.event_type.is_empty() {
            errors.push(FieldError::required(EVENT_TYPE));
        }
        errors
    }

    /// Applies defaults: an absent or zero timestamp becomes `now`.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.timestamp.is_none_or(is_zero_time) {
            self.timestamp = Some(now);
        }
    }

    /// Converts the event into a point for the store.
    ///
    /// Measurement is `entityType`, the only tag is `eventType`, and the
    /// fields are `entityId` plus the coerced details. Details named after a
    /// reserved column are dropped so they cannot shadow the canonical
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a nested object cannot be serialized.
    pub fn to_point(&self) -> Result<Point> {
        let mut point = Point::new(self.entity_type.as_str())
            .with_tag(EVENT_TYPE, self.event_type.as_str())
            .with_field(ENTITY_ID, FieldValue::Text(self.entity_id.clone()));

        for (key, value) in &self.details {
            if is_reserved_key(key) {
                tracing::warn!(field = %key, "dropping detail that collides with a reserved column");
                continue;
            }
            match value.to_field_value()? {
                Some(field) => point = point.with_field(key.as_str(), field),
                None => tracing::warn!(field = %key, "dropping null detail value"),
            }
        }

        if let Some(timestamp) = self.timestamp {
            point = point.with_timestamp(timestamp);
        }
        Ok(point)
    }

    /// Rebuilds an event from one pivoted result row.
    ///
    /// Missing columns yield empty strings; hidden columns are discarded and
    /// every other column becomes a detail.
    #[must_use]
    pub fn from_record(record: QueryRecord) -> Self {
        let QueryRecord { time, mut values } = record;

        let entity_type = take_text(&mut values, MEASUREMENT_COLUMN);
        let entity_id = take_text(&mut values, ENTITY_ID);
        let event_type = take_text(&mut values, EVENT_TYPE);

        let details = values
            .into_iter()
            .filter(|(key, _)| !HIDDEN_COLUMNS.contains(&key.as_str()))
            .map(|(key, value)| (key, DetailValue::from(value)))
            .collect();

        Self {
            entity_id,
            entity_type,
            event_type,
            timestamp: time,
            details,
        }
    }
}

/// Lazily converts a record stream into events, one per row.
///
/// A read error reported by the stream is passed through in order, so a
/// failure discovered after the last row surfaces as the final item.
pub fn events_from_records(records: RecordStream) -> impl Iterator<Item = Result<AuditEvent>> + Send {
    records.map(|record| record.map(AuditEvent::from_record))
}

fn is_reserved_key(key: &str) -> bool {
    key == ENTITY_ID || key == EVENT_TYPE || HIDDEN_COLUMNS.contains(&key)
}

fn is_zero_time(ts: DateTime<Utc>) -> bool {
    // 0001-01-01T00:00:00Z, the zero value many clients send for "unset".
    ts.timestamp() == -62_135_596_800 && ts.timestamp_subsec_nanos() == 0
}

fn take_text(values: &mut BTreeMap<String, FieldValue>, key: &str) -> String {
    match values.remove(key) {
        Some(FieldValue::Text(text)) => text,
        Some(FieldValue::Integer(value)) => value.to_string(),
        Some(FieldValue::Float(value)) => value.to_string(),
        Some(FieldValue::Bool(value)) => value.to_string(),
        Some(FieldValue::TextList(values)) => values.join(","),
        None => String::new(),
    }
}
