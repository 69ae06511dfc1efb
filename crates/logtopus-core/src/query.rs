//! Flux query construction for event lookups.
//!
//! A flat map of filter parameters becomes a `range` over the bucket, a pivot
//! that exposes fields as columns, and one `filter` conjoining an equality
//! predicate per parameter.
//!
//! Flux offers no bound parameters for this, so every interpolated value goes
//! through a strict grammar or an escaping routine:
//!
//! - time bounds must be RFC3339 timestamps, relative durations (`-1h30m`)
//!   or integer nanosecond timestamps (emitted as RFC3339)
//! - string literals and column names escape `\`, `"`, `${` and control
//!   characters
//! - composite values are compared against the JSON text the write path
//!   stores for them

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::event::{ENTITY_TYPE, MEASUREMENT_COLUMN, TIMESTAMP, list_item_text, narrow_float};
use crate::point::FieldValue;

/// Filter key selecting the inclusive start of the time range.
pub const TIME_FROM_PARAM: &str = "_timeFrom";
/// Filter key selecting the exclusive stop of the time range.
pub const TIME_TO_PARAM: &str = "_timeTo";

/// Range start used when `_timeFrom` is absent (the Unix epoch).
pub const DEFAULT_RANGE_START: &str = "0";

const DURATION_UNITS: [&str; 11] = ["mo", "ms", "us", "µs", "ns", "y", "w", "d", "h", "m", "s"];

/// Filter parameters as decoded from a request body.
pub type FilterParams = Map<String, Value>;

/// A filter value that cannot be expressed safely in a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A time bound did not match the accepted grammar.
    #[error(
        "{param} must be an RFC3339 timestamp, a relative duration such as -1h, or an integer nanosecond timestamp"
    )]
    InvalidTimeBound {
        /// The offending parameter name.
        param: String,
    },

    /// A filter value was null, which never matches a stored field.
    #[error("filter value for {field} must not be null")]
    NullFilter {
        /// The offending filter key.
        field: String,
    },
}

/// Builds the Flux query selecting events from `bucket` that match `params`.
///
/// `now` is the default stop of the range.
///
/// # Errors
///
/// Returns [`QueryError`] if a time bound or filter value is rejected.
pub fn build_query(
    params: &FilterParams,
    bucket: &str,
    now: DateTime<Utc>,
) -> Result<String, QueryError> {
    let start = match params.get(TIME_FROM_PARAM) {
        Some(value) => time_bound(TIME_FROM_PARAM, value)?,
        None => DEFAULT_RANGE_START.to_string(),
    };
    let stop = match params.get(TIME_TO_PARAM) {
        Some(value) => time_bound(TIME_TO_PARAM, value)?,
        None => now.to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    let mut keys: Vec<&String> = params
        .keys()
        .filter(|key| !matches!(key.as_str(), TIME_FROM_PARAM | TIME_TO_PARAM | TIMESTAMP))
        .collect();
    keys.sort();

    let mut predicates = Vec::with_capacity(keys.len());
    for key in keys {
        let value = &params[key.as_str()];
        let predicate = if key == ENTITY_TYPE {
            let measurement = match value {
                Value::Null => {
                    return Err(QueryError::NullFilter { field: key.clone() });
                }
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!(
                "r[{}] == {}",
                string_literal(MEASUREMENT_COLUMN),
                string_literal(&measurement)
            )
        } else {
            format!("r[{}] == {}", string_literal(key), value_literal(key, value)?)
        };
        predicates.push(predicate);
    }

    let mut query = format!(
        "import \"influxdata/influxdb/schema\"\n\nfrom(bucket: {})\n  |> range(start: {start}, stop: {stop})\n  |> schema.fieldsAsCols()",
        string_literal(bucket)
    );
    if !predicates.is_empty() {
        query.push_str("\n  |> filter(fn: (r) => ");
        query.push_str(&predicates.join(" and "));
        query.push(')');
    }

    tracing::debug!(query = %query, "built event query");
    Ok(query)
}

/// Renders a filter value as a Flux literal matching how it is stored.
fn value_literal(key: &str, value: &Value) -> Result<String, QueryError> {
    let literal = match value {
        Value::Null => {
            return Err(QueryError::NullFilter {
                field: key.to_string(),
            });
        }
        Value::Bool(value) => value.to_string(),
        Value::Number(number) => match number.as_i64() {
            Some(value) => value.to_string(),
            None => {
                let value = number.as_f64().unwrap_or(f64::NAN);
                match narrow_float(value) {
                    FieldValue::Integer(narrowed) => narrowed.to_string(),
                    _ => float_literal(value),
                }
            }
        },
        Value::String(text) => string_literal(text),
        Value::Array(items) => {
            let texts: Vec<String> = items.iter().cloned().map(list_item_text).collect();
            string_literal(&Value::from(texts).to_string())
        }
        Value::Object(map) => string_literal(&Value::Object(map.clone()).to_string()),
    };
    Ok(literal)
}

fn float_literal(value: f64) -> String {
    let mut text = value.to_string();
    if !text.contains('.') && !text.contains("inf") && !text.contains("NaN") {
        text.push_str(".0");
    }
    text
}

/// Quotes `value` as a Flux string literal.
#[must_use]
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Validates a time bound and renders it in canonical form.
fn time_bound(param: &str, value: &Value) -> Result<String, QueryError> {
    let invalid = || QueryError::InvalidTimeBound {
        param: param.to_string(),
    };
    match value {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true));
            }
            if is_relative_duration(text) {
                return Ok(text.clone());
            }
            text.parse::<i64>().map(nanos_bound).map_err(|_| invalid())
        }
        Value::Number(number) => number.as_i64().map(nanos_bound).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Flux reads a bare integer bound as Unix seconds, so nanosecond bounds are
/// rendered as timestamps instead.
fn nanos_bound(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Accepts Flux duration literals: an optional `-` then one or more
/// `<digits><unit>` groups.
fn is_relative_duration(text: &str) -> bool {
    let mut rest = text.strip_prefix('-').unwrap_or(text);
    if rest.is_empty() {
        return false;
    }
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        let Some(unit) = DURATION_UNITS.iter().find(|unit| rest.starts_with(**unit)) else {
            return false;
        };
        rest = &rest[unit.len()..];
    }
    true
}
