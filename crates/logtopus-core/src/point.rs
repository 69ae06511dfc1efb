//! Time-series points and their line-protocol encoding.
//!
//! A [`Point`] is one timestamped record bound for the store: a measurement,
//! a set of tags (indexed labels) and a set of typed fields.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// A typed field value as stored on a point.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean field.
    Bool(bool),
    /// Signed 64-bit integer field.
    Integer(i64),
    /// 64-bit floating point field.
    Float(f64),
    /// String field.
    Text(String),
    /// List of strings; stored as a JSON array string.
    TextList(Vec<String>),
}

impl FieldValue {
    fn write_line_protocol(&self, out: &mut String) -> Result<()> {
        match self {
            Self::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
            Self::Integer(value) => {
                let _ = write!(out, "{value}i");
            }
            Self::Float(value) => {
                if !value.is_finite() {
                    return Err(Error::Encoding {
                        message: format!("non-finite float field value: {value}"),
                    });
                }
                let _ = write!(out, "{value}");
            }
            Self::Text(value) => push_string_literal(out, value),
            Self::TextList(values) => {
                let encoded = serde_json::to_string(values)?;
                push_string_literal(out, &encoded);
            }
        }
        Ok(())
    }
}

/// One timestamped record written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<DateTime<Utc>>,
}

impl Point {
    /// Creates an empty point for the given measurement.
    #[must_use]
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Sets the point timestamp. Without one the store assigns its own time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns the measurement name.
    #[must_use]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Returns the tag set.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the field set.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Returns the timestamp, if set.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Encodes the point as one line of `InfluxDB` line protocol with
    /// millisecond timestamp precision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the point has no measurement, no fields,
    /// or a field value that line protocol cannot carry.
    pub fn to_line_protocol(&self) -> Result<String> {
        if self.measurement.is_empty() {
            return Err(Error::Encoding {
                message: "point measurement is empty".to_string(),
            });
        }
        if self.fields.is_empty() {
            return Err(Error::Encoding {
                message: "point has no fields".to_string(),
            });
        }

        let mut line = String::with_capacity(64);
        push_escaped(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            // Empty tag values are not representable.
            if value.is_empty() {
                continue;
            }
            line.push(',');
            push_escaped(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            push_escaped(&mut line, value, &[',', '=', ' ']);
        }

        line.push(' ');
        for (index, (key, value)) in self.fields.iter().enumerate() {
            if index > 0 {
                line.push(',');
            }
            push_escaped(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            value.write_line_protocol(&mut line)?;
        }

        if let Some(timestamp) = self.timestamp {
            let _ = write!(line, " {}", timestamp.timestamp_millis());
        }

        Ok(line)
    }
}

fn push_escaped(out: &mut String, value: &str, special: &[char]) {
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn push_string_literal(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn encodes_tags_fields_and_millisecond_timestamp() {
        let point = Point::new("Customer")
            .with_tag("eventType", "login")
            .with_field("entityId", FieldValue::Text("c-1".into()))
            .with_field("attempts", FieldValue::Integer(3))
            .with_field("ratio", FieldValue::Float(0.5))
            .with_field("active", FieldValue::Bool(true))
            .with_timestamp(ts());

        let line = point.to_line_protocol().unwrap();
        assert_eq!(
            line,
            format!(
                "Customer,eventType=login active=true,attempts=3i,entityId=\"c-1\",ratio=0.5 {}",
                ts().timestamp_millis()
            )
        );
    }

    #[test]
    fn escapes_special_characters() {
        let point = Point::new("my measurement,x")
            .with_tag("event type", "a=b")
            .with_field("note", FieldValue::Text("say \"hi\" \\ bye".into()));

        let line = point.to_line_protocol().unwrap();
        assert_eq!(
            line,
            r#"my\ measurement\,x,event\ type=a\=b note="say \"hi\" \\ bye""#
        );
    }

    #[test]
    fn text_list_is_stored_as_json_string() {
        let point = Point::new("m").with_field(
            "tags",
            FieldValue::TextList(vec!["a".into(), "1".into()]),
        );
        let line = point.to_line_protocol().unwrap();
        assert_eq!(line, r#"m tags="[\"a\",\"1\"]""#);
    }

    #[test]
    fn rejects_points_without_fields_or_measurement() {
        assert!(matches!(
            Point::new("m").to_line_protocol(),
            Err(Error::Encoding { .. })
        ));
        assert!(matches!(
            Point::new("")
                .with_field("x", FieldValue::Bool(true))
                .to_line_protocol(),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn newlines_in_keys_cannot_split_lines() {
        let point = Point::new("m\nother").with_field("k\n", FieldValue::Integer(1));
        let line = point.to_line_protocol().unwrap();
        assert!(!line.contains('\n'));
    }
}
