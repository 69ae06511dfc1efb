//! Decoder for `InfluxDB` annotated CSV query responses.
//!
//! A response holds one or more tables. Each table starts with a
//! `#datatype` annotation row followed by a header row; the first column of
//! every row is reserved for annotations and is empty on data rows. Empty
//! cells mean the column is absent for that row.
//!
//! Errors raised while the query runs arrive in-band as a table with the
//! columns `error` and `reference`.

use std::io::Read;

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};

use crate::error::{Error, Result};
use crate::event::TIME_COLUMN;
use crate::point::FieldValue;
use crate::store::QueryRecord;

/// Lazily decodes annotated CSV into [`QueryRecord`]s.
pub struct AnnotatedCsvRecords<R: Read> {
    rows: StringRecordsIntoIter<R>,
    datatypes: Vec<String>,
    columns: Option<Vec<String>>,
    error_table: bool,
    done: bool,
}

impl<R: Read> AnnotatedCsvRecords<R> {
    /// Creates a decoder over `reader`.
    pub fn new(reader: R) -> Self {
        let rows = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        Self {
            rows,
            datatypes: Vec::new(),
            columns: None,
            error_table: false,
            done: false,
        }
    }

    fn decode_row(&self, columns: &[String], row: &StringRecord) -> Result<QueryRecord> {
        let mut record = QueryRecord::default();
        for (index, name) in columns.iter().enumerate() {
            let cell = row.get(index + 1).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let datatype = self.datatypes.get(index).map_or("string", String::as_str);
            if name == TIME_COLUMN {
                record.time = Some(parse_time(cell)?);
            }
            record
                .values
                .insert(name.clone(), parse_cell(name, datatype, cell)?);
        }
        Ok(record)
    }
}

impl<R: Read> std::fmt::Debug for AnnotatedCsvRecords<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotatedCsvRecords")
            .field("columns", &self.columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R: Read> Iterator for AnnotatedCsvRecords<R> {
    type Item = Result<QueryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::storage_with_source(
                        "failed to read query response",
                        e,
                    )));
                }
            };

            let first = row.get(0).unwrap_or_default();
            if row.len() <= 1 && first.is_empty() {
                continue;
            }
            if first.starts_with('#') {
                if first == "#datatype" {
                    self.datatypes = row.iter().skip(1).map(str::to_string).collect();
                    self.columns = None;
                }
                continue;
            }

            let Some(columns) = self.columns.take() else {
                let columns: Vec<String> = row.iter().skip(1).map(str::to_string).collect();
                self.error_table = columns.first().is_some_and(|c| c == "error");
                self.columns = Some(columns);
                continue;
            };

            if self.error_table {
                self.done = true;
                let message = row.get(1).unwrap_or("query failed").to_string();
                return Some(Err(Error::query(message)));
            }

            let decoded = self.decode_row(&columns, &row);
            self.columns = Some(columns);
            if decoded.is_err() {
                self.done = true;
            }
            return Some(decoded);
        }
        None
    }
}

fn parse_time(cell: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(cell)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Serialization {
            message: format!("invalid {TIME_COLUMN} value {cell:?}: {e}"),
        })
}

#[allow(clippy::cast_precision_loss)]
fn parse_cell(name: &str, datatype: &str, cell: &str) -> Result<FieldValue> {
    let invalid = |e: &dyn std::fmt::Display| Error::Serialization {
        message: format!("invalid {datatype} value for column {name}: {e}"),
    };
    let value = match datatype {
        "boolean" => FieldValue::Bool(cell.parse::<bool>().map_err(|e| invalid(&e))?),
        "long" => FieldValue::Integer(cell.parse::<i64>().map_err(|e| invalid(&e))?),
        "unsignedLong" => {
            let value = cell.parse::<u64>().map_err(|e| invalid(&e))?;
            i64::try_from(value).map_or(FieldValue::Float(value as f64), FieldValue::Integer)
        }
        "double" => FieldValue::Float(cell.parse::<f64>().map_err(|e| invalid(&e))?),
        _ => FieldValue::Text(cell.to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TABLES: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,string,boolean,long\r
,result,table,_start,_stop,_time,_measurement,entityId,eventType,active,attempts\r
,_result,0,1970-01-01T00:00:00Z,2026-01-01T00:00:00Z,2024-01-01T10:00:00Z,Customer,c-1,login,true,3\r
,_result,0,1970-01-01T00:00:00Z,2026-01-01T00:00:00Z,2024-01-01T11:00:00Z,Customer,c-2,login,,\r
\r
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,string,double\r
,result,table,_start,_stop,_time,_measurement,entityId,eventType,ratio\r
,_result,1,1970-01-01T00:00:00Z,2026-01-01T00:00:00Z,2024-01-02T10:00:00Z,Order,o-1,paid,0.5\r
\r
";

    fn decode(body: &str) -> Vec<Result<QueryRecord>> {
        AnnotatedCsvRecords::new(body.as_bytes()).collect()
    }

    #[test]
    fn decodes_rows_across_tables() {
        let rows = decode(TWO_TABLES);
        assert_eq!(rows.len(), 3);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(
            first.values.get("active"),
            Some(&FieldValue::Bool(true))
        );
        assert_eq!(first.values.get("attempts"), Some(&FieldValue::Integer(3)));
        assert_eq!(
            first.time.map(|t| t.to_rfc3339()),
            Some("2024-01-01T10:00:00+00:00".to_string())
        );

        let second = rows[1].as_ref().unwrap();
        assert!(!second.values.contains_key("active"));
        assert!(!second.values.contains_key("attempts"));

        let third = rows[2].as_ref().unwrap();
        assert_eq!(third.values.get("ratio"), Some(&FieldValue::Float(0.5)));
        assert_eq!(
            third.values.get("_measurement"),
            Some(&FieldValue::Text("Order".into()))
        );
        assert!(!third.values.contains_key("active"));
    }

    #[test]
    fn in_band_error_is_yielded_after_rows() {
        let body = format!(
            "{TWO_TABLES}#datatype,string,string\r\n,error,reference\r\n,panic: runtime error,897\r\n"
        );
        let rows = decode(&body);
        assert_eq!(rows.len(), 4);
        assert!(rows[..3].iter().all(std::result::Result::is_ok));
        match &rows[3] {
            Err(Error::Query { message }) => assert_eq!(message, "panic: runtime error"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(decode("").is_empty());
        assert!(decode("\r\n").is_empty());
    }

    #[test]
    fn bad_cell_stops_the_stream() {
        let body = "#datatype,string,long,long\n,result,table,attempts\n,_result,0,many\n,_result,0,4\n";
        let rows = decode(body);
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0], Err(Error::Serialization { .. })));
    }
}
