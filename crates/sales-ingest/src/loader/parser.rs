//! Snapshot text → typed records
//!
//! The header is matched by name: the five expected columns must each appear
//! exactly once, in any order, compared case-insensitively after trimming.
//! Data fields follow Postgres `COPY ... CSV`: text is kept verbatim, an
//! unquoted empty field is NULL and a quoted `""` is an empty string.
//! A snapshot that repeats an `id` is rejected rather than letting one of the
//! rows win arbitrarily.

use super::schema::COLUMNS;
use crate::error::{IngestError, IngestResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::HashMap;

/// Accepted `created_at` layouts; fractional seconds are optional in each.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// The same layouts followed by `Z` or a `±hh[:mm]` offset.
const OFFSET_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"];

/// One row of the snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesRecord {
    pub id: i32,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub amount: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
}

/// Position of each canonical column within the source header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap([usize; 5]);

impl ColumnMap {
    fn from_header(header: &StringRecord) -> IngestResult<Self> {
        let names: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
            .collect();

        if names.iter().all(|n| n.is_empty()) {
            return Err(IngestError::SchemaMismatch(format!(
                "snapshot has no header line; expected {}",
                expected_header()
            )));
        }

        let mut problems = Vec::new();

        let mut seen = HashMap::new();
        for name in &names {
            *seen.entry(name.as_str()).or_insert(0usize) += 1;
        }
        for (name, count) in &seen {
            if *count > 1 {
                problems.push(format!("duplicate column '{}'", name));
            }
            if !COLUMNS.iter().any(|c| c.name == *name) {
                problems.push(format!("unexpected column '{}'", name));
            }
        }

        let mut positions = [0usize; 5];
        for (slot, column) in COLUMNS.iter().enumerate() {
            match names.iter().position(|n| n == column.name) {
                Some(index) => positions[slot] = index,
                None => problems.push(format!("missing column '{}'", column.name)),
            }
        }

        if problems.is_empty() {
            Ok(Self(positions))
        } else {
            problems.sort();
            Err(IngestError::SchemaMismatch(format!(
                "{} (expected {})",
                problems.join(", "),
                expected_header()
            )))
        }
    }

    fn field<'r>(&self, record: &'r StringRecord, slot: usize) -> &'r str {
        record.get(self.0[slot]).unwrap_or_default()
    }
}

fn expected_header() -> String {
    COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(",")
}

/// Parse and type-check a whole snapshot
///
/// Fails on the first bad row; nothing is returned for a partially valid file.
pub fn parse_snapshot(text: &str) -> IngestResult<Vec<SalesRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(text.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| IngestError::SchemaMismatch(format!("unreadable header: {}", e)))?
        .clone();
    let columns = ColumnMap::from_header(&header)?;

    let mut records = Vec::new();
    let mut first_seen: HashMap<i32, u64> = HashMap::new();

    for (index, result) in reader.records().enumerate() {
        let row = index as u64 + 1;
        let record = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or_default();
            IngestError::row_format(row, line, e.to_string())
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.len() != header.len() {
            return Err(IngestError::row_format(
                row,
                line,
                format!("expected {} fields, found {}", header.len(), record.len()),
            ));
        }

        let quoted = if record.iter().any(str::is_empty) {
            record
                .position()
                .and_then(|p| text.get(p.byte() as usize..))
                .map(quoted_empty_fields)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let parsed = parse_record(&columns, &record, &quoted)
            .map_err(|reason| IngestError::row_format(row, line, reason))?;

        if let Some(previous) = first_seen.insert(parsed.id, row) {
            return Err(IngestError::row_format(
                row,
                line,
                format!("duplicate id {} (first seen in row {})", parsed.id, previous),
            ));
        }

        records.push(parsed);
    }

    Ok(records)
}

fn parse_record(
    columns: &ColumnMap,
    record: &StringRecord,
    quoted: &[bool],
) -> Result<SalesRecord, String> {
    let field = |slot: usize| {
        let index = columns.0[slot];
        let raw = columns.field(record, slot);
        let is_quoted = quoted.get(index).copied().unwrap_or(false);
        (!raw.is_empty() || is_quoted).then_some(raw)
    };

    let id = field(0).ok_or_else(|| "column 'id' is required".to_string())?;
    let id = id
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("column 'id': '{}' is not a 32-bit integer", id))?;

    Ok(SalesRecord {
        id,
        order_id: field(1).map(str::to_string),
        customer_id: field(2).map(str::to_string),
        amount: field(3).map(parse_amount).transpose()?,
        created_at: field(4).map(parse_timestamp).transpose()?,
    })
}

/// For the record starting at `raw`, which fields are exactly `""`
///
/// The csv reader yields an empty string for both `,,` and `,"",`; Postgres
/// reads the first as NULL and the second as an empty string. A record's
/// reported offset may still point at the previous line terminator.
fn quoted_empty_fields(raw: &str) -> Vec<bool> {
    let bytes = raw.trim_start_matches(['\r', '\n']).as_bytes();
    let mut flags = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut end = bytes.len();

    for (i, byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                flags.push(&bytes[start..i] == b"\"\"");
                start = i + 1;
            },
            b'\n' | b'\r' if !in_quotes => {
                end = i;
                break;
            },
            _ => {},
        }
    }
    flags.push(&bytes[start..end] == b"\"\"");
    flags
}

/// Surrounding whitespace is ignored, as Postgres numeric input does
fn parse_amount(raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(format!("column 'amount': '{}' is not a finite number", raw)),
        Err(_) => Err(format!("column 'amount': '{}' is not a number", raw)),
    }
}

/// An offset, if present, is dropped and the wall-clock time kept, which is
/// what Postgres does for `timestamp without time zone`.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    let value = raw.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }
    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Ok(ts.naive_local());
        }
    }
    if let Some(ts) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(ts);
    }
    Err(format!("column 'created_at': '{}' is not a timestamp", raw))
}
