//! Query execution against the shared engine
//!
//! Runs SQL on a connection to the registry's database and converts the
//! result into row objects that are always JSON-safe:
//!
//! - list and array cells become JSON arrays
//! - `inf`, `-inf` and `NaN` become `null`
//! - dates and timestamps become ISO-8601 strings
//!
//! Every engine error is reported as [`QueryBotError::ExecutionFailure`]
//! carrying the engine message. Result sets are materialised in full.

use duckdb::types::{TimeUnit, Value};
use duckdb::Connection;
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use tracing::{debug, info};

use crate::registry::DatasetRegistry;
use crate::{QueryBotError, Result};

/// A materialised result set, row-major
#[derive(Debug, Clone, Default)]
pub struct Rows {
    /// Column names in result order
    pub columns: Vec<String>,
    /// Rows as positional JSON values
    pub values: Vec<Vec<JsonValue>>,
}

impl Rows {
    /// Convert to one object per row keyed by column name
    pub fn into_records(self) -> Vec<Map<String, JsonValue>> {
        let columns = self.columns;
        self.values
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect()
    }
}

/// Outcome of a natural-language query
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// One object per result row
    pub result: Vec<Map<String, JsonValue>>,
    /// The SQL that produced `result`
    pub generated_query: String,
    /// Full text returned by the language model
    pub llm_response: String,
}

/// Run `sql` against every dataset in `registry`
pub fn execute(registry: &DatasetRegistry, sql: &str) -> Result<Rows> {
    let conn = registry.reader()?;
    let rows = fetch_rows(&conn, sql)
        .map_err(|e| QueryBotError::ExecutionFailure(e.to_string()))?;
    info!(
        "Query returned {} row(s), {} column(s)",
        rows.values.len(),
        rows.columns.len()
    );
    Ok(rows)
}

/// Run a statement and collect every row
pub(crate) fn fetch_rows(conn: &Connection, sql: &str) -> duckdb::Result<Rows> {
    debug!("Running SQL: {}", sql);
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            let value: Value = row.get(idx)?;
            record.push(value_to_json(value));
        }
        values.push(record);
    }

    Ok(Rows { columns, values })
}

fn float_to_json(v: f64) -> JsonValue {
    Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

/// Convert a single engine value to JSON
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(v) => JsonValue::Number(v.into()),
        Value::SmallInt(v) => JsonValue::Number(v.into()),
        Value::Int(v) => JsonValue::Number(v.into()),
        Value::BigInt(v) => JsonValue::Number(v.into()),
        Value::UTinyInt(v) => JsonValue::Number(v.into()),
        Value::USmallInt(v) => JsonValue::Number(v.into()),
        Value::UInt(v) => JsonValue::Number(v.into()),
        Value::UBigInt(v) => JsonValue::Number(v.into()),
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(small) => JsonValue::Number(small.into()),
            Err(_) => JsonValue::String(v.to_string()),
        },
        Value::Float(v) => float_to_json(v as f64),
        Value::Double(v) => float_to_json(v),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float_to_json)
            .unwrap_or(JsonValue::Null),
        Value::Text(s) => JsonValue::String(s),
        Value::Enum(s) => JsonValue::String(s),
        Value::Date32(days) => {
            let date = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)));
            match date {
                Some(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
                None => JsonValue::Null,
            }
        }
        Value::Timestamp(unit, v) => {
            match chrono::DateTime::from_timestamp_micros(to_micros(unit, v)) {
                Some(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
                None => JsonValue::Null,
            }
        }
        Value::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(t) => JsonValue::String(t.format("%H:%M:%S").to_string()),
                None => JsonValue::Null,
            }
        }
        Value::List(items) | Value::Array(items) => {
            JsonValue::Array(items.into_iter().map(value_to_json).collect())
        }
        Value::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        other => {
            debug!("Converting unsupported engine value to string: {:?}", other);
            JsonValue::String(format!("{:?}", other))
        }
    }
}
