//! JSON rendering of result rows.
//!
//! 64-bit integers are written as decimal strings so they survive JSON
//! consumers that read every number as a double.

use sqlbridge_core::{Result, Row, Value};
use std::fmt::Write;

/// Convert a single value.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::BigInt(i) => serde_json::Value::String(i.to_string()),
        Value::Double(f) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Value::Decimal(s) | Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex(b)),
        Value::Uuid(u) => {
            let hex = hex(u);
            serde_json::Value::String(format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            ))
        }
        Value::Json(j) => j.clone(),
        Value::Array(values) => serde_json::Value::Array(values.iter().map(value_to_json).collect()),
    }
}

/// Convert a row to an object keyed by column name.
///
/// With duplicate column names the last one wins.
pub fn row_to_json(row: &Row) -> serde_json::Value {
    let object = row
        .iter()
        .map(|(name, value)| (name.to_string(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(object)
}

/// Convert rows to an array of objects.
pub fn rows_to_json(rows: &[Row]) -> serde_json::Value {
    serde_json::Value::Array(rows.iter().map(row_to_json).collect())
}

/// Serialize rows to a JSON string.
#[allow(clippy::result_large_err)]
pub fn rows_to_json_string(rows: &[Row]) -> Result<String> {
    Ok(serde_json::to_string(&rows_to_json(rows))?)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
