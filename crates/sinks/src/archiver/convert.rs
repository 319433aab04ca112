//! Record conversion against the table schema
//!
//! Each buffered record is a JSON object. Conversion reads every column of
//! the table from it, checks the value against the column type and either
//! appends a row or rejects the record with a `ConversionError`. A rejected
//! record never affects its neighbours.

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use bytes::Bytes;
use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::catalog::{Column, ColumnType, TableSchema};
use crate::error::ConversionError;
use crate::util::{Cell, ColumnBuffers};

/// Longest raw value quoted in a diagnostic
const MAX_FOUND_LENGTH: usize = 64;

/// Record that failed conversion
#[derive(Debug, Clone)]
pub(crate) struct Rejected {
    pub raw: Bytes,
    pub error: ConversionError,
}

/// Converted rows plus the records that did not fit
#[derive(Debug)]
pub(crate) struct Converted {
    pub batch: RecordBatch,
    pub rejected: Vec<Rejected>,
}

/// Convert a batch of raw JSON records to an Arrow record batch
pub(crate) fn convert_records(
    table: &TableSchema,
    records: &[Bytes],
) -> Result<Converted, ArrowError> {
    let mut buffers = ColumnBuffers::with_capacity(table, records.len());
    let mut rejected = Vec::new();

    for raw in records {
        match convert_record(table, raw) {
            Ok(row) => buffers.push_row(row)?,
            Err(error) => rejected.push(Rejected {
                raw: raw.clone(),
                error,
            }),
        }
    }

    Ok(Converted {
        batch: buffers.finish()?,
        rejected,
    })
}

/// Convert one record to a row of cells in column order
pub(crate) fn convert_record(table: &TableSchema, raw: &[u8]) -> Result<Vec<Cell>, ConversionError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ConversionError::Malformed(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ConversionError::Malformed(format!(
            "expected object, found {}",
            type_name(&value)
        )));
    };

    table
        .columns
        .iter()
        .map(|column| convert_column(column, &object))
        .collect()
}

fn convert_column(column: &Column, object: &Map<String, Value>) -> Result<Cell, ConversionError> {
    let value = match object.get(&column.name) {
        None | Some(Value::Null) => return Err(missing(column)),
        Some(Value::String(s)) if s.is_empty() => return Err(missing(column)),
        Some(v) => v,
    };

    match column.column_type {
        ColumnType::String => match value {
            Value::String(s) => Ok(Cell::Utf8(s.clone())),
            other => Err(mismatch(column, other)),
        },
        ColumnType::Timestamp => {
            let Value::String(s) = value else {
                return Err(mismatch(column, value));
            };
            DateTime::parse_from_rfc3339(s)
                .map(|dt| Cell::TimestampMicros(dt.timestamp_micros()))
                .map_err(|_| mismatch(column, value))
        }
        ColumnType::Decimal { precision, scale } => {
            let text = match value {
                Value::String(s) => s.clone(),
                // arbitrary_precision keeps the literal digits of the record
                Value::Number(n) => n.to_string(),
                other => return Err(mismatch(column, other)),
            };
            let decimal = parse_decimal(&text).ok_or_else(|| mismatch(column, value))?;
            if decimal.is_sign_negative() && !decimal.is_zero() {
                return Err(ConversionError::Negative {
                    column: column.name.clone(),
                    value: text,
                });
            }
            fit_decimal(column, decimal, precision, scale).map(Cell::Decimal)
        }
    }
}

/// Exact decimal parse; no float rounding
fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        Decimal::from_str_exact(text).ok()
    }
}

/// Mantissa at the column scale, or `OutOfRange` when digits would be lost
fn fit_decimal(
    column: &Column,
    decimal: Decimal,
    precision: u8,
    scale: i8,
) -> Result<i128, ConversionError> {
    let out_of_range = || ConversionError::OutOfRange {
        column: column.name.clone(),
        value: decimal.to_string(),
        precision,
        scale,
    };

    let target = u32::try_from(scale).map_err(|_| out_of_range())?;
    let normalized = decimal.normalize();
    if normalized.scale() > target {
        return Err(out_of_range());
    }

    let mut rescaled = normalized;
    rescaled.rescale(target);
    if rescaled.scale() != target {
        return Err(out_of_range());
    }

    let mantissa = rescaled.mantissa();
    if let Some(limit) = 10i128.checked_pow(u32::from(precision))
        && mantissa.abs() >= limit
    {
        return Err(out_of_range());
    }
    Ok(mantissa)
}

fn missing(column: &Column) -> ConversionError {
    ConversionError::MissingColumn {
        column: column.name.clone(),
    }
}

fn mismatch(column: &Column, value: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        column: column.name.clone(),
        expected: column.column_type.describe(),
        found: describe_value(value),
    }
}

fn describe_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => format!("\"{s}\""),
        Value::Number(n) => n.to_string(),
        other => return type_name(other).to_string(),
    };
    if text.chars().count() > MAX_FOUND_LENGTH {
        let truncated: String = text.chars().take(MAX_FOUND_LENGTH).collect();
        format!("{truncated}...")
    } else {
        text
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
