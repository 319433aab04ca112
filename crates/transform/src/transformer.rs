//! Envelope field extraction and coercion

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tally_protocol::{TransactionEvent, detail_field};

use crate::{Result, TransformError};

#[cfg(test)]
#[path = "transformer_test.rs"]
mod tests;

/// Where a canonical field is read from in the inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Top-level envelope key
    Envelope(&'static str),
    /// Key inside the `detail` object
    Detail(&'static str),
}

impl FieldSource {
    fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Envelope(key) => root.get(*key),
            Self::Detail(key) => root.get("detail").and_then(|d| d.get(*key)),
        }
    }
}

/// Canonical field name, envelope source, and the path used in diagnostics
///
/// Order matches the canonical column layout.
pub const FIELD_MAP: [(&str, FieldSource, &str); 7] = [
    ("transaction_id", FieldSource::Envelope("id"), "id"),
    (
        "customer_id",
        FieldSource::Detail(detail_field::CUSTOMER_ID),
        "detail.customer-id",
    ),
    ("received_datetime", FieldSource::Envelope("time"), "time"),
    (
        "requested_datetime",
        FieldSource::Detail(detail_field::INITIATED_AT),
        "detail.initiated-at",
    ),
    (
        "source_account",
        FieldSource::Detail(detail_field::FROM_ACCOUNT),
        "detail.from-account",
    ),
    (
        "destination_account",
        FieldSource::Detail(detail_field::TO_ACCOUNT),
        "detail.to-account",
    ),
    (
        "total_amount",
        FieldSource::Detail(detail_field::TRANSACTION_AMOUNT),
        "detail.transaction-amount",
    ),
];

/// Transform raw JSON bytes into a canonical event
pub fn transform_bytes(raw: &[u8]) -> Result<TransactionEvent> {
    let value: Value = serde_json::from_slice(raw)?;
    transform(&value)
}

/// Transform an inbound envelope into a canonical event
///
/// Fails with the first missing or uncoercible field, in canonical column
/// order, so the same input always yields the same error.
pub fn transform(raw: &Value) -> Result<TransactionEvent> {
    if !raw.is_object() {
        return Err(TransformError::mismatch("$", "object", type_name(raw)));
    }
    if let Some(detail) = raw.get("detail")
        && !detail.is_null()
        && !detail.is_object()
    {
        return Err(TransformError::mismatch("detail", "object", type_name(detail)));
    }

    let [tx, customer, received, requested, from, to, amount] = FIELD_MAP;

    Ok(TransactionEvent {
        transaction_id: string_field(raw, tx.1, tx.2)?,
        customer_id: string_field(raw, customer.1, customer.2)?,
        received_datetime: timestamp_field(raw, received.1, received.2)?,
        requested_datetime: timestamp_field(raw, requested.1, requested.2)?,
        source_account: string_field(raw, from.1, from.2)?,
        destination_account: string_field(raw, to.1, to.2)?,
        total_amount: amount_field(raw, amount.1, amount.2)?,
    })
}

/// Look up a field, treating null and blank strings as absent
fn present<'a>(root: &'a Value, source: FieldSource, path: &'static str) -> Result<&'a Value> {
    match source.lookup(root) {
        None | Some(Value::Null) => Err(TransformError::missing(path)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(TransformError::missing(path)),
        Some(value) => Ok(value),
    }
}

fn string_field(root: &Value, source: FieldSource, path: &'static str) -> Result<String> {
    match present(root, source, path)? {
        Value::String(s) => Ok(s.clone()),
        // Numeric identifiers are common upstream; keep their exact text
        Value::Number(n) => Ok(n.to_string()),
        other => Err(TransformError::mismatch(path, "string", type_name(other))),
    }
}

fn timestamp_field(root: &Value, source: FieldSource, path: &'static str) -> Result<DateTime<Utc>> {
    match present(root, source, path)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| TransformError::mismatch(path, "RFC 3339 timestamp", s.as_str())),
        other => Err(TransformError::mismatch(
            path,
            "RFC 3339 timestamp",
            type_name(other),
        )),
    }
}

fn amount_field(root: &Value, source: FieldSource, path: &'static str) -> Result<Decimal> {
    let text = match present(root, source, path)? {
        Value::String(s) => s.trim().to_string(),
        // arbitrary_precision keeps the literal digits of the input, so the
        // number never passes through an f64
        Value::Number(n) => n.to_string(),
        other => {
            return Err(TransformError::mismatch(
                path,
                "non-negative decimal",
                type_name(other),
            ));
        }
    };

    let amount = parse_decimal(&text)
        .ok_or_else(|| TransformError::mismatch(path, "non-negative decimal", text.as_str()))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(TransformError::mismatch(path, "non-negative decimal", text));
    }

    Ok(amount)
}

/// Parse plain or scientific notation without going through a float
///
/// `from_str_exact` refuses to round, so amounts with more precision than a
/// `Decimal` can hold are rejected instead of silently truncated.
fn parse_decimal(text: &str) -> Option<Decimal> {
    let plain = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'));
    if plain {
        Decimal::from_str_exact(text).ok()
    } else if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        None
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
