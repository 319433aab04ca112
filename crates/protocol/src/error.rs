//! Protocol error types

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised when a canonical event violates its invariants
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required string field is empty
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Amount is below zero
    #[error("total_amount must be non-negative, got {0}")]
    NegativeAmount(Decimal),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
