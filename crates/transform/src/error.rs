//! Transform error types
//!
//! Errors that can occur while mapping an inbound envelope.

use thiserror::Error;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Errors that can occur during transformation
///
/// A transform error means the input is malformed: the event is dropped with
/// a diagnostic and never retried.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Required field absent, null, or empty
    #[error("missing required field: {field}")]
    MissingField {
        /// Path of the field in the inbound envelope
        field: &'static str,
    },

    /// Field present but cannot be coerced to the canonical type
    #[error("type mismatch for {field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Path of the field in the inbound envelope
        field: &'static str,
        /// What the canonical schema requires
        expected: &'static str,
        /// What was actually received (truncated)
        found: String,
    },

    /// Input is not a JSON document
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Longest rendering of an offending value kept in an error
const MAX_FOUND_LENGTH: usize = 64;

impl TransformError {
    /// Create a missing field error
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Create a type mismatch error, truncating the offending value
    pub fn mismatch(field: &'static str, expected: &'static str, found: impl Into<String>) -> Self {
        let mut found = found.into();
        if found.len() > MAX_FOUND_LENGTH {
            let mut cut = MAX_FOUND_LENGTH;
            while !found.is_char_boundary(cut) {
                cut -= 1;
            }
            found.truncate(cut);
            found.push_str("...");
        }
        Self::TypeMismatch {
            field,
            expected,
            found,
        }
    }

    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidJson(_) => "invalid_json",
        }
    }
}
