//! Tally - Transform
//!
//! Maps the bus envelope onto the canonical `TransactionEvent`.
//!
//! # Overview
//!
//! The transformer is the single consumer of the inbound shape. It:
//! - Extracts fields by fixed path (`id`, `time`, `detail.*`)
//! - Renames them to the canonical schema
//! - Coerces types: amount to an exact decimal, timestamps to UTC
//!
//! ```text
//! { id, time, detail: { customer-id, initiated-at, from-account, to-account, transaction-amount } }
//!                                   │
//!                                   ▼
//! TransactionEvent { transaction_id, customer_id, received_datetime, requested_datetime,
//!                    source_account, destination_account, total_amount }
//! ```
//!
//! # Design Principles
//!
//! - **Pure**: no I/O, no shared state, deterministic for a given input
//! - **Thread-safe**: free functions, callable from any task concurrently
//! - **All-or-nothing**: either a fully valid event or a single `TransformError`
//!
//! # Example
//!
//! ```ignore
//! let event = tally_transform::transform_bytes(br#"{"id":"t-1", ...}"#)?;
//! ```

mod error;
mod transformer;

pub use error::TransformError;
pub use transformer::{FIELD_MAP, FieldSource, transform, transform_bytes};

/// Result type for transform operations
pub type Result<T> = std::result::Result<T, TransformError>;
