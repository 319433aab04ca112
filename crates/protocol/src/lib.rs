//! Tally Protocol - Canonical event types shared by both pipeline paths
//!
//! This crate provides the types that flow through the pipeline:
//! - `InboundEvent` - The "transaction-initiated" envelope as it arrives from the bus
//! - `TransactionEvent` - The canonical seven-field unit of work
//! - `ProcessedEvent` - The "transaction-processed" payload emitted downstream
//! - `OutboundEvent` - The envelope a `ProcessedEvent` is published in
//!
//! # Wire Shapes
//!
//! ```text
//! inbound:   { id, time, detail: { customer-id, initiated-at, from-account,
//!                                  to-account, transaction-amount } }
//! canonical: { transaction_id, customer_id, received_datetime, requested_datetime,
//!              source_account, destination_account, total_amount }
//! ```
//!
//! Amounts are `rust_decimal::Decimal` end to end and serialize as JSON
//! strings, so currency scale survives every hop (`"125.50"` stays `"125.50"`).

mod envelope;
mod error;
mod event;

pub use envelope::{InboundEvent, OutboundEvent, detail_field};
pub use error::ProtocolError;
pub use event::{ProcessedEvent, TransactionEvent, format_timestamp};

pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Number of columns in the canonical transaction layout
pub const TRANSACTION_FIELD_COUNT: usize = 7;

/// Canonical field names in schema order
pub const TRANSACTION_FIELDS: [&str; TRANSACTION_FIELD_COUNT] = [
    "transaction_id",
    "customer_id",
    "received_datetime",
    "requested_datetime",
    "source_account",
    "destination_account",
    "total_amount",
];
