//! Inbound "transaction-initiated" envelope
//!
//! The bus delivers events as `{ id, time, detail: { ... } }`. The transformer
//! is the only consumer that reads this shape; `InboundEvent` exists so that
//! producers (tests, the CLI, replay tooling) can build well-formed input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names inside the envelope's `detail` object
pub mod detail_field {
    pub const CUSTOMER_ID: &str = "customer-id";
    pub const INITIATED_AT: &str = "initiated-at";
    pub const FROM_ACCOUNT: &str = "from-account";
    pub const TO_ACCOUNT: &str = "to-account";
    pub const TRANSACTION_AMOUNT: &str = "transaction-amount";
}

/// Inbound event envelope as published on the bus
///
/// `detail` is kept as raw JSON: coercion and validation belong to the
/// transformer, not to deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Bus-assigned event id, becomes `transaction_id`
    pub id: String,

    /// Time the bus accepted the event (RFC 3339)
    pub time: String,

    /// Producer name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Event type label, informational only
    #[serde(
        rename = "detail-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub detail_type: Option<String>,

    /// Domain payload
    pub detail: Value,
}

impl InboundEvent {
    /// Default `detail-type` for inbound transactions
    pub const DETAIL_TYPE: &'static str = "transaction-initiated";

    /// Build an envelope from its domain fields
    pub fn new(
        id: impl Into<String>,
        time: impl Into<String>,
        customer_id: &str,
        initiated_at: &str,
        from_account: &str,
        to_account: &str,
        amount: Value,
    ) -> Self {
        let mut detail = serde_json::Map::new();
        detail.insert(detail_field::CUSTOMER_ID.into(), customer_id.into());
        detail.insert(detail_field::INITIATED_AT.into(), initiated_at.into());
        detail.insert(detail_field::FROM_ACCOUNT.into(), from_account.into());
        detail.insert(detail_field::TO_ACCOUNT.into(), to_account.into());
        detail.insert(detail_field::TRANSACTION_AMOUNT.into(), amount);

        Self {
            id: id.into(),
            time: time.into(),
            source: None,
            detail_type: Some(Self::DETAIL_TYPE.to_string()),
            detail: Value::Object(detail),
        }
    }

    /// Convert to a JSON value
    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Outbound "transaction-processed" envelope
///
/// Mirrors the inbound envelope's shape: bus routing fields at the top level
/// and the domain payload under `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Bus the event is published to
    pub bus: String,

    /// Producer name
    pub source: String,

    /// Event type label
    #[serde(rename = "detail-type")]
    pub detail_type: String,

    /// Publish time (RFC 3339, UTC)
    pub time: String,

    pub detail: crate::ProcessedEvent,
}

impl OutboundEvent {
    /// Wrap a processed event for publishing at `time`
    pub fn new(
        bus: impl Into<String>,
        source: impl Into<String>,
        detail_type: impl Into<String>,
        time: &chrono::DateTime<chrono::Utc>,
        detail: crate::ProcessedEvent,
    ) -> Self {
        Self {
            bus: bus.into(),
            source: source.into(),
            detail_type: detail_type.into(),
            time: crate::format_timestamp(time),
            detail,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
