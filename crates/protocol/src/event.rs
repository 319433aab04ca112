//! Canonical transaction event and its processed counterpart

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Render a timestamp as normalized ISO-8601 UTC (`2024-03-05T14:07:00Z`)
///
/// Sub-second precision is kept only when present.
#[inline]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

mod iso_utc {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The canonical unit of work
///
/// Produced once per inbound event by the transformer, then shared read-only
/// by the archiver and the workflow executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    /// Unique per transaction (the bus event id)
    pub transaction_id: String,
    pub customer_id: String,
    /// When the bus accepted the event
    #[serde(with = "iso_utc")]
    pub received_datetime: DateTime<Utc>,
    /// When the transaction was initiated upstream
    #[serde(with = "iso_utc")]
    pub requested_datetime: DateTime<Utc>,
    pub source_account: String,
    pub destination_account: String,
    /// Exact decimal amount, serialized as a string
    pub total_amount: Decimal,
}

impl TransactionEvent {
    /// Check the invariants required before archiving or persisting
    ///
    /// All string fields must be non-empty and the amount non-negative.
    /// Timestamp ordering is deliberately not checked here, see
    /// [`TransactionEvent::is_time_anomaly`].
    pub fn validate(&self) -> crate::Result<()> {
        let strings = [
            ("transaction_id", &self.transaction_id),
            ("customer_id", &self.customer_id),
            ("source_account", &self.source_account),
            ("destination_account", &self.destination_account),
        ];
        for (name, value) in strings {
            if value.trim().is_empty() {
                return Err(ProtocolError::EmptyField(name));
            }
        }

        if self.total_amount.is_sign_negative() && !self.total_amount.is_zero() {
            return Err(ProtocolError::NegativeAmount(self.total_amount));
        }

        Ok(())
    }

    /// True when the event was received before it was requested
    #[inline]
    pub fn is_time_anomaly(&self) -> bool {
        self.received_datetime < self.requested_datetime
    }

    /// Serialize to the canonical JSON record
    pub fn to_json_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a canonical JSON record
    pub fn from_json_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Payload of the outbound "transaction-processed" event
///
/// Field-for-field mirror of the `TransactionEvent` that was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub transaction_id: String,
    pub customer_id: String,
    #[serde(with = "iso_utc")]
    pub received_datetime: DateTime<Utc>,
    #[serde(with = "iso_utc")]
    pub requested_datetime: DateTime<Utc>,
    pub source_account: String,
    pub destination_account: String,
    pub total_amount: Decimal,
}

impl ProcessedEvent {
    /// `detail-type` label used on the bus
    pub const DETAIL_TYPE: &'static str = "transaction-processed";
}

impl From<&TransactionEvent> for ProcessedEvent {
    fn from(event: &TransactionEvent) -> Self {
        Self {
            transaction_id: event.transaction_id.clone(),
            customer_id: event.customer_id.clone(),
            received_datetime: event.received_datetime,
            requested_datetime: event.requested_datetime,
            source_account: event.source_account.clone(),
            destination_account: event.destination_account.clone(),
            total_amount: event.total_amount,
        }
    }
}
