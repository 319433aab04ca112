//! `[bus]` and `[ingest]` sections
//!
//! ```toml
//! [bus]
//! name = "tally"
//! source = "tally.workflow"
//! detail_type = "transaction-processed"
//! transport = "stdout"
//!
//! [ingest]
//! channel_size = 10000
//! archive_max_retries = 5
//! archive_retry_delay = "100ms"
//! ```

use std::time::Duration;

use serde::Deserialize;

/// How processed events leave the process
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusTransportKind {
    /// One JSON envelope per line on stdout
    #[default]
    Stdout,
    /// In-process channel; envelopes are logged at debug level
    Channel,
}

/// Outbound event bus
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BusConfig {
    pub name: String,
    pub source: String,
    pub detail_type: String,
    pub transport: BusTransportKind,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "tally".to_string(),
            source: "tally.workflow".to_string(),
            detail_type: "transaction-processed".to_string(),
            transport: BusTransportKind::default(),
        }
    }
}

/// Inbound event ingestion
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Router input channel capacity
    pub channel_size: usize,

    /// Re-appends of an event the archiver refused under backpressure
    pub archive_max_retries: u32,

    /// Delay before the first re-append; doubles on each retry
    #[serde(with = "humantime_serde")]
    pub archive_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_size: 10_000,
            archive_max_retries: 5,
            archive_retry_delay: Duration::from_millis(100),
        }
    }
}
