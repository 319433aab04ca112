//! `[archiver]` section
//!
//! ```toml
//! [archiver]
//! table = "transactions"
//! flush_interval = "60s"
//! flush_size_bytes = 67108864
//! backup_flush_size_bytes = 5242880
//! queue_capacity = 100000
//! compression = "snappy"
//!
//! [archiver.retry]
//! max_retries = 3
//! base_delay = "500ms"
//!
//! [archiver.destinations]
//! primary = "archive/primary"
//! backup = "archive/backup"
//! error = "archive/error"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Parquet compression codec for primary objects
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Snappy compression (default, good balance)
    #[default]
    Snappy,
    /// LZ4 compression (faster, lower ratio)
    Lz4,
    /// Zstd compression (better ratio, slower)
    Zstd,
    /// No compression
    #[serde(alias = "uncompressed")]
    None,
}

/// Destination write retry policy
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiverRetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each subsequent one
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for ArchiverRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Root directories of the three archive destinations
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DestinationsConfig {
    /// Parquet objects
    pub primary: PathBuf,
    /// Raw LZ4 JSON lines
    pub backup: PathBuf,
    /// Tagged rejects and diverted backups
    pub error: PathBuf,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            primary: PathBuf::from("archive/primary"),
            backup: PathBuf::from("archive/backup"),
            error: PathBuf::from("archive/error"),
        }
    }
}

/// Batch archiver configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Catalog table the records are converted against
    pub table: String,

    /// Flush at least this often
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Flush when the pending batch reaches this many bytes
    pub flush_size_bytes: usize,

    /// Drain the backup stream when it reaches this many bytes
    pub backup_flush_size_bytes: usize,

    /// Records that may be pending before appends are refused
    pub queue_capacity: usize,

    pub compression: ParquetCompression,

    pub retry: ArchiverRetryConfig,

    pub destinations: DestinationsConfig,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            table: "transactions".to_string(),
            flush_interval: Duration::from_secs(60),
            flush_size_bytes: 64 * 1024 * 1024,
            backup_flush_size_bytes: 5 * 1024 * 1024,
            queue_capacity: 100_000,
            compression: ParquetCompression::default(),
            retry: ArchiverRetryConfig::default(),
            destinations: DestinationsConfig::default(),
        }
    }
}
