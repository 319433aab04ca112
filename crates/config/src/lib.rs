//! Tally Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid configuration; only specify what you change.
//!
//! # Parsing
//!
//! ```
//! use std::str::FromStr;
//! use tally_config::Config;
//!
//! let config = Config::from_str("[archiver]\nflush_interval = \"30s\"").unwrap();
//! assert_eq!(config.archiver.flush_interval.as_secs(), 30);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "json"
//!
//! [archiver]
//! table = "transactions"
//! flush_interval = "60s"
//!
//! [archiver.destinations]
//! primary = "/data/primary"
//! backup = "/data/backup"
//! error = "/data/error"
//!
//! [workflow]
//! record_store = "/data/records"
//!
//! [bus]
//! name = "payments"
//! ```

mod archiver;
mod bus;
mod error;
mod logging;
mod validation;
mod workflow;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use archiver::{ArchiverConfig, ArchiverRetryConfig, DestinationsConfig, ParquetCompression};
pub use bus::{BusConfig, BusTransportKind, IngestConfig};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use validation::MIN_FLUSH_INTERVAL;
pub use workflow::{StepRetryConfig, WorkflowConfig};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,

    /// OLAP path: batching, flush triggers, destinations
    pub archiver: ArchiverConfig,

    /// OLTP path: record store, step retries, audit window
    pub workflow: WorkflowConfig,

    /// Where processed events are published
    pub bus: BusConfig,

    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
