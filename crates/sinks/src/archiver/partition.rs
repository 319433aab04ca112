//! Hourly partitions and object keys
//!
//! The partition of a batch is fixed at the moment the batch is swapped out
//! of the buffer. Event timestamps play no part in object placement.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use uuid::Uuid;

/// UTC hour a batch was flushed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl Partition {
    /// Partition for a flush happening at `flushed_at`
    pub fn from_flush_time(flushed_at: DateTime<Utc>) -> Self {
        Self {
            year: flushed_at.year(),
            month: flushed_at.month(),
            day: flushed_at.day(),
            hour: flushed_at.hour(),
        }
    }

    /// Hive-style path segment, with trailing slash
    ///
    /// `year=2024/month=03/day=05/hour=14/`
    pub fn path(&self) -> String {
        format!(
            "year={:04}/month={:02}/day={:02}/hour={:02}/",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Prefix for primary and backup objects of `table`
    pub fn data_prefix(&self, table: &str) -> String {
        format!("{table}/{}", self.path())
    }

    /// Prefix for error objects of `table` with the given error type
    pub fn error_prefix(&self, table: &str, error_type: &str) -> String {
        format!("{table}error/{error_type}/{}", self.path())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Object file name inside a partition
///
/// `{table}-{seq}-{YYYY-MM-DD-HH-MM-SS}-{uuid}.{ext}`
pub(crate) fn object_name(
    table: &str,
    seq: u64,
    flushed_at: DateTime<Utc>,
    id: Uuid,
    ext: &str,
) -> String {
    format!(
        "{table}-{seq}-{}-{id}.{ext}",
        flushed_at.format("%Y-%m-%d-%H-%M-%S")
    )
}
