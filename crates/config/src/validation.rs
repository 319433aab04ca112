//! Configuration validation
//!
//! Checks values serde cannot:
//! - Sizes, capacities and attempt counts are non-zero
//! - The flush interval is not below the archiver's floor
//! - Table, destinations and bus identity are non-empty
//! - The three archive destinations are distinct

use std::time::Duration;

use crate::Config;
use crate::error::{ConfigError, Result};

/// Shortest flush interval the archiver accepts
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_archiver(config)?;
    validate_workflow(config)?;
    validate_bus(config)?;
    validate_ingest(config)?;
    Ok(())
}

fn validate_archiver(config: &Config) -> Result<()> {
    let archiver = &config.archiver;

    if archiver.table.trim().is_empty() {
        return Err(ConfigError::missing_field("archiver", "table"));
    }
    if archiver.flush_interval < MIN_FLUSH_INTERVAL {
        return Err(ConfigError::invalid_value(
            "archiver",
            "flush_interval",
            format!("must be at least {}ms", MIN_FLUSH_INTERVAL.as_millis()),
        ));
    }
    for (field, value) in [
        ("flush_size_bytes", archiver.flush_size_bytes),
        ("backup_flush_size_bytes", archiver.backup_flush_size_bytes),
        ("queue_capacity", archiver.queue_capacity),
    ] {
        if value == 0 {
            return Err(ConfigError::invalid_value(
                "archiver",
                field,
                "must be greater than 0",
            ));
        }
    }

    let dest = &archiver.destinations;
    for (field, path) in [
        ("primary", &dest.primary),
        ("backup", &dest.backup),
        ("error", &dest.error),
    ] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::missing_field("archiver.destinations", field));
        }
    }
    if dest.primary == dest.backup || dest.primary == dest.error || dest.backup == dest.error {
        return Err(ConfigError::invalid_value(
            "archiver.destinations",
            "primary",
            "primary, backup and error must be different directories",
        ));
    }

    Ok(())
}

fn validate_workflow(config: &Config) -> Result<()> {
    let workflow = &config.workflow;

    if workflow.retry.max_attempts == 0 {
        return Err(ConfigError::invalid_value(
            "workflow.retry",
            "max_attempts",
            "must be at least 1",
        ));
    }
    if let Some(path) = &workflow.record_store
        && path.as_os_str().is_empty()
    {
        return Err(ConfigError::missing_field("workflow", "record_store"));
    }

    Ok(())
}

fn validate_bus(config: &Config) -> Result<()> {
    let bus = &config.bus;
    for (field, value) in [
        ("name", &bus.name),
        ("source", &bus.source),
        ("detail_type", &bus.detail_type),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_field("bus", field));
        }
    }
    Ok(())
}

fn validate_ingest(config: &Config) -> Result<()> {
    if config.ingest.channel_size == 0 {
        return Err(ConfigError::invalid_value(
            "ingest",
            "channel_size",
            "must be greater than 0",
        ));
    }
    Ok(())
}
