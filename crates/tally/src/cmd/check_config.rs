//! Check-config command - validate a configuration file

use std::path::Path;

use anyhow::Result;

/// Load and validate the configuration, printing a short summary
pub fn run(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        anyhow::bail!("check-config requires --config <path>");
    };

    let config = super::load_config(Some(path))?;
    let destinations = &config.archiver.destinations;

    println!("configuration OK: {}", path.display());
    println!(
        "  archiver: table={} flush_interval={:?} flush_size_bytes={} queue_capacity={}",
        config.archiver.table,
        config.archiver.flush_interval,
        config.archiver.flush_size_bytes,
        config.archiver.queue_capacity
    );
    println!(
        "  destinations: primary={} backup={} error={}",
        destinations.primary.display(),
        destinations.backup.display(),
        destinations.error.display()
    );
    match &config.workflow.record_store {
        Some(dir) => println!("  record store: {}", dir.display()),
        None => println!("  record store: memory"),
    }
    println!(
        "  bus: name={} source={} transport={:?}",
        config.bus.name, config.bus.source, config.bus.transport
    );
    Ok(())
}
