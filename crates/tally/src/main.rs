//! Tally - Dual-path transaction pipeline
//!
//! # Usage
//!
//! ```bash
//! # Process a JSON-lines file of inbound events
//! tally run --config tally.toml --input events.jsonl
//!
//! # Read events from stdin
//! cat events.jsonl | tally run --config tally.toml
//!
//! # Validate a configuration
//! tally check-config --config tally.toml
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tally_config::{Config, LogConfig, LogFormat, LogOutput};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Tally - archive and process transaction events
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest inbound events and run both pipeline paths
    Run(cmd::run::RunArgs),

    /// Validate a configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = cmd::load_config(cli.config.as_deref())?;
            let log_level = resolve_log_level(cli.log_level.as_deref(), &config);
            init_logging(&log_level, &config.log)?;
            cmd::run::run(args, config).await
        }
        // Prints its own result, no logging needed
        Command::CheckConfig => cmd::check_config::run(cli.config.as_deref()),
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match (log.format, log.output) {
        (LogFormat::Console, LogOutput::Stderr) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        (LogFormat::Console, LogOutput::Stdout) => {
            registry.with(fmt::layer().with_target(true)).init()
        }
        (LogFormat::Json, LogOutput::Stderr) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (LogFormat::Json, LogOutput::Stdout) => registry.with(fmt::layer().json()).init(),
    }

    Ok(())
}
