//! Command implementations for the Tally CLI

pub mod check_config;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tally_config::Config;

/// Paths tried when no `--config` is given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["tally.toml", "configs/tally.toml"];

/// Load the configuration
///
/// An explicit path must exist. Without one, the default paths are tried in
/// order and built-in defaults are used when none exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Config::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))
        }
        None => {
            for candidate in DEFAULT_CONFIG_PATHS.map(PathBuf::from) {
                if candidate.exists() {
                    return Config::from_file(&candidate).with_context(|| {
                        format!("failed to load configuration from {}", candidate.display())
                    });
                }
            }
            Ok(Config::default())
        }
    }
}
