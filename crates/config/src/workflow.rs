//! `[workflow]` section
//!
//! ```toml
//! [workflow]
//! record_store = "records/"
//! audit_window = 1024
//!
//! [workflow.retry]
//! max_attempts = 3
//! base_delay = "200ms"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Per-step retry policy
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepRetryConfig {
    /// Attempts including the first
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for StepRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Workflow executor configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directory of the file record store; records stay in memory when unset
    pub record_store: Option<PathBuf>,

    /// Execution reports kept for audit
    pub audit_window: usize,

    pub retry: StepRetryConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            record_store: None,
            audit_window: 1024,
            retry: StepRetryConfig::default(),
        }
    }
}
