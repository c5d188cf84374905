//! Daemon and client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod load;

pub use load::{config_path, load_or_default, load_user_config, write_config};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub limits: Limits,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
        }
    }
}

/// Hard bounds on protocol and fan-out resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted wire frame, bytes.
    pub max_frame_bytes: usize,
    /// Most operations accepted in one proposal.
    pub max_operations_per_proposal: usize,
    /// Queued events per change subscriber before it is dropped.
    pub change_queue_events: usize,
    /// Client-side wait for an RPC acknowledgement.
    pub rpc_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 4 * 1024 * 1024,
            max_operations_per_proposal: 1024,
            change_queue_events: 256,
            rpc_timeout_ms: 5_000,
        }
    }
}

impl Limits {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Override for the snapshot root; defaults to
    /// `<data>/db/replicants`.
    pub root: Option<PathBuf>,
    /// Minimum gap between snapshot writes per replicant, unless a
    /// declaration asks for its own interval.
    pub default_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root: None,
            default_interval_ms: 100,
        }
    }
}

impl PersistenceConfig {
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(crate::paths::replicants_dir)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }
}
