use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub deposit: DepositConfig,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Message templates overriding the built-in catalog, keyed by message id.
    #[serde(default)]
    pub messages: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfig {
    #[serde(default)]
    pub roots: Vec<DepositRootConfig>,
    #[serde(default = "default_job_file_pattern")]
    pub job_file_pattern: String,
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub lock_strategy: LockStrategy,
    /// Move files left in `accepted/` back to `jobs/` before watching.
    #[serde(default)]
    pub reconcile_staging_on_startup: bool,
    /// Convert jobs that never complete into abort results after this long.
    #[serde(default)]
    pub dispatch_timeout_secs: Option<u64>,
}

fn default_job_file_pattern() -> String {
    "*.zip".to_string()
}

fn default_poll_ms() -> u64 {
    10_000
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            job_file_pattern: default_job_file_pattern(),
            poll_interval_ms: default_poll_ms(),
            initial_delay_ms: default_poll_ms(),
            lock_strategy: LockStrategy::default(),
            reconcile_staging_on_startup: false,
            dispatch_timeout_secs: None,
        }
    }
}

impl DepositConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRootConfig {
    pub path: String,
    pub application_name: String,
}

impl DepositRootConfig {
    /// The root path with a leading `~` expanded to the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        expand_tilde(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// OS advisory lock on the deposited file itself.
    Flock,
    /// Exclusive `<name>.lock` file next to the deposited file.
    LockFile,
}

impl Default for LockStrategy {
    fn default() -> Self {
        if cfg!(unix) {
            LockStrategy::Flock
        } else {
            LockStrategy::LockFile
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}
