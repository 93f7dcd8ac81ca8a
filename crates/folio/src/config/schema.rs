use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::PriorityPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub priorities: PriorityPolicy,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            output: OutputConfig::default(),
            queue: QueueConfig::default(),
            priorities: PriorityPolicy::default(),
            worker_count: default_worker_count(),
        }
    }
}

impl Config {
    /// The configured database file, or the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database.path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Sitewide file paths are written under this directory.
    #[serde(default = "default_output_root")]
    pub root: String,
    #[serde(default = "default_max_basename_length")]
    pub max_basename_length: usize,
}

fn default_output_root() -> String {
    "/".to_string()
}

fn default_max_basename_length() -> usize {
    200
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            max_basename_length: default_max_basename_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Ceiling on batches per drive; unbounded when absent.
    #[serde(default)]
    pub max_batches: Option<usize>,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

fn default_batch_size() -> usize {
    25
}

fn default_stuck_after_secs() -> u64 {
    15 * 60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batches: None,
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

impl QueueConfig {
    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }
}
