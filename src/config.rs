use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::processor::{DEFAULT_MAX_ATTEMPTS, ProcessingMode, ProcessorPolicy, RetryPolicy};
use crate::queue::in_memory::DEFAULT_MAX_DELIVERY_COUNT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub store: StoreSettings,
    /// Accounts loaded into the in-memory store at startup
    #[serde(default)]
    pub seed_accounts: Vec<SeedAccount>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "banking_event_receiver.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub idle_delay_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_delay_ms: 10_000,
            error_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorSettings {
    pub mode: ProcessingMode,
    pub max_attempts: u32,
    /// Accept unknown transaction kinds at decode time and dead-letter them
    /// after the account lookup
    pub permissive_decoding: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            permissive_decoding: false,
        }
    }
}

impl ProcessorSettings {
    pub fn policy(&self) -> ProcessorPolicy {
        ProcessorPolicy::from_mode(self.mode, RetryPolicy::new(self.max_attempts))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct QueueSettings {
    /// Deliveries before an abandoned message is dead-lettered
    pub max_delivery_count: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    pub postgres_url: Option<String>,
    pub timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            postgres_url: None,
            timeout_ms: 5_000,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SeedAccount {
    pub id: Uuid,
    pub balance: Decimal,
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
