//! Notification dispatch service configuration (ambient, C19).
//!
//! TOML-based configuration with `NOTIFYD_*` environment variable
//! overrides, following the same shape as the teacher's `fc-config`.

mod loader;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub sharding: ShardingConfig,
    pub scheduler: SchedulerConfig,
    pub callback: CallbackConfig,
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            jwt: JwtConfig::default(),
            sharding: ShardingConfig::default(),
            scheduler: SchedulerConfig::default(),
            callback: CallbackConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub metrics_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 8080, host: "0.0.0.0".to_string(), metrics_port: 9090 }
    }
}

/// Per-shard DSN overrides are keyed by db suffix; any suffix not present
/// here falls back to `dsn` with the suffix substituted into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub pool_size: u32,
    pub dsn_overrides: std::collections::HashMap<u64, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: "postgres://localhost:5432/jotify_{db_suffix}".to_string(),
            pool_size: 10,
            dsn_overrides: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: "redis://127.0.0.1:6379".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub public_key_path: String,
    pub private_key_path: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self { public_key_path: String::new(), private_key_path: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub db_count: u64,
    pub table_count: u64,
    pub db_prefix: String,
    pub table_prefix: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self { db_count: 4, table_count: 4, db_prefix: "jotify".to_string(), table_prefix: "notification".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_locked_shards: u32,
    pub min_schedule_interval_ms: u64,
    pub retry_interval_secs: u64,
    pub batch_size: u32,
    pub adjuster_min_size: u32,
    pub adjuster_max_size: u32,
    pub adjuster_step: u32,
    pub adjuster_ring_size: usize,
    pub bitring_window_size: usize,
    pub bitring_consecutive_threshold: usize,
    pub bitring_event_rate_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_locked_shards: 8,
            min_schedule_interval_ms: 500,
            retry_interval_secs: 5,
            batch_size: 100,
            adjuster_min_size: 10,
            adjuster_max_size: 1000,
            adjuster_step: 10,
            adjuster_ring_size: 32,
            bitring_window_size: 128,
            bitring_consecutive_threshold: 3,
            bitring_event_rate_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    /// Static `service_name -> base_url` map backing the callback
    /// dispatcher's service registry.
    pub service_endpoints: std::collections::HashMap<String, String>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { batch_size: 100, poll_interval_ms: 1000, service_endpoints: std::collections::HashMap::new() }
    }
}

/// One configured vendor endpoint, tried in the order listed for its
/// channel. The concrete vendor client is out of scope here; every entry
/// is sent through the generic HTTP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub sms: Vec<ProviderEndpoint>,
    pub email: Vec<ProviderEndpoint>,
    pub in_app: Vec<ProviderEndpoint>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            sms: vec![ProviderEndpoint { name: "primary".to_string(), url: "http://localhost:9001/providers/sms".to_string() }],
            email: vec![ProviderEndpoint { name: "primary".to_string(), url: "http://localhost:9001/providers/email".to_string() }],
            in_app: vec![ProviderEndpoint { name: "primary".to_string(), url: "http://localhost:9001/providers/in-app".to_string() }],
        }
    }
}
