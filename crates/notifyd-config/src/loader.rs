//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &["config.toml", "notifyd.toml", "./config/config.toml", "/etc/notifyd/config.toml"];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("NOTIFYD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("NOTIFYD_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_HTTP_HOST") {
            config.http.host = val;
        }

        if let Ok(val) = env::var("NOTIFYD_DATABASE_DSN") {
            config.database.dsn = val;
        }
        if let Ok(val) = env::var("NOTIFYD_DATABASE_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.database.pool_size = size;
            }
        }

        if let Ok(val) = env::var("NOTIFYD_REDIS_URL") {
            config.redis.url = val;
        }

        if let Ok(val) = env::var("NOTIFYD_JWT_PUBLIC_KEY_PATH") {
            config.jwt.public_key_path = val;
        }
        if let Ok(val) = env::var("NOTIFYD_JWT_PRIVATE_KEY_PATH") {
            config.jwt.private_key_path = val;
        }

        if let Ok(val) = env::var("NOTIFYD_SHARDING_DB_COUNT") {
            if let Ok(count) = val.parse() {
                config.sharding.db_count = count;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_SHARDING_TABLE_COUNT") {
            if let Ok(count) = val.parse() {
                config.sharding.table_count = count;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_SHARDING_DB_PREFIX") {
            config.sharding.db_prefix = val;
        }
        if let Ok(val) = env::var("NOTIFYD_SHARDING_TABLE_PREFIX") {
            config.sharding.table_prefix = val;
        }

        if let Ok(val) = env::var("NOTIFYD_SCHEDULER_MAX_LOCKED_SHARDS") {
            if let Ok(n) = val.parse() {
                config.scheduler.max_locked_shards = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_SCHEDULER_MIN_SCHEDULE_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.scheduler.min_schedule_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_SCHEDULER_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.scheduler.batch_size = n;
            }
        }

        if let Ok(val) = env::var("NOTIFYD_CALLBACK_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.callback.batch_size = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYD_CALLBACK_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.callback.poll_interval_ms = n;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/notifyd.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.sharding.db_count, 4);
    }
}
