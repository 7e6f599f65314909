//! Configuration loading for the sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `DATASYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "DATASYNC_";

/// Application configuration derived from `DATASYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub pool: PoolPolicy,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Sizing and timeouts for pools opened against external relational sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PoolPolicy {
    #[serde(default = "default_pool_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pool_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_pool_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_pool_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Sync run tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncSettings {
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_sync_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_sync_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            pool: PoolPolicy::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_connections: default_pool_max_connections(),
            min_connections: default_pool_min_connections(),
            acquire_timeout_ms: default_pool_acquire_timeout_ms(),
            idle_timeout_ms: default_pool_idle_timeout_ms(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_sync_batch_size(),
            event_capacity: default_sync_event_capacity(),
            rest_timeout_ms: default_sync_rest_timeout_ms(),
        }
    }
}

impl PoolPolicy {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate pool bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidPoolMaxConnections {
                value: self.max_connections,
            });
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidPoolBounds {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "pool acquire timeout",
            });
        }
        Ok(())
    }
}

impl SyncSettings {
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }

    /// Validate sync tuning bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > 100_000 {
            return Err(ConfigError::InvalidBatchSize {
                value: self.batch_size,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity);
        }
        if self.rest_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "REST timeout",
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (credentials in the database URL are masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url_password(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections);
        }

        self.pool.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

fn redact_url_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("REDACTED")).is_ok() {
                parsed.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://datasync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_connections() -> u32 {
    5
}

fn default_pool_min_connections() -> u32 {
    0
}

fn default_pool_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_pool_idle_timeout_ms() -> u64 {
    10_000
}

fn default_sync_batch_size() -> u64 {
    1000
}

fn default_sync_event_capacity() -> usize {
    256
}

fn default_sync_rest_timeout_ms() -> u64 {
    30_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be positive")]
    InvalidDbMaxConnections,
    #[error("pool max connections must be positive, got {value}")]
    InvalidPoolMaxConnections { value: u32 },
    #[error("pool min connections ({min}) cannot exceed max connections ({max})")]
    InvalidPoolBounds { min: u32, max: u32 },
    #[error("{field} must be positive")]
    InvalidTimeout { field: &'static str },
    #[error("sync batch size must be between 1 and 100000, got {value}")]
    InvalidBatchSize { value: u64 },
    #[error("sync event capacity must be positive")]
    InvalidEventCapacity,
}

/// Loads configuration using layered `.env` files and `DATASYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`,
    /// then the process environment, and validates the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut text = |key: &str, default: fn() -> String| {
            layered
                .remove(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default)
        };

        let profile = {
            let value = text("PROFILE", String::new);
            if value.is_empty() { profile_hint } else { value }
        };
        let log_level = text("LOG_LEVEL", default_log_level);
        let log_format = text("LOG_FORMAT", default_log_format);
        let database_url = text("DATABASE_URL", default_database_url);

        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let pool = PoolPolicy {
            max_connections: layered
                .remove("POOL_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pool_max_connections),
            min_connections: layered
                .remove("POOL_MIN_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pool_min_connections),
            acquire_timeout_ms: layered
                .remove("POOL_ACQUIRE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pool_acquire_timeout_ms),
            idle_timeout_ms: layered
                .remove("POOL_IDLE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pool_idle_timeout_ms),
        };

        let sync = SyncSettings {
            batch_size: layered
                .remove("SYNC_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_batch_size),
            event_capacity: layered
                .remove("SYNC_EVENT_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_event_capacity),
            rest_timeout_ms: layered
                .remove("SYNC_REST_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_rest_timeout_ms),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            pool,
            sync,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
