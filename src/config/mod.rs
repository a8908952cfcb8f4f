//! Configuration management.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. A TOML file ([`DedupConfig::load_from_file`])
//! 3. Environment variables ([`DedupConfig::apply_env`])
//! 4. Explicit overrides from the caller (the CLI flags)
//!
//! The resulting configuration is passed explicitly to the store and service
//! constructors; nothing reads process-wide state afterwards.

use crate::services::DEFAULT_RETENTION;
use crate::storage::PoolConfig;
use crate::{Error, Result};
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable for the Redis host.
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
/// Environment variable for the Redis port.
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";
/// Environment variable for the Redis password.
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
/// Environment variable for the Redis database index.
pub const ENV_REDIS_DB: &str = "REDIS_DB";
/// Environment variable for the completion retention window, in seconds.
pub const ENV_RETENTION_SECS: &str = "DUPREQ_RETENTION_SECS";

/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Main configuration for dupreq.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Redis connection settings.
    pub redis: RedisSettings,
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Retention window for completed records.
    pub retention: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            redis: RedisSettings::default(),
            pool: PoolConfig::default(),
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional password (`AUTH`).
    pub password: Option<SecretString>,
    /// Logical database index.
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            db: 0,
        }
    }
}

impl RedisSettings {
    /// Builds the client connection info.
    ///
    /// The host is passed through as-is, so IPv6 literals need no brackets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the client rejects the address.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let mut redis = RedisConnectionInfo::default().set_db(self.db);
        if let Some(password) = self
            .password
            .as_ref()
            .map(|p| p.expose_secret())
            .filter(|p| !p.is_empty())
        {
            redis = redis.set_password(password);
        }

        let info = ConnectionAddr::Tcp(self.host.clone(), self.port)
            .into_connection_info()
            .map_err(|e| Error::store("redis_connection_info", e))?;
        Ok(info.set_redis_settings(redis))
    }

    /// Returns a `redis://` URL with the password masked, for logging.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        let auth = if self.password.is_some() { ":***@" } else { "" };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("redis://{auth}{host}:{}/{}", self.port, self.db)
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Retention window for completed records, in seconds.
    pub retention_secs: Option<u64>,
    /// Redis section.
    pub redis: Option<ConfigFileRedis>,
    /// Pool section.
    pub pool: Option<ConfigFilePool>,
}

/// Redis section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileRedis {
    /// Host.
    pub host: Option<String>,
    /// Port.
    pub port: Option<u16>,
    /// Password.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Database index.
    pub db: Option<i64>,
}

/// Pool section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFilePool {
    /// Maximum pooled connections.
    pub max_size: Option<u32>,
    /// Idle connections kept past the idle timeout.
    pub min_idle: Option<u32>,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Health check threshold in seconds.
    pub health_check_after_secs: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Read/write timeout in milliseconds.
    pub io_timeout_ms: Option<u64>,
}

impl DedupConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::default().merge_file(file))
    }

    /// Applies environment variable overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a numeric variable cannot be parsed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies environment overrides from an arbitrary lookup.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a numeric variable cannot be parsed.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get(ENV_REDIS_HOST) {
            self.redis.host = host;
        }
        if let Some(port) = get(ENV_REDIS_PORT) {
            self.redis.port = parse_env(ENV_REDIS_PORT, &port)?;
        }
        if let Some(password) = get(ENV_REDIS_PASSWORD) {
            self.redis.password = Some(SecretString::from(password));
        }
        if let Some(db) = get(ENV_REDIS_DB) {
            self.redis.db = parse_env(ENV_REDIS_DB, &db)?;
        }
        if let Some(secs) = get(ENV_RETENTION_SECS) {
            self.retention = Duration::from_secs(parse_env(ENV_RETENTION_SECS, &secs)?);
        }

        Ok(self)
    }

    /// Sets the Redis host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.redis.host = host.into();
        self
    }

    /// Sets the Redis port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.redis.port = port;
        self
    }

    /// Sets the Redis password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.redis.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Merges a parsed config file into this configuration.
    fn merge_file(mut self, file: ConfigFile) -> Self {
        if let Some(secs) = file.retention_secs {
            self.retention = Duration::from_secs(secs);
        }
        if let Some(redis) = file.redis {
            if let Some(host) = redis.host {
                self.redis.host = host;
            }
            if let Some(port) = redis.port {
                self.redis.port = port;
            }
            if redis.password.is_some() {
                self.redis.password = redis.password;
            }
            if let Some(db) = redis.db {
                self.redis.db = db;
            }
        }
        if let Some(pool) = file.pool {
            if let Some(v) = pool.max_size {
                self.pool.max_size = v;
            }
            if let Some(v) = pool.min_idle {
                self.pool.min_idle = v;
            }
            if let Some(v) = pool.idle_timeout_secs {
                self.pool.idle_timeout = Duration::from_secs(v);
            }
            if let Some(v) = pool.health_check_after_secs {
                self.pool.health_check_after = Duration::from_secs(v);
            }
            if let Some(v) = pool.connect_timeout_ms {
                self.pool.connect_timeout = Duration::from_millis(v);
            }
            if let Some(v) = pool.io_timeout_ms {
                self.pool.io_timeout = Duration::from_millis(v);
            }
        }
        self
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidInput(format!("{name}='{value}': {e}")))
}
