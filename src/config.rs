use std::time::Duration;
use thiserror::Error;

use crate::login::Credentials;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the local redb files
    pub data_dir: String,
    pub network: NetworkConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

/// Build-time remote endpoint defaults, offered on the login form
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum documents per push or pull request
    pub batch_size: usize,
    pub interval_ms: u64,
    pub max_backoff_ms: u64,
    pub naming: RemoteNaming,
    /// Bypass the local store and work against the remote store directly
    pub remote_only: bool,
}

/// How a store's remote database name is derived from the login
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemoteNaming {
    /// `{db}_{username}`
    PerUser,
    /// The database named in the credentials
    #[default]
    Shared,
}

impl RemoteNaming {
    pub fn database_name(&self, credentials: &Credentials) -> String {
        match self {
            RemoteNaming::PerUser => format!("{}_{}", credentials.db, credentials.username),
            RemoteNaming::Shared => credentials.db.clone(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            database: "pouchwiki".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_ms: 5_000,
            max_backoff_ms: 60_000,
            naming: RemoteNaming::Shared,
            remote_only: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            network: NetworkConfig::default(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let data_dir = std::env::var("WIKI_DATA_DIR").unwrap_or(defaults.data_dir);

        let base_url = std::env::var("WIKI_REMOTE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let database = std::env::var("WIKI_REMOTE_DB").unwrap_or(defaults.remote.database);

        let remote_only = std::env::var("WIKI_REMOTE_ONLY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let naming = std::env::var("WIKI_REMOTE_NAMING")
            .ok()
            .map(|s| match s.to_lowercase().as_str() {
                "per-user" | "per_user" => RemoteNaming::PerUser,
                _ => RemoteNaming::Shared,
            })
            .unwrap_or_default();

        let interval_ms = std::env::var("WIKI_SYNC_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.sync.interval_ms);

        let config = Config {
            data_dir,
            remote: RemoteConfig { base_url, database },
            sync: SyncConfig {
                interval_ms,
                naming,
                remote_only,
                ..Default::default()
            },
            ..Default::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.is_empty() {
            return Err(ConfigError::ValidationError(
                "WIKI_DATA_DIR cannot be empty".to_string(),
            ));
        }

        if self.sync.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "WIKI_SYNC_INTERVAL_MS must be positive".to_string(),
            ));
        }

        if self.sync.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "sync batch size must be positive".to_string(),
            ));
        }

        if let Some(url) = &self.remote.base_url {
            if reqwest::Url::parse(url).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "WIKI_REMOTE_URL is not a valid URL: {url}"
                )));
            }
        }

        if self.sync.remote_only && self.remote.base_url.is_none() {
            tracing::warn!(
                "Remote-only mode without a default remote URL. \
                 No store is available until a login succeeds."
            );
        }

        Ok(())
    }
}
