//! Configuration file management
//!
//! # Configuration Format
//!
//! ```toml
//! [server]
//! url = "http://localhost:54321"  # Remote store base URL
//! api_key = "anon-key"            # Project API key (optional)
//! jwt_token = "eyJhbGc..."        # User token, wins over api_key (optional)
//! timeout_secs = 30               # Per-request timeout for prime queries
//!
//! [connection]
//! auto_reconnect = true           # Reconnect a table's feed on transport loss
//! reconnect_delay_ms = 1000       # Initial reconnect delay
//! max_reconnect_delay_ms = 30000  # Maximum reconnect delay
//! max_reconnect_attempts = 0      # Max consecutive attempts (0 = unlimited)
//! keepalive_interval_secs = 10    # Feed keepalive ping (0 = disabled)
//!
//! [cache]
//! max_rows = 1000                 # Row cap for every prime query
//! max_idle_keys = 64              # Zero-subscriber keys kept before eviction
//! primary_key = "id"              # Default primary key column
//! ```

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::error::{LinkError, Result};
use crate::models::{CacheOptions, ConnectionOptions};
use crate::timeouts::LinkTimeouts;

/// Client configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime reconnection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the remote store (e.g. http://localhost:54321)
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Enable automatic reconnection on connection loss (default: true)
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay between reconnection attempts in milliseconds (default: 1000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts in milliseconds (default: 30000)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts (0 = unlimited, default: 0)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Keepalive ping interval in seconds (0 = disabled, default: 10)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_max_idle_keys")]
    pub max_idle_keys: usize,

    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_keepalive_interval_secs() -> u64 {
    10
}

fn default_max_rows() -> usize {
    1000
}

fn default_max_idle_keys() -> usize {
    64
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
            jwt_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_idle_keys: default_max_idle_keys(),
            primary_key: default_primary_key(),
        }
    }
}

pub fn expand_config_path(path: &Path) -> PathBuf {
    let path_str = path.to_str().unwrap_or("~/.estate/link.toml");
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    }
    path.to_path_buf()
}

pub fn default_config_path() -> PathBuf {
    expand_config_path(Path::new("~/.estate/link.toml"))
}

impl LinkConfig {
    /// Load configuration from file
    ///
    /// Returns default configuration if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_config_path(path);
        let path = &expanded_path;

        if !path.exists() {
            debug!("[LINK_CONFIG] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to read config file: {}", e))
        })?;

        let config = Self::from_toml_str(&contents)?;
        debug!("[LINK_CONFIG] Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let expanded_path = expand_config_path(path);
        let path = &expanded_path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to serialize: {}", e))
        })?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.url.trim().is_empty() {
            return Err(LinkError::ConfigurationError("server.url must not be empty".into()));
        }
        if self.cache.max_rows == 0 {
            return Err(LinkError::ConfigurationError(
                "cache.max_rows must be greater than zero".into(),
            ));
        }
        if self.connection.reconnect_delay_ms > self.connection.max_reconnect_delay_ms {
            return Err(LinkError::ConfigurationError(
                "connection.reconnect_delay_ms exceeds max_reconnect_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Build ConnectionOptions from the `[connection]` section
    pub fn to_connection_options(&self) -> ConnectionOptions {
        let conn = &self.connection;

        // 0 means unlimited
        let max_attempts = if conn.max_reconnect_attempts == 0 {
            None
        } else {
            Some(conn.max_reconnect_attempts)
        };

        ConnectionOptions::default()
            .with_auto_reconnect(conn.auto_reconnect)
            .with_reconnect_delay_ms(conn.reconnect_delay_ms)
            .with_max_reconnect_delay_ms(conn.max_reconnect_delay_ms)
            .with_max_reconnect_attempts(max_attempts)
    }

    pub fn to_cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_max_rows(self.cache.max_rows)
            .with_max_idle_keys(self.cache.max_idle_keys)
            .with_primary_key(self.cache.primary_key.clone())
    }

    pub fn to_timeouts(&self) -> LinkTimeouts {
        LinkTimeouts::builder()
            .request_timeout(Duration::from_secs(self.server.timeout_secs))
            .keepalive_interval_secs(self.connection.keepalive_interval_secs)
            .build()
    }

    /// JWT token when present, else API key, else none.
    pub fn auth_provider(&self) -> AuthProvider {
        match (&self.server.jwt_token, &self.server.api_key) {
            (Some(token), _) => AuthProvider::jwt_token(token.clone()),
            (None, Some(key)) => AuthProvider::api_key(key.clone()),
            (None, None) => AuthProvider::none(),
        }
    }
}
