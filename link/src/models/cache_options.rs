use serde::{Deserialize, Serialize};

use super::query_options::{QueryOptions, DEFAULT_PRIMARY_KEY};

/// Bounds for the table snapshot cache and the query executor.
///
/// # Example
///
/// ```rust
/// use estate_link::CacheOptions;
///
/// let options = CacheOptions::default().with_max_rows(500).with_max_idle_keys(16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Row cap applied to every prime query, whatever limit the caller asks for.
    /// Default: 1000
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Zero-subscriber keys kept for stale-while-revalidate. Beyond this the
    /// longest-idle keys are evicted.
    /// Default: 64
    #[serde(default = "default_max_idle_keys")]
    pub max_idle_keys: usize,

    /// Primary key column used when `QueryOptions` does not override it.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_max_rows() -> usize {
    1000
}

fn default_max_idle_keys() -> usize {
    64
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_idle_keys: default_max_idle_keys(),
            primary_key: default_primary_key(),
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_max_idle_keys(mut self, max_idle_keys: usize) -> Self {
        self.max_idle_keys = max_idle_keys;
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Default query options carrying the configured primary key.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::new().with_primary_key(self.primary_key.clone())
    }
}
