//! Configuration for the session store.
//!
//! [`StoreConfig`] is the programmatic form handed to
//! [`SessionStore::new`](crate::SessionStore::new). [`StoreSettings`] is the
//! declarative subset that can be read from TOML:
//!
//! ```toml
//! [store]
//! ttl_secs = 3600
//! cleanup_limit = 100
//! limit_subquery = true
//! database = "/var/lib/sessile/sessions.db"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::record::SessionData;
use crate::store::SessionStore;
use crate::ttl::TtlPolicy;

/// Default cleanup batch size (cleanup disabled).
pub const DEFAULT_CLEANUP_LIMIT: usize = 0;

/// Custom failure handler.
///
/// Replaces the default "emit disconnect" reaction. The handler owns any
/// recovery, including re-emitting [`StoreEvent::Connect`](crate::StoreEvent).
pub type ErrorHandler = Arc<dyn Fn(&SessionStore, &StoreError) + Send + Sync>;

/// Configuration for the session store.
#[derive(Clone)]
pub struct StoreConfig {
    /// TTL policy applied on save and touch.
    pub ttl: TtlPolicy,

    /// Maximum rows removed by one cleanup sweep. Zero disables cleanup.
    pub cleanup_limit: usize,

    /// Delete through a single limited subquery (`true`) or select the ids
    /// first and delete them in a second statement (`false`).
    pub limit_subquery: bool,

    /// Custom failure handler.
    pub on_error: Option<ErrorHandler>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            cleanup_limit: DEFAULT_CLEANUP_LIMIT,
            limit_subquery: true,
            on_error: None,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed TTL in seconds.
    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = TtlPolicy::Fixed(secs);
        self
    }

    /// Compute the TTL per session.
    pub fn with_ttl_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionStore, &SessionData, Option<&str>) -> u64 + Send + Sync + 'static,
    {
        self.ttl = TtlPolicy::resolver(f);
        self
    }

    /// Set the cleanup batch size.
    pub fn with_cleanup_limit(mut self, limit: usize) -> Self {
        self.cleanup_limit = limit;
        self
    }

    /// Choose the cleanup selection strategy.
    pub fn with_limit_subquery(mut self, enabled: bool) -> Self {
        self.limit_subquery = enabled;
        self
    }

    /// Install a custom failure handler.
    pub fn with_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionStore, &StoreError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Whether saves run a cleanup sweep.
    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup_limit > 0
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("ttl", &self.ttl)
            .field("cleanup_limit", &self.cleanup_limit)
            .field("limit_subquery", &self.limit_subquery)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Declarative store settings (the `[store]` TOML section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Fixed TTL in seconds. Cookie-derived when absent.
    pub ttl_secs: Option<u64>,

    /// Maximum rows removed per sweep. Zero disables cleanup.
    pub cleanup_limit: usize,

    /// Cleanup selection strategy.
    pub limit_subquery: bool,

    /// SQLite database path.
    pub database: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            cleanup_limit: DEFAULT_CLEANUP_LIMIT,
            limit_subquery: true,
            database: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    store: StoreSettings,
}

impl StoreSettings {
    /// Parse from a TOML string containing an optional `[store]` section.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: SettingsFile =
            toml::from_str(toml_str).map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(file.store)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Serialize as a `[store]` TOML section.
    pub fn to_toml(&self) -> Result<String> {
        let file = SettingsFile {
            store: self.clone(),
        };
        toml::to_string_pretty(&file).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Convert into a programmatic configuration.
    pub fn into_config(self) -> StoreConfig {
        let ttl = match self.ttl_secs {
            Some(secs) => TtlPolicy::Fixed(secs),
            None => TtlPolicy::CookieDerived,
        };
        StoreConfig {
            ttl,
            cleanup_limit: self.cleanup_limit,
            limit_subquery: self.limit_subquery,
            on_error: None,
        }
    }
}
