//! CLI command handlers.

pub mod config;
pub mod sessions;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use sessile_store::{SessionStore, SqliteSessionRepository, StoreConfig, StoreSettings};
use tracing::debug;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective store settings (config file merged with flags).
    pub settings: StoreSettings,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Resolve settings from an optional config file and the `--db` flag.
    pub fn load(
        db: Option<PathBuf>,
        config_path: Option<&Path>,
        json_output: bool,
        verbose: bool,
    ) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => StoreSettings::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => StoreSettings::default(),
        };
        if db.is_some() {
            settings.database = db;
        }

        Ok(Self {
            settings,
            json_output,
            verbose,
        })
    }

    /// The configured database path.
    pub fn database(&self) -> Result<&Path> {
        match self.settings.database.as_deref() {
            Some(path) => Ok(path),
            None => bail!("no session database configured (use --db or SESSILE_DB)"),
        }
    }

    /// Open the database and connect a store using the effective settings.
    pub fn open_store(&self) -> Result<SessionStore> {
        self.open_store_with(self.settings.clone().into_config())
    }

    /// Open the database and connect a store with an explicit configuration.
    pub fn open_store_with(&self, config: StoreConfig) -> Result<SessionStore> {
        let path = self.database()?;
        debug!(path = %path.display(), config = ?config, "Opening session store");
        let repo = SqliteSessionRepository::open(path)
            .with_context(|| format!("opening session database {}", path.display()))?;

        let store = SessionStore::new(config);
        store.connect(Arc::new(repo));
        Ok(store)
    }
}
