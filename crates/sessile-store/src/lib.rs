//! Relational session store with TTL expiry and race-safe soft deletes.
//!
//! This crate persists short-lived session records through a
//! [`SessionRepository`] and provides:
//! - TTL policy per session (fixed, computed, or cookie-derived)
//! - Bounded cleanup of expired rows on the save path
//! - Tombstones, so a destroyed session is never resurrected by a late save
//! - A connectivity state machine with lifecycle events for the middleware
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sessile_store::{SessionData, SessionStore, SqliteSessionRepository, StoreConfig};
//!
//! let repo = Arc::new(SqliteSessionRepository::open(path)?);
//! let store = SessionStore::new(StoreConfig::new().with_ttl(3600).with_cleanup_limit(100));
//! store.connect(repo);
//!
//! let mut session = SessionData::new();
//! session.set("views", 1)?;
//! store.save("sid", &session).await?;
//! let loaded = store.load("sid").await?;
//! ```

mod cleanup;
mod config;
mod connectivity;
mod error;
mod record;
mod repository;
mod sqlite;
mod store;
mod ttl;

pub use cleanup::{CleanupPolicy, CleanupReport, CleanupStrategy};
pub use config::{DEFAULT_CLEANUP_LIMIT, ErrorHandler, StoreConfig, StoreSettings};
pub use connectivity::{ConnectionState, ReadinessGate, StoreEvent};
pub use error::{Result, StoreError};
pub use record::{Cookie, SessionData, SessionRecord, expiry_deadline, now_millis};
pub use repository::SessionRepository;
pub use sqlite::SqliteSessionRepository;
pub use store::{SaveOutcome, SessionIds, SessionStore};
pub use ttl::{ONE_DAY_SECS, TtlPolicy, TtlResolver};
