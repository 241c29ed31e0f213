//! Repository trait for the backing relational store.
//!
//! The session store never opens or closes the backing database. A caller
//! hands it an implementation of [`SessionRepository`] at connect time and the
//! store only issues the operations below against it.
//!
//! ```text
//! SessionRepository (trait)      - row-level session operations
//!     └── SqliteSessionRepository - default SQLite implementation
//! ```
//!
//! Race safety rests on two rules every implementation must honour:
//! updates of payload or expiry are scoped to rows whose `destroyed_at` is
//! null, and tombstoned rows are only ever removed physically by the
//! expiry-bounded deletes.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::SessionRecord;

/// Row-level operations over the `sessions` table.
///
/// # Thread Safety
///
/// Implementations are shared across request handlers and must be
/// `Send + Sync`. Methods are blocking; the store calls them from
/// `spawn_blocking`.
pub trait SessionRepository: Send + Sync {
    /// Get the live row for `id` (not tombstoned, `expired_at > now_ms`).
    fn find_live(&self, id: &str, now_ms: i64) -> Result<Option<SessionRecord>>;

    /// Get the row for `id` regardless of expiry or tombstone.
    fn find(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Insert a fresh row.
    ///
    /// If a row with the same id appeared since the caller last looked, the
    /// insert degrades to [`update_live`](Self::update_live) semantics: a
    /// live row is overwritten, a tombstoned row is left alone. Returns the
    /// number of rows written.
    fn insert(&self, record: &SessionRecord) -> Result<usize>;

    /// Replace payload and expiry of a row that is not tombstoned.
    ///
    /// Returns the number of rows updated; zero when the row was destroyed
    /// (or removed) in the meantime.
    fn update_live(&self, id: &str, json: &str, expired_at: i64) -> Result<usize>;

    /// Move the expiry of a row that is not tombstoned, leaving the payload
    /// untouched. Returns the number of rows updated.
    fn update_expiry(&self, id: &str, expired_at: i64) -> Result<usize>;

    /// Tombstone every listed row that is not already tombstoned.
    ///
    /// Unknown ids are ignored. Returns the number of rows newly tombstoned.
    fn tombstone(&self, ids: &[String], destroyed_at: DateTime<Utc>) -> Result<usize>;

    /// All live rows, oldest expiry first.
    fn list_live(&self, now_ms: i64) -> Result<Vec<SessionRecord>>;

    /// Delete up to `limit` rows with `expired_at <= now_ms` in one statement
    /// (`id IN (SELECT ... LIMIT n)`), oldest expiry first.
    fn delete_expired_limited(&self, now_ms: i64, limit: usize) -> Result<usize>;

    /// Select up to `limit` ids with `expired_at <= now_ms`, oldest expiry first.
    fn select_expired_ids(&self, now_ms: i64, limit: usize) -> Result<Vec<String>>;

    /// Delete the listed rows that are still expired at `now_ms`.
    ///
    /// Rows whose expiry was refreshed after selection are kept.
    fn delete_expired_ids(&self, ids: &[String], now_ms: i64) -> Result<usize>;

    /// Total number of rows, tombstoned and expired included.
    fn count(&self) -> Result<usize>;

    /// Number of live rows.
    fn count_live(&self, now_ms: i64) -> Result<usize>;
}
