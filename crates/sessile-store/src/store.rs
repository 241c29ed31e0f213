//! Session store engine.
//!
//! [`SessionStore`] layers the session lifecycle on top of a
//! [`SessionRepository`]: TTL on every write, opportunistic bounded cleanup on
//! save, soft deletes on destroy, and failure reporting through the
//! connectivity state machine.
//!
//! No in-process locks guard the rows. Concurrent requests for the same id
//! are made safe by the repository's conditional updates: a save never
//! rewrites a row whose `destroyed_at` is set, so a destroy that commits first
//! always wins.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::cleanup::{CleanupPolicy, CleanupReport};
use crate::config::StoreConfig;
use crate::connectivity::{ConnectionState, Connectivity, ReadinessGate, StoreEvent};
use crate::error::{Result, StoreError};
use crate::record::{SessionData, SessionRecord, expiry_deadline, now_millis};
use crate::repository::SessionRepository;

/// What a successful save did to the backing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No row existed; a fresh one was written.
    Inserted,
    /// The live row was overwritten.
    Updated,
    /// The session had been destroyed; nothing was written.
    Suppressed,
}

/// One or more session ids, for bulk destroy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds(Vec<String>);

impl SessionIds {
    /// The ids as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no ids.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SessionIds {
    fn from(id: &str) -> Self {
        Self(vec![id.to_string()])
    }
}

impl From<String> for SessionIds {
    fn from(id: String) -> Self {
        Self(vec![id])
    }
}

impl From<Vec<String>> for SessionIds {
    fn from(ids: Vec<String>) -> Self {
        Self(ids)
    }
}

impl From<&[&str]> for SessionIds {
    fn from(ids: &[&str]) -> Self {
        Self(ids.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SessionIds {
    fn from(ids: [&str; N]) -> Self {
        Self(ids.iter().map(|s| s.to_string()).collect())
    }
}

struct StoreInner {
    config: StoreConfig,
    connectivity: Connectivity,
}

/// Session store over a caller-owned repository.
///
/// Cloning is cheap and clones share state, so one store can be handed to
/// every request handler.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Create a disconnected store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                connectivity: Connectivity::new(),
            }),
        }
    }

    /// Bind a repository and emit [`StoreEvent::Connect`].
    ///
    /// Re-binding after a failure is how the store recovers; nothing
    /// reconnects automatically.
    pub fn connect(&self, repository: Arc<dyn SessionRepository>) -> &Self {
        self.inner.connectivity.bind(repository);
        self
    }

    /// Unbind the repository and emit [`StoreEvent::Disconnect`].
    ///
    /// The store never closes the repository; it is handed back instead.
    pub fn disconnect(&self) -> Option<Arc<dyn SessionRepository>> {
        self.inner.connectivity.unbind()
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connectivity.state()
    }

    /// Whether the store is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.connectivity.subscribe()
    }

    /// Broadcast a lifecycle event and update the state to match.
    ///
    /// Custom error handlers use this to announce recovery.
    pub fn emit(&self, event: StoreEvent) {
        self.inner.connectivity.emit(event);
    }

    /// Readiness gate starting from the current state.
    pub fn readiness_gate(&self) -> ReadinessGate {
        ReadinessGate::new(self.subscribe(), self.is_connected())
    }

    // ── Session operations ──────────────────────────────────────────

    /// Load the live session for `id`.
    ///
    /// Returns `Ok(None)` when no live row exists. The payload carries the
    /// session id as `id`.
    pub async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        debug!(session_id = %id, "GET");

        let sid = id.to_string();
        let record = self
            .run("load", move |repo| repo.find_live(&sid, now_millis()))
            .await?;

        match record {
            Some(record) => {
                trace!(session_id = %id, json = %record.json, "GOT");
                Ok(Some(record.decode()?))
            }
            None => Ok(None),
        }
    }

    /// Write `session` under `id`, refreshing its deadline.
    ///
    /// Runs a bounded cleanup sweep first when configured. A session that was
    /// destroyed is never revived: the save succeeds as
    /// [`SaveOutcome::Suppressed`] and the tombstone is left intact.
    pub async fn save(&self, id: &str, session: &SessionData) -> Result<SaveOutcome> {
        let json = session.encode()?;
        let ttl = self.inner.config.ttl.resolve(self, session, Some(id));
        let cleanup = CleanupPolicy::from_config(&self.inner.config);
        debug!(session_id = %id, ttl = ttl, "SET");
        trace!(session_id = %id, json = %json, "SET payload");

        let sid = id.to_string();
        let outcome = self
            .run("save", move |repo| {
                let now = now_millis();
                if let Some(policy) = cleanup {
                    policy.run(repo, now)?;
                }
                upsert(repo, sid, json, expiry_deadline(now, ttl))
            })
            .await?;

        if outcome == SaveOutcome::Suppressed {
            debug!(session_id = %id, "SET suppressed, session was destroyed");
        }
        Ok(outcome)
    }

    /// Soft-delete one or more sessions.
    ///
    /// Unknown or already destroyed ids are not an error. Returns the number
    /// of rows newly tombstoned.
    pub async fn destroy(&self, ids: impl Into<SessionIds>) -> Result<usize> {
        let ids = ids.into();
        debug!(session_ids = ?ids.as_slice(), "DEL");
        if ids.is_empty() {
            return Ok(0);
        }

        self.run("destroy", move |repo| {
            repo.tombstone(ids.as_slice(), Utc::now())
        })
        .await
    }

    /// Extend the life of `id` without rewriting its payload.
    ///
    /// A no-op when the cookie carries a fixed expiration. Returns whether a
    /// live row was refreshed.
    pub async fn touch(&self, id: &str, session: &SessionData) -> Result<bool> {
        if session.cookie.has_fixed_expiry() {
            debug!(session_id = %id, "EXPIRE skipped, cookie has fixed expiry");
            return Ok(false);
        }

        let ttl = self.inner.config.ttl.resolve(self, session, Some(id));
        debug!(session_id = %id, ttl = ttl, "EXPIRE");

        let sid = id.to_string();
        let updated = self
            .run("touch", move |repo| {
                repo.update_expiry(&sid, expiry_deadline(now_millis(), ttl))
            })
            .await?;
        Ok(updated > 0)
    }

    /// Every live session, each carrying its id as `id`.
    pub async fn all(&self) -> Result<Vec<SessionData>> {
        let records = self
            .run("all", |repo| repo.list_live(now_millis()))
            .await?;
        records.iter().map(SessionRecord::decode).collect()
    }

    // ── Administration ──────────────────────────────────────────────

    /// Run one cleanup sweep on demand.
    ///
    /// Returns `None` when cleanup is disabled by configuration.
    pub async fn cleanup(&self) -> Result<Option<CleanupReport>> {
        let Some(policy) = CleanupPolicy::from_config(&self.inner.config) else {
            return Ok(None);
        };
        let report = self
            .run("cleanup", move |repo| policy.run(repo, now_millis()))
            .await?;
        Ok(Some(report))
    }

    /// Number of live sessions.
    pub async fn length(&self) -> Result<usize> {
        self.run("length", |repo| repo.count_live(now_millis()))
            .await
    }

    /// Number of rows, tombstoned and expired included.
    pub async fn count(&self) -> Result<usize> {
        self.run("count", |repo| repo.count()).await
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Run `f` against the repository on the blocking pool, routing store
    /// failures through the error hook.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn SessionRepository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = match self.inner.connectivity.repository() {
            Ok(repo) => tokio::task::spawn_blocking(move || f(repo.as_ref()))
                .await
                .unwrap_or_else(|e| Err(StoreError::Task(e.to_string()))),
            Err(e) => Err(e),
        };

        if let Err(err) = &result {
            if err.is_store_failure() {
                self.handle_error(op, err);
            }
        }
        result
    }

    fn handle_error(&self, op: &str, err: &StoreError) {
        warn!(operation = op, error = %err, "Session store operation failed");
        self.inner.connectivity.mark_disconnected();

        match &self.inner.config.on_error {
            Some(handler) => handler(self, err),
            None => self.emit(StoreEvent::Disconnect {
                reason: Some(err.to_string()),
            }),
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Race-safe upsert: update a live row, insert when absent, never touch a
/// tombstone.
fn upsert(
    repo: &dyn SessionRepository,
    id: String,
    json: String,
    expired_at: i64,
) -> Result<SaveOutcome> {
    match repo.find(&id)? {
        Some(existing) if existing.is_tombstoned() => Ok(SaveOutcome::Suppressed),
        Some(_) => {
            // Zero rows means a destroy landed after the lookup.
            if repo.update_live(&id, &json, expired_at)? == 0 {
                Ok(SaveOutcome::Suppressed)
            } else {
                Ok(SaveOutcome::Updated)
            }
        }
        None => {
            if repo.insert(&SessionRecord::new(id, json, expired_at))? == 0 {
                Ok(SaveOutcome::Suppressed)
            } else {
                Ok(SaveOutcome::Inserted)
            }
        }
    }
}
