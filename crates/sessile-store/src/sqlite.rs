//! SQLite implementation of [`SessionRepository`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::record::SessionRecord;
use crate::repository::SessionRepository;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

const SELECT_COLUMNS: &str = "SELECT id, json, expired_at, destroyed_at FROM sessions";

/// Session repository over a single SQLite connection.
///
/// The connection can be closed with [`close`](Self::close), after which every
/// operation fails with [`StoreError::ConnectionClosed`] until
/// [`reopen`](Self::reopen) succeeds.
pub struct SqliteSessionRepository {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteSessionRepository {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_file(path)?;
        info!(path = %path.display(), "Session database opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        debug!("In-memory session database created");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.conn.lock().take().is_some();
        if closed {
            info!("Session database closed");
        }
        closed
    }

    /// Re-open a file-backed database after [`close`](Self::close).
    ///
    /// A no-op when the connection is still open. In-memory databases cannot
    /// be re-opened since their contents are gone.
    pub fn reopen(&self) -> Result<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }
        let path = self.path.as_deref().ok_or_else(|| {
            StoreError::Config("in-memory database cannot be re-opened".to_string())
        })?;
        *guard = Some(open_file(path)?);
        info!(path = %path.display(), "Session database re-opened");
        Ok(())
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Database path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::ConnectionClosed)?;
        f(conn)
    }
}

impl std::fmt::Debug for SqliteSessionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionRepository")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn find_live(&self, id: &str, now_ms: i64) -> Result<Option<SessionRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "{SELECT_COLUMNS} WHERE id = ?1 AND destroyed_at IS NULL AND expired_at > ?2"
                    ),
                    params![id, now_ms],
                    row_to_record,
                )
                .optional()?
                .inspect(|record| debug_assert!(record.is_live(now_ms))))
        })
    }

    fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    params![id],
                    row_to_record,
                )
                .optional()?)
        })
    }

    fn insert(&self, record: &SessionRecord) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT INTO sessions (id, json, expired_at, destroyed_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET json = excluded.json, expired_at = excluded.expired_at
                 WHERE sessions.destroyed_at IS NULL",
                params![
                    record.id,
                    record.json,
                    record.expired_at,
                    record.destroyed_at.map(|dt| dt.to_rfc3339())
                ],
            )?)
        })
    }

    fn update_live(&self, id: &str, json: &str, expired_at: i64) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE sessions SET json = ?2, expired_at = ?3
                 WHERE id = ?1 AND destroyed_at IS NULL",
                params![id, json, expired_at],
            )?)
        })
    }

    fn update_expiry(&self, id: &str, expired_at: i64) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE sessions SET expired_at = ?2 WHERE id = ?1 AND destroyed_at IS NULL",
                params![id, expired_at],
            )?)
        })
    }

    fn tombstone(&self, ids: &[String], destroyed_at: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let destroyed_at = destroyed_at.to_rfc3339();
            let tx = conn.unchecked_transaction()?;
            let mut affected = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE sessions SET destroyed_at = ?2 WHERE id = ?1 AND destroyed_at IS NULL",
                )?;
                for id in ids {
                    affected += stmt.execute(params![id, destroyed_at])?;
                }
            }
            tx.commit()?;
            Ok(affected)
        })
    }

    fn list_live(&self, now_ms: i64) -> Result<Vec<SessionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE destroyed_at IS NULL AND expired_at > ?1
                 ORDER BY expired_at ASC, id ASC"
            ))?;
            let iter = stmt.query_map(params![now_ms], row_to_record)?;
            let mut records = Vec::new();
            for r in iter {
                let record = r?;
                debug_assert!(record.is_live(now_ms));
                records.push(record);
            }
            Ok(records)
        })
    }

    fn delete_expired_limited(&self, now_ms: i64, limit: usize) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM sessions WHERE id IN (
                     SELECT id FROM sessions WHERE expired_at <= ?1
                     ORDER BY expired_at ASC, id ASC LIMIT ?2
                 )",
                params![now_ms, sql_limit(limit)],
            )?)
        })
    }

    fn select_expired_ids(&self, now_ms: i64, limit: usize) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM sessions WHERE expired_at <= ?1
                 ORDER BY expired_at ASC, id ASC LIMIT ?2",
            )?;
            let iter = stmt.query_map(params![now_ms, sql_limit(limit)], |row| {
                row.get::<_, String>(0)
            })?;
            let mut ids = Vec::new();
            for id in iter {
                ids.push(id?);
            }
            Ok(ids)
        })
    }

    fn delete_expired_ids(&self, ids: &[String], now_ms: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        // One bound statement per id keeps the batch under SQLite's
        // host parameter limit however large the cleanup limit is.
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut removed = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM sessions WHERE id = ?1 AND expired_at <= ?2")?;
                for id in ids {
                    removed += stmt.execute(params![id, now_ms])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    fn count_live(&self, now_ms: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE destroyed_at IS NULL AND expired_at > ?1",
                params![now_ms],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn open_file(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    run_migrations(&mut conn)?;
    Ok(conn)
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    Ok(())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        json: row.get(1)?,
        expired_at: row.get(2)?,
        destroyed_at: row.get::<_, Option<String>>(3)?.map(|s| parse_dt(&s)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now_millis;

    fn test_repo() -> SqliteSessionRepository {
        SqliteSessionRepository::open_in_memory().expect("failed to open in-memory repository")
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_migrations_run() {
        let repo = test_repo();
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_find() {
        let repo = test_repo();
        let now = now_millis();

        repo.insert(&SessionRecord::new("s1", "{}", now + 10_000))
            .unwrap();

        let live = repo.find_live("s1", now).unwrap().unwrap();
        assert_eq!(live.json, "{}");
        assert!(live.destroyed_at.is_none());

        assert!(repo.find_live("s1", now + 10_000).unwrap().is_none());
        assert!(repo.find("s1").unwrap().is_some());
        assert!(repo.find("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_live_skips_tombstones() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", "old", now + 10_000))
            .unwrap();

        assert_eq!(repo.update_live("s1", "new", now + 20_000).unwrap(), 1);
        assert_eq!(repo.find("s1").unwrap().unwrap().json, "new");

        repo.tombstone(&ids(&["s1"]), Utc::now()).unwrap();
        assert_eq!(repo.update_live("s1", "late", now + 30_000).unwrap(), 0);

        let row = repo.find("s1").unwrap().unwrap();
        assert_eq!(row.json, "new");
        assert_eq!(row.expired_at, now + 20_000);
        assert!(row.is_tombstoned());
    }

    #[test]
    fn test_insert_conflict_does_not_revive_tombstone() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", "old", now + 10_000))
            .unwrap();
        repo.tombstone(&ids(&["s1"]), Utc::now()).unwrap();

        let written = repo
            .insert(&SessionRecord::new("s1", "new", now + 20_000))
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(repo.find("s1").unwrap().unwrap().json, "old");
    }

    #[test]
    fn test_insert_conflict_overwrites_live_row() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", "first", now + 10_000))
            .unwrap();
        repo.insert(&SessionRecord::new("s1", "second", now + 20_000))
            .unwrap();

        let row = repo.find("s1").unwrap().unwrap();
        assert_eq!(row.json, "second");
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_tombstone_is_idempotent() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", "{}", now + 10_000))
            .unwrap();

        assert_eq!(repo.tombstone(&ids(&["s1", "ghost"]), Utc::now()).unwrap(), 1);
        let first = repo.find("s1").unwrap().unwrap().destroyed_at;

        assert_eq!(repo.tombstone(&ids(&["s1"]), Utc::now()).unwrap(), 0);
        let second = repo.find("s1").unwrap().unwrap().destroyed_at;
        assert_eq!(first, second);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_update_expiry_keeps_payload() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", r#"{"a":1}"#, now + 1_000))
            .unwrap();

        assert_eq!(repo.update_expiry("s1", now + 99_000).unwrap(), 1);
        let row = repo.find("s1").unwrap().unwrap();
        assert_eq!(row.json, r#"{"a":1}"#);
        assert_eq!(row.expired_at, now + 99_000);
    }

    #[test]
    fn test_delete_expired_limited_oldest_first() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("newer", "{}", now - 1_000))
            .unwrap();
        repo.insert(&SessionRecord::new("older", "{}", now - 5_000))
            .unwrap();
        repo.insert(&SessionRecord::new("live", "{}", now + 5_000))
            .unwrap();

        assert_eq!(repo.delete_expired_limited(now, 1).unwrap(), 1);
        assert!(repo.find("older").unwrap().is_none());
        assert!(repo.find("newer").unwrap().is_some());

        assert_eq!(repo.delete_expired_limited(now, 10).unwrap(), 1);
        assert!(repo.find("live").unwrap().is_some());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_two_phase_rechecks_expiry() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("a", "{}", now - 2_000))
            .unwrap();
        repo.insert(&SessionRecord::new("b", "{}", now - 1_000))
            .unwrap();

        let selected = repo.select_expired_ids(now, 10).unwrap();
        assert_eq!(selected, ids(&["a", "b"]));

        // "b" is refreshed between select and delete.
        repo.update_expiry("b", now + 60_000).unwrap();

        assert_eq!(repo.delete_expired_ids(&selected, now).unwrap(), 1);
        assert!(repo.find("a").unwrap().is_none());
        assert!(repo.find("b").unwrap().is_some());
    }

    #[test]
    fn test_delete_ids_handles_hostile_ids() {
        let repo = test_repo();
        let now = now_millis();
        let nasty = "x') OR 1=1; --";
        repo.insert(&SessionRecord::new(nasty, "{}", now - 1_000))
            .unwrap();
        repo.insert(&SessionRecord::new("bystander", "{}", now - 1_000))
            .unwrap();

        assert_eq!(repo.delete_expired_ids(&ids(&[nasty]), now).unwrap(), 1);
        assert!(repo.find("bystander").unwrap().is_some());
        assert_eq!(repo.delete_expired_ids(&[], now).unwrap(), 0);
    }

    #[test]
    fn test_delete_expired_ids_beyond_parameter_limit() {
        let repo = test_repo();
        let now = now_millis();
        let expired: Vec<String> = (0..33_000).map(|i| format!("old-{i:05}")).collect();
        for id in &expired {
            repo.insert(&SessionRecord::new(id.as_str(), "{}", now - 1_000))
                .unwrap();
        }

        let selected = repo.select_expired_ids(now, 50_000).unwrap();
        assert_eq!(selected.len(), 33_000);
        assert_eq!(repo.delete_expired_ids(&selected, now).unwrap(), 33_000);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_list_and_count_live() {
        let repo = test_repo();
        let now = now_millis();
        repo.insert(&SessionRecord::new("a", "{}", now + 1_000))
            .unwrap();
        repo.insert(&SessionRecord::new("b", "{}", now + 2_000))
            .unwrap();
        repo.insert(&SessionRecord::new("c", "{}", now - 1_000))
            .unwrap();
        repo.tombstone(&ids(&["b"]), Utc::now()).unwrap();

        let live: Vec<String> = repo
            .list_live(now)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(live, ids(&["a"]));
        assert_eq!(repo.count_live(now).unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn test_close_fails_operations() {
        let repo = test_repo();
        assert!(repo.close());
        assert!(!repo.close());
        assert!(!repo.is_open());

        let err = repo.count().unwrap_err();
        assert!(matches!(err, StoreError::ConnectionClosed));

        let err = repo.reopen().unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let repo = SqliteSessionRepository::open(&path).unwrap();
        let now = now_millis();
        repo.insert(&SessionRecord::new("s1", "{}", now + 60_000))
            .unwrap();

        repo.close();
        assert!(repo.find("s1").is_err());

        repo.reopen().unwrap();
        assert!(repo.find_live("s1", now).unwrap().is_some());
        assert_eq!(repo.path(), Some(path.as_path()));
    }
}
