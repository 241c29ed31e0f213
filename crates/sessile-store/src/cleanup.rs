//! Bounded sweeps of expired session rows.
//!
//! A sweep physically removes at most `limit` rows whose deadline has passed,
//! tombstoned or not, oldest expiry first. Sweeps run opportunistically on the
//! save path (see [`SessionStore::save`](crate::SessionStore::save)); there is
//! no background task.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::repository::SessionRepository;

/// How expired rows are selected for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    /// One `DELETE ... WHERE id IN (SELECT ... LIMIT n)` statement.
    Subquery,
    /// Select the ids first, then delete exactly those ids.
    ///
    /// For engines that cannot limit rows inside a delete subquery.
    TwoPhase,
}

impl CleanupStrategy {
    /// Map the `limit_subquery` flag onto a strategy.
    pub fn from_limit_subquery(limit_subquery: bool) -> Self {
        if limit_subquery {
            Self::Subquery
        } else {
            Self::TwoPhase
        }
    }
}

impl std::fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupStrategy::Subquery => write!(f, "subquery"),
            CleanupStrategy::TwoPhase => write!(f, "two-phase"),
        }
    }
}

/// Batch size and strategy for one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Maximum rows removed per sweep. Never zero.
    pub limit: usize,
    /// Selection strategy.
    pub strategy: CleanupStrategy,
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Strategy used.
    pub strategy: CleanupStrategy,
    /// Rows physically removed.
    pub removed: usize,
}

impl CleanupPolicy {
    /// Create a policy. Returns `None` for a zero limit (cleanup disabled).
    pub fn new(limit: usize, strategy: CleanupStrategy) -> Option<Self> {
        (limit > 0).then_some(Self { limit, strategy })
    }

    /// Policy for a store configuration, `None` when cleanup is disabled.
    pub fn from_config(config: &StoreConfig) -> Option<Self> {
        Self::new(
            config.cleanup_limit,
            CleanupStrategy::from_limit_subquery(config.limit_subquery),
        )
    }

    /// Remove up to `limit` rows with `expired_at <= now_ms`.
    pub fn run(&self, repo: &dyn SessionRepository, now_ms: i64) -> Result<CleanupReport> {
        let removed = match self.strategy {
            CleanupStrategy::Subquery => repo.delete_expired_limited(now_ms, self.limit)?,
            CleanupStrategy::TwoPhase => {
                let ids = repo.select_expired_ids(now_ms, self.limit)?;
                if ids.is_empty() {
                    0
                } else {
                    repo.delete_expired_ids(&ids, now_ms)?
                }
            }
        };

        if removed > 0 {
            info!(
                strategy = %self.strategy,
                limit = self.limit,
                removed = removed,
                "Swept expired sessions"
            );
        }

        Ok(CleanupReport {
            strategy: self.strategy,
            removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SessionRecord, now_millis};
    use crate::sqlite::SqliteSessionRepository;
    use chrono::Utc;

    fn seeded_repo(now: i64) -> SqliteSessionRepository {
        let repo = SqliteSessionRepository::open_in_memory().unwrap();
        repo.insert(&SessionRecord::new("expired-1", "{}", now - 3_000))
            .unwrap();
        repo.insert(&SessionRecord::new("expired-2", "{}", now - 2_000))
            .unwrap();
        repo.insert(&SessionRecord::new("expired-3", "{}", now - 1_000))
            .unwrap();
        repo.insert(&SessionRecord::new("live", "{}", now + 60_000))
            .unwrap();
        repo
    }

    #[test]
    fn test_zero_limit_disables() {
        assert!(CleanupPolicy::new(0, CleanupStrategy::Subquery).is_none());
        assert!(CleanupPolicy::from_config(&StoreConfig::default()).is_none());

        let config = StoreConfig::new()
            .with_cleanup_limit(3)
            .with_limit_subquery(false);
        let policy = CleanupPolicy::from_config(&config).unwrap();
        assert_eq!(policy.limit, 3);
        assert_eq!(policy.strategy, CleanupStrategy::TwoPhase);
    }

    #[test]
    fn test_both_strategies_respect_limit() {
        for strategy in [CleanupStrategy::Subquery, CleanupStrategy::TwoPhase] {
            let now = now_millis();
            let repo = seeded_repo(now);
            let policy = CleanupPolicy::new(2, strategy).unwrap();

            let report = policy.run(&repo, now).unwrap();
            assert_eq!(report.removed, 2, "strategy {strategy}");
            assert_eq!(report.strategy, strategy);

            // Oldest two went first.
            assert!(repo.find("expired-1").unwrap().is_none());
            assert!(repo.find("expired-2").unwrap().is_none());
            assert!(repo.find("expired-3").unwrap().is_some());

            let report = policy.run(&repo, now).unwrap();
            assert_eq!(report.removed, 1);

            let report = policy.run(&repo, now).unwrap();
            assert_eq!(report.removed, 0);
            assert!(repo.find("live").unwrap().is_some());
        }
    }

    #[test]
    fn test_unexpired_tombstones_survive() {
        let now = now_millis();
        let repo = SqliteSessionRepository::open_in_memory().unwrap();
        repo.insert(&SessionRecord::new("destroyed", "{}", now + 60_000))
            .unwrap();
        repo.tombstone(&["destroyed".to_string()], Utc::now())
            .unwrap();

        let policy = CleanupPolicy::new(10, CleanupStrategy::Subquery).unwrap();
        assert_eq!(policy.run(&repo, now).unwrap().removed, 0);

        let later = now + 60_000;
        assert_eq!(policy.run(&repo, later).unwrap().removed, 1);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(CleanupStrategy::Subquery.to_string(), "subquery");
        assert_eq!(CleanupStrategy::TwoPhase.to_string(), "two-phase");
        assert_eq!(
            CleanupStrategy::from_limit_subquery(true),
            CleanupStrategy::Subquery
        );
    }
}
