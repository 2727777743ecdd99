//! Automatic trimming of per-target check history.
//!
//! Every target keeps at most `max_history` checks, the most recent by
//! `checked_at`. Cleanup runs periodically (every hour by default) as a
//! background task and can be triggered manually.
//!
//! Trimming is not transactional with respect to checks inserted concurrently;
//! it only ever removes the oldest rows, so re-running it is always safe.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::CheckStore;
use crate::database::models::TargetId;

/// Targets trimmed concurrently
const TRIM_CONCURRENCY: usize = 4;

/// Retention policy for check history
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Checks kept per target
    pub max_history: usize,
    /// Time between two periodic cleanups
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_history: 5000, cleanup_interval: Duration::from_secs(3600) }
    }
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Targets that had checks deleted
    pub targets_trimmed: usize,
    pub checks_deleted: u64,
    /// Targets whose trimming failed
    pub failures: usize,
}

/// Cleanup manager for excess history
pub struct RetentionCleanup {
    checks: Arc<dyn CheckStore>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    /// Create a new retention cleanup manager
    pub fn new(checks: Arc<dyn CheckStore>, policy: RetentionPolicy) -> Self {
        Self { checks, policy }
    }

    pub fn max_history(&self) -> usize {
        self.policy.max_history
    }

    /// Trim one target down to `max_history` checks. Returns deleted rows.
    pub async fn trim_target(&self, target_id: TargetId) -> Result<u64> {
        let count = self.checks.count_by_target(target_id).await?;
        let max_history = self.policy.max_history as u64;

        if count <= max_history {
            debug!(target_id, "Target has {} checks, within limit of {}", count, max_history);
            return Ok(0);
        }

        info!(
            target_id,
            "Target has {} checks, keeping {}, deleting {}",
            count,
            max_history,
            count - max_history
        );
        let deleted = self.checks.delete_oldest_keeping(target_id, self.policy.max_history).await?;
        debug!(target_id, deleted, "Deleted old checks");
        Ok(deleted)
    }

    /// Trim every target present in the check store. A failing target is
    /// logged and skipped.
    pub async fn cleanup_excess_history(&self) -> Result<RetentionReport> {
        info!(
            "Starting cleanup of old checks, keeping last {} per target",
            self.policy.max_history
        );

        let target_ids = self.checks.find_distinct_target_ids().await?;

        let outcomes: Vec<(TargetId, Result<u64>)> = stream::iter(target_ids)
            .map(|target_id| async move { (target_id, self.trim_target(target_id).await) })
            .buffer_unordered(TRIM_CONCURRENCY)
            .collect()
            .await;

        let mut report = RetentionReport::default();
        for (target_id, outcome) in outcomes {
            match outcome {
                Ok(0) => {}
                Ok(deleted) => {
                    report.targets_trimmed += 1;
                    report.checks_deleted += deleted;
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(target_id, "Failed to trim check history: {}", e);
                }
            }
        }

        info!(
            targets_trimmed = report.targets_trimmed,
            checks_deleted = report.checks_deleted,
            failures = report.failures,
            "Retention cleanup completed"
        );
        Ok(report)
    }

    /// On-demand cleanup. Returns how many targets were actually trimmed.
    pub async fn trigger_manual_cleanup(&self) -> Result<usize> {
        info!("Manual cleanup triggered");
        Ok(self.cleanup_excess_history().await?.targets_trimmed)
    }

    pub async fn total_checks_count(&self) -> Result<u64> {
        self.checks.count_all().await
    }

    pub async fn checks_count_for_target(&self, target_id: TargetId) -> Result<u64> {
        self.checks.count_by_target(target_id).await
    }

    /// Start background cleanup task
    pub fn start_periodic_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let cleanup = RetentionCleanup::new(Arc::clone(&self.checks), self.policy.clone());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup.policy.cleanup_interval);

            loop {
                interval.tick().await;

                match cleanup.cleanup_excess_history().await {
                    Ok(report) => {
                        debug!("Periodic cleanup completed: {} checks deleted", report.checks_deleted);
                    }
                    Err(e) => {
                        warn!("Periodic cleanup failed: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_database;
    use crate::monitoring::types::Check;
    use chrono::{Duration as ChronoDuration, Utc};

    fn policy(max_history: usize) -> RetentionPolicy {
        RetentionPolicy { max_history, ..RetentionPolicy::default() }
    }

    /// Insert `count` checks one minute apart, in scrambled order
    async fn seed(db: &dyn CheckStore, target_id: TargetId, count: i64) {
        let base = Utc::now() - ChronoDuration::days(1);
        let mut offsets: Vec<i64> = (0..count).collect();
        offsets.sort_by_key(|i| (i * 7919) % count);

        for minute in offsets {
            let check = Check {
                id: None,
                target_id,
                target_name: format!("target-{target_id}"),
                status_code: 200,
                is_up: true,
                response_time: Duration::from_millis(5),
                error_message: None,
                checked_at: base + ChronoDuration::minutes(minute),
            };
            db.save_check(&check).await.unwrap();
        }
    }

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_history, 5000);
        assert_eq!(policy.cleanup_interval, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent() {
        let (db, _dir) = test_database().await.unwrap();
        seed(db.as_ref(), 1, 60).await;

        let before = db.find_recent_checks(1, 50).await.unwrap();
        let cleanup = RetentionCleanup::new(db.clone(), policy(50));
        let deleted = cleanup.trim_target(1).await.unwrap();

        assert_eq!(deleted, 10);
        assert_eq!(db.count_by_target(1).await.unwrap(), 50);
        let after = db.find_recent_checks(1, 100).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_cleanup_is_per_target_and_rerunnable() {
        let (db, _dir) = test_database().await.unwrap();
        seed(db.as_ref(), 1, 30).await;
        seed(db.as_ref(), 2, 10).await;
        seed(db.as_ref(), 3, 25).await;

        let cleanup = RetentionCleanup::new(db.clone(), policy(20));
        let report = cleanup.cleanup_excess_history().await.unwrap();

        assert_eq!(
            report,
            RetentionReport { targets_trimmed: 2, checks_deleted: 15, failures: 0 }
        );
        assert_eq!(cleanup.checks_count_for_target(1).await.unwrap(), 20);
        assert_eq!(cleanup.checks_count_for_target(2).await.unwrap(), 10);
        assert_eq!(cleanup.checks_count_for_target(3).await.unwrap(), 20);
        assert_eq!(cleanup.total_checks_count().await.unwrap(), 50);

        // Nothing left to do on a second pass
        assert_eq!(cleanup.trigger_manual_cleanup().await.unwrap(), 0);
        assert_eq!(cleanup.total_checks_count().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_manual_trigger_counts_trimmed_targets() {
        let (db, _dir) = test_database().await.unwrap();
        seed(db.as_ref(), 4, 12).await;
        seed(db.as_ref(), 5, 3).await;

        let cleanup = RetentionCleanup::new(db.clone(), policy(5));
        assert_eq!(cleanup.max_history(), 5);
        assert_eq!(cleanup.trigger_manual_cleanup().await.unwrap(), 1);
        assert_eq!(cleanup.checks_count_for_target(4).await.unwrap(), 5);
        assert_eq!(cleanup.checks_count_for_target(5).await.unwrap(), 3);
    }
}
