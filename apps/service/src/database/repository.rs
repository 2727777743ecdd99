use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::time::Duration;

use super::models::{
    AcceptedStatusCodes, NotificationState, Target, TargetId, Webhook, i64_to_timestamp,
    timestamp_to_i64,
};
use crate::monitoring::types::Check;
use crate::notification::destination::DestinationKind;
use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str = "id, name, category, description, url, accepted_statuses, active, \
                              webhook_url, webhook_kind, created_at, updated_at";

const CHECK_COLUMNS: &str =
    "id, target_id, target_name, status_code, is_up, response_time_ms, error_message, checked_at";

/// Durable registry of monitored endpoints
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn find_all_targets(&self) -> Result<Vec<Target>>;

    /// Targets with the active flag set, ordered by name
    async fn find_active_targets(&self) -> Result<Vec<Target>>;

    async fn find_target(&self, id: TargetId) -> Result<Option<Target>>;

    /// Insert when `target.id` is `None`, update otherwise. Returns the id.
    async fn save_target(&self, target: &Target) -> Result<TargetId>;

    /// Remove the target and its notification state. Checks are left to
    /// [`CheckStore::delete_all_for_target`].
    async fn delete_target(&self, id: TargetId) -> Result<()>;

    async fn find_distinct_categories(&self) -> Result<Vec<String>>;
}

/// Append-only log of probe results
#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn save_check(&self, check: &Check) -> Result<i64>;

    /// At most one check per target: the one with the greatest `checked_at`,
    /// ties resolved in favour of the row inserted first
    async fn find_latest_per_target(&self) -> Result<Vec<Check>>;

    /// Newest first
    async fn find_recent_checks(&self, target_id: TargetId, limit: usize) -> Result<Vec<Check>>;

    /// Checks with `checked_at >= cutoff`, newest first
    async fn find_checks_since(&self, target_id: TargetId, cutoff: DateTime<Utc>)
    -> Result<Vec<Check>>;

    async fn count_by_target(&self, target_id: TargetId) -> Result<u64>;

    async fn count_all(&self) -> Result<u64>;

    async fn find_distinct_target_ids(&self) -> Result<Vec<TargetId>>;

    /// Delete everything but the `keep` most recent checks of a target.
    /// Returns the number of deleted rows.
    async fn delete_oldest_keeping(&self, target_id: TargetId, keep: usize) -> Result<u64>;

    async fn delete_all_for_target(&self, target_id: TargetId) -> Result<u64>;
}

/// Keyed store for the alerting debounce state, separate from the target row
/// so administrative edits never clobber it
#[async_trait]
pub trait NotificationStateStore: Send + Sync {
    /// Missing rows read as [`NotificationState::default`]
    async fn get_notification_state(&self, target_id: TargetId) -> Result<NotificationState>;

    /// Compare-and-swap: store `next` only if the current state still equals
    /// `expected`. Returns whether the swap happened.
    async fn advance_notification_state(
        &self,
        target_id: TargetId,
        expected: NotificationState,
        next: NotificationState,
    ) -> Result<bool>;
}

/// LibSQL database implementation of all stores
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {e}"))
    }

    async fn query_targets(&self, sql: &str, params: impl libsql::params::IntoParams + Send) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn query_checks(&self, sql: &str, params: impl libsql::params::IntoParams + Send) -> Result<Vec<Check>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut checks = Vec::new();

        while let Some(row) = rows.next().await? {
            checks.push(check_from_row(&row)?);
        }

        Ok(checks)
    }

    async fn query_count(&self, sql: &str, params: impl libsql::params::IntoParams + Send) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

fn target_from_row(row: &Row) -> Result<Target> {
    let accepted: String = row.get(5)?;
    let webhook_url: Option<String> = row.get(7)?;
    let webhook_kind: Option<String> = row.get(8)?;

    // Rows written before a kind was stored are classified on read
    let webhook = webhook_url.as_deref().and_then(Webhook::from_url).map(|mut hook| {
        if let Some(kind) = webhook_kind.as_deref().and_then(|k| k.parse::<DestinationKind>().ok()) {
            hook.kind = kind;
        }
        hook
    });

    Ok(Target {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        url: row.get(4)?,
        accepted_status_codes: AcceptedStatusCodes::parse(&accepted),
        active: row.get::<i64>(6)? != 0,
        webhook,
        created_at: i64_to_timestamp(row.get(9)?),
        updated_at: i64_to_timestamp(row.get(10)?),
    })
}

fn check_from_row(row: &Row) -> Result<Check> {
    Ok(Check {
        id: Some(row.get(0)?),
        target_id: row.get(1)?,
        target_name: row.get(2)?,
        status_code: row.get::<i64>(3)?.clamp(0, u16::MAX as i64) as u16,
        is_up: row.get::<i64>(4)? != 0,
        response_time: Duration::from_millis(row.get::<i64>(5)?.max(0) as u64),
        error_message: row.get(6)?,
        checked_at: i64_to_timestamp(row.get(7)?),
    })
}

#[async_trait]
impl TargetStore for DatabaseImpl {
    async fn find_all_targets(&self) -> Result<Vec<Target>> {
        self.query_targets(&format!("SELECT {TARGET_COLUMNS} FROM targets ORDER BY id"), ()).await
    }

    async fn find_active_targets(&self) -> Result<Vec<Target>> {
        self.query_targets(
            &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE active = 1 ORDER BY name"),
            (),
        )
        .await
    }

    async fn find_target(&self, id: TargetId) -> Result<Option<Target>> {
        let mut targets = self
            .query_targets(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?"), params![id])
            .await?;
        Ok(targets.pop())
    }

    async fn save_target(&self, target: &Target) -> Result<TargetId> {
        let conn = self.get_conn().await?;
        let created_at = timestamp_to_i64(target.created_at);
        let updated_at = timestamp_to_i64(target.updated_at);
        let webhook_url = target.webhook.as_ref().map(|hook| hook.url.clone());
        let webhook_kind = target.webhook.as_ref().map(|hook| hook.kind.as_str().to_string());

        if let Some(id) = target.id {
            conn.execute(
                "UPDATE targets SET name = ?, category = ?, description = ?, url = ?, accepted_statuses = ?, active = ?, webhook_url = ?, webhook_kind = ?, updated_at = ? WHERE id = ?",
                params![
                    target.name.clone(),
                    target.category.clone(),
                    target.description.clone(),
                    target.url.clone(),
                    target.accepted_status_codes.to_string(),
                    if target.active { 1 } else { 0 },
                    webhook_url,
                    webhook_kind,
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO targets (name, category, description, url, accepted_statuses, active, webhook_url, webhook_kind, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    target.name.clone(),
                    target.category.clone(),
                    target.description.clone(),
                    target.url.clone(),
                    target.accepted_status_codes.to_string(),
                    if target.active { 1 } else { 0 },
                    webhook_url,
                    webhook_kind,
                    created_at,
                    updated_at
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn delete_target(&self, id: TargetId) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute("DELETE FROM notification_states WHERE target_id = ?", params![id]).await?;
        conn.execute("DELETE FROM targets WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn find_distinct_categories(&self) -> Result<Vec<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT category FROM targets WHERE category IS NOT NULL ORDER BY category",
                (),
            )
            .await?;
        let mut categories = Vec::new();

        while let Some(row) = rows.next().await? {
            categories.push(row.get::<String>(0)?);
        }

        Ok(categories)
    }
}

#[async_trait]
impl CheckStore for DatabaseImpl {
    async fn save_check(&self, check: &Check) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO checks (target_id, target_name, status_code, is_up, response_time_ms, error_message, checked_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                check.target_id,
                check.target_name.clone(),
                check.status_code as i64,
                if check.is_up { 1 } else { 0 },
                check.response_time_ms() as i64,
                check.error_message.clone(),
                timestamp_to_i64(check.checked_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn find_latest_per_target(&self) -> Result<Vec<Check>> {
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY target_id ORDER BY checked_at DESC, id ASC
                ) AS row_rank FROM checks
            ) WHERE row_rank = 1 ORDER BY target_id"
        );
        self.query_checks(&sql, ()).await
    }

    async fn find_recent_checks(&self, target_id: TargetId, limit: usize) -> Result<Vec<Check>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM checks WHERE target_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
            ),
            params![target_id, limit as i64],
        )
        .await
    }

    async fn find_checks_since(
        &self,
        target_id: TargetId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Check>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM checks WHERE target_id = ? AND checked_at >= ? ORDER BY checked_at DESC, id DESC"
            ),
            params![target_id, timestamp_to_i64(cutoff)],
        )
        .await
    }

    async fn count_by_target(&self, target_id: TargetId) -> Result<u64> {
        self.query_count("SELECT COUNT(*) FROM checks WHERE target_id = ?", params![target_id]).await
    }

    async fn count_all(&self) -> Result<u64> {
        self.query_count("SELECT COUNT(*) FROM checks", ()).await
    }

    async fn find_distinct_target_ids(&self) -> Result<Vec<TargetId>> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query("SELECT DISTINCT target_id FROM checks ORDER BY target_id", ()).await?;
        let mut ids = Vec::new();

        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }

        Ok(ids)
    }

    async fn delete_oldest_keeping(&self, target_id: TargetId, keep: usize) -> Result<u64> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM checks WHERE target_id = ?1 AND id NOT IN (
                    SELECT id FROM checks WHERE target_id = ?1
                    ORDER BY checked_at DESC, id DESC LIMIT ?2
                )",
                params![target_id, keep as i64],
            )
            .await?;

        Ok(deleted)
    }

    async fn delete_all_for_target(&self, target_id: TargetId) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM checks WHERE target_id = ?", params![target_id]).await?)
    }
}

#[async_trait]
impl NotificationStateStore for DatabaseImpl {
    async fn get_notification_state(&self, target_id: TargetId) -> Result<NotificationState> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT last_status_was_up, last_notification_sent_at FROM notification_states WHERE target_id = ?",
                params![target_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(NotificationState {
                last_status_was_up: row.get::<i64>(0)? != 0,
                last_notification_sent_at: row.get::<Option<i64>>(1)?.map(i64_to_timestamp),
            }),
            None => Ok(NotificationState::default()),
        }
    }

    async fn advance_notification_state(
        &self,
        target_id: TargetId,
        expected: NotificationState,
        next: NotificationState,
    ) -> Result<bool> {
        let conn = self.get_conn().await?;
        let initial = NotificationState::default();

        // Materialize the implicit default row so the swap below has something to match
        conn.execute(
            "INSERT OR IGNORE INTO notification_states (target_id, last_status_was_up, last_notification_sent_at) VALUES (?, ?, ?)",
            params![
                target_id,
                if initial.last_status_was_up { 1 } else { 0 },
                initial.last_notification_sent_at.map(timestamp_to_i64)
            ],
        )
        .await?;

        let swapped = conn
            .execute(
                "UPDATE notification_states SET last_status_was_up = ?, last_notification_sent_at = ?
                 WHERE target_id = ? AND last_status_was_up = ? AND last_notification_sent_at IS ?",
                params![
                    if next.last_status_was_up { 1 } else { 0 },
                    next.last_notification_sent_at.map(timestamp_to_i64),
                    target_id,
                    if expected.last_status_was_up { 1 } else { 0 },
                    expected.last_notification_sent_at.map(timestamp_to_i64)
                ],
            )
            .await?;

        Ok(swapped == 1)
    }
}
