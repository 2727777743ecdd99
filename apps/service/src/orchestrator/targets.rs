//! Administrative operations on monitored targets.
//!
//! Creating or editing a target triggers one immediate out-of-band probe so the
//! dashboard has a status before the next cycle.

use std::sync::Arc;
use tracing::{info, warn};

use super::retention::RetentionCleanup;
use crate::database::models::{AcceptedStatusCodes, Target, TargetId, Webhook, now_millis};
use crate::database::{CheckStore, TargetStore};
use crate::error::{ServiceError, ServiceResult};
use crate::monitoring::{Check, CycleScheduler, UptimeCalculator, UptimeStats};
use crate::validation::{
    ValidationResult, validate_http_endpoint, validate_target_name, validate_webhook_url,
};

/// Default number of checks returned by [`TargetAdmin::history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Editable fields of a target
#[derive(Debug, Clone, Default)]
pub struct NewTarget {
    pub name: String,
    pub url: String,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Comma separated, `"200,204"`. Blank accepts only 200.
    pub accepted_status_codes: String,
    pub webhook_url: Option<String>,
}

impl NewTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), url: url.into(), ..Self::default() }
    }

    fn validate(&self) -> ServiceResult<()> {
        ValidationResult::all([
            validate_target_name(&self.name),
            validate_http_endpoint(&self.url),
            validate_webhook_url(self.webhook_url.as_deref()),
        ])
        .to_result()
        .map_err(|e| ServiceError::Invalid(e.to_string()))
    }

    /// Copy the editable fields onto `target`
    fn apply_to(&self, target: &mut Target) {
        target.name = self.name.trim().to_string();
        target.url = self.url.trim().to_string();
        target.category = non_blank(self.category.as_deref());
        target.description = non_blank(self.description.as_deref());
        target.accepted_status_codes = AcceptedStatusCodes::parse(&self.accepted_status_codes);
        target.webhook = self.webhook_url.as_deref().and_then(Webhook::from_url);
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Administrative facade over the stores and the monitoring engine
pub struct TargetAdmin {
    targets: Arc<dyn TargetStore>,
    checks: Arc<dyn CheckStore>,
    scheduler: CycleScheduler,
    uptime: UptimeCalculator,
    retention: Arc<RetentionCleanup>,
}

impl TargetAdmin {
    pub fn new(
        targets: Arc<dyn TargetStore>,
        checks: Arc<dyn CheckStore>,
        scheduler: CycleScheduler,
        retention: Arc<RetentionCleanup>,
    ) -> Self {
        let uptime = UptimeCalculator::new(checks.clone(), targets.clone());
        Self { targets, checks, scheduler, uptime, retention }
    }

    pub async fn list_targets(&self) -> ServiceResult<Vec<Target>> {
        Ok(self.targets.find_all_targets().await?)
    }

    pub async fn get_target(&self, id: TargetId) -> ServiceResult<Target> {
        self.targets.find_target(id).await?.ok_or(ServiceError::NotFound(id))
    }

    /// Register a new active target and probe it once
    pub async fn create_target(&self, new: NewTarget) -> ServiceResult<(Target, Check)> {
        new.validate()?;

        let mut target = Target::new(String::new(), String::new());
        new.apply_to(&mut target);
        target.id = Some(self.targets.save_target(&target).await?);

        info!(target_id = ?target.id, "Target {} added ({})", target.name, target.url);
        let check = self.scheduler.probe_now(&target).await;
        Ok((target, check))
    }

    /// Replace the editable fields of a target and probe it once. Creation
    /// time and the active flag are kept.
    pub async fn update_target(&self, id: TargetId, new: NewTarget) -> ServiceResult<(Target, Check)> {
        new.validate()?;

        let mut target = self.get_target(id).await?;
        new.apply_to(&mut target);
        target.updated_at = now_millis();
        self.targets.save_target(&target).await?;

        info!(target_id = id, "Target {} updated", target.name);
        let check = self.scheduler.probe_now(&target).await;
        Ok((target, check))
    }

    /// Flip the active flag. Paused targets are skipped by cycles.
    pub async fn toggle_target(&self, id: TargetId) -> ServiceResult<Target> {
        let mut target = self.get_target(id).await?;
        target.active = !target.active;
        target.updated_at = now_millis();
        self.targets.save_target(&target).await?;

        info!(target_id = id, active = target.active, "Target {} toggled", target.name);
        Ok(target)
    }

    /// Delete a target with its checks and notification state
    pub async fn delete_target(&self, id: TargetId) -> ServiceResult<()> {
        let target = self.get_target(id).await?;

        let deleted = self.checks.delete_all_for_target(id).await?;
        self.targets.delete_target(id).await?;

        info!(target_id = id, deleted, "Target {} deleted", target.name);
        Ok(())
    }

    pub async fn categories(&self) -> ServiceResult<Vec<String>> {
        Ok(self.targets.find_distinct_categories().await?)
    }

    /// The most recent check of every target that has one
    pub async fn latest_statuses(&self) -> ServiceResult<Vec<Check>> {
        Ok(self.checks.find_latest_per_target().await?)
    }

    /// Most recent checks first, [`DEFAULT_HISTORY_LIMIT`] when `limit` is `None`
    pub async fn history(&self, id: TargetId, limit: Option<usize>) -> ServiceResult<Vec<Check>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        Ok(self.checks.find_recent_checks(id, limit).await?)
    }

    pub async fn stats(&self, id: TargetId) -> ServiceResult<UptimeStats> {
        self.uptime.stats(id).await?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn total_checks(&self) -> ServiceResult<u64> {
        Ok(self.retention.total_checks_count().await?)
    }

    pub async fn checks_for_target(&self, id: TargetId) -> ServiceResult<u64> {
        Ok(self.retention.checks_count_for_target(id).await?)
    }

    pub fn max_history(&self) -> usize {
        self.retention.max_history()
    }

    /// Trim every target now. Returns how many targets lost checks.
    pub async fn trigger_cleanup(&self) -> ServiceResult<usize> {
        let trimmed = self.retention.trigger_manual_cleanup().await?;
        if trimmed == 0 {
            warn!("Manual cleanup found nothing to trim");
        }
        Ok(trimmed)
    }
}
