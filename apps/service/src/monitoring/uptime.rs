//! Windowed availability statistics computed from stored checks.
//!
//! A window without any checks counts as fully available (`100.0`). That is a
//! reporting convention, not a measurement: a freshly added or long paused
//! target shows 100% until its first check lands in the window.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::Check;
use crate::database::models::TargetId;
use crate::database::{CheckStore, TargetStore};

pub const DAY_HOURS: u32 = 24;
pub const WEEK_HOURS: u32 = 7 * 24;

/// Availability of a window with no data
pub const NO_DATA_UPTIME: f64 = 100.0;

/// Point query served to dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    #[serde(rename = "uptime24h")]
    pub uptime_24h: f64,
    #[serde(rename = "uptime7d")]
    pub uptime_7d: f64,
    #[serde(rename = "targetName")]
    pub target_name: String,
}

impl UptimeStats {
    /// Copy with both percentages rounded for display
    pub fn rounded(&self) -> Self {
        Self {
            uptime_24h: round_one_decimal(self.uptime_24h),
            uptime_7d: round_one_decimal(self.uptime_7d),
            target_name: self.target_name.clone(),
        }
    }
}

pub struct UptimeCalculator {
    checks: Arc<dyn CheckStore>,
    targets: Arc<dyn TargetStore>,
}

impl UptimeCalculator {
    pub fn new(checks: Arc<dyn CheckStore>, targets: Arc<dyn TargetStore>) -> Self {
        Self { checks, targets }
    }

    /// Unrounded uptime percentage over the last `window_hours`
    pub async fn uptime(&self, target_id: TargetId, window_hours: u32) -> Result<f64> {
        self.uptime_at(target_id, window_hours, Utc::now()).await
    }

    /// Same as [`uptime`](Self::uptime) with an explicit "now"
    pub async fn uptime_at(
        &self,
        target_id: TargetId,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let cutoff = ChronoDuration::try_hours(i64::from(window_hours))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let checks = self.checks.find_checks_since(target_id, cutoff).await?;
        Ok(uptime_percentage(&checks))
    }

    /// 24h and 7d uptime plus the target's name. `None` for unknown targets.
    pub async fn stats(&self, target_id: TargetId) -> Result<Option<UptimeStats>> {
        let Some(target) = self.targets.find_target(target_id).await? else {
            return Ok(None);
        };

        let (uptime_24h, uptime_7d) = tokio::try_join!(
            self.uptime(target_id, DAY_HOURS),
            self.uptime(target_id, WEEK_HOURS)
        )?;

        Ok(Some(UptimeStats { uptime_24h, uptime_7d, target_name: target.name }))
    }
}

/// `100 * up / total`, or [`NO_DATA_UPTIME`] for an empty slice
pub fn uptime_percentage(checks: &[Check]) -> f64 {
    if checks.is_empty() {
        return NO_DATA_UPTIME;
    }
    let up = checks.iter().filter(|check| check.is_up).count();
    (up as f64 * 100.0) / checks.len() as f64
}

/// Display rounding to one decimal place
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
