//! Debounced alerting on status transitions and sustained outages.
//!
//! Per target the engine compares the latest check with the stored
//! [`NotificationState`]:
//! - a status change alerts immediately, whatever the timers say
//! - a target that stays down alerts again once `reminder_interval` has
//!   passed since the last delivered alert
//!
//! State only advances after the webhook confirmed delivery, so a failed
//! alert is attempted again on the next evaluation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::payload::{build_payload, format_message};
use super::sender::WebhookSender;
use crate::database::models::{NotificationState, Target, TargetId};
use crate::database::{CheckStore, NotificationStateStore, TargetStore};
use crate::monitoring::{Check, LiveFeed};

/// Why an alert is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    StatusChange,
    Reminder,
}

/// Decide whether an alert is due for a target whose latest check says `is_up`
pub fn evaluate(
    state: &NotificationState,
    is_up: bool,
    now: DateTime<Utc>,
    reminder_interval: Duration,
) -> Option<AlertReason> {
    if is_up != state.last_status_was_up {
        return Some(AlertReason::StatusChange);
    }

    if is_up {
        return None;
    }

    let sent_at = state.last_notification_sent_at?;
    let elapsed = (now - sent_at).to_std().unwrap_or_default();
    (elapsed > reminder_interval).then_some(AlertReason::Reminder)
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Minimum spacing of reminders for a target that stays down
    pub reminder_interval: Duration,
    /// Period of the sweep over stored latest checks
    pub evaluation_interval: Duration,
    /// Upper bound of the exponential delay between failed deliveries.
    /// Zero retries on every evaluation.
    pub retry_backoff_max: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            reminder_interval: Duration::from_millis(300_000),
            evaluation_interval: Duration::from_millis(30_000),
            retry_backoff_max: Duration::ZERO,
        }
    }
}

/// Result of evaluating one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Target has no webhook configured
    NoWebhook,
    NotDue,
    /// Alert due, but a previous delivery failure is still backing off
    Deferred,
    Delivered(AlertReason),
    /// Delivered, but the state changed underneath us and was not advanced
    DeliveredStale(AlertReason),
    DeliveryFailed(AlertReason),
}

/// Totals of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: DateTime<Utc>,
}

/// Notification engine - the only writer of notification state
pub struct NotificationEngine {
    targets: Arc<dyn TargetStore>,
    checks: Arc<dyn CheckStore>,
    states: Arc<dyn NotificationStateStore>,
    sender: Arc<dyn WebhookSender>,
    settings: NotificationSettings,
    /// Latest check seen on the live feed, kept even if it was never persisted
    latest_seen: Mutex<HashMap<TargetId, Check>>,
    backoff: Mutex<HashMap<TargetId, Backoff>>,
}

impl NotificationEngine {
    pub fn new(
        targets: Arc<dyn TargetStore>,
        checks: Arc<dyn CheckStore>,
        states: Arc<dyn NotificationStateStore>,
        sender: Arc<dyn WebhookSender>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            targets,
            checks,
            states,
            sender,
            settings,
            latest_seen: Mutex::new(HashMap::new()),
            backoff: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a target against its latest check and deliver an alert if due
    pub async fn evaluate_target(
        &self,
        target: &Target,
        check: &Check,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let (Some(target_id), Some(webhook)) = (target.id, target.webhook.as_ref()) else {
            return Ok(Outcome::NoWebhook);
        };

        let state = self.states.get_notification_state(target_id).await?;
        let Some(reason) = evaluate(&state, check.is_up, now, self.settings.reminder_interval)
        else {
            debug!(target_id, "No notification needed for {}", target.name);
            return Ok(Outcome::NotDue);
        };

        if self.is_backing_off(target_id, now) {
            debug!(target_id, "Alert for {} deferred after failed delivery", target.name);
            return Ok(Outcome::Deferred);
        }

        match reason {
            AlertReason::StatusChange => info!(
                target_id,
                "Status change detected for {}: {} -> {}",
                target.name,
                label(state.last_status_was_up),
                label(check.is_up)
            ),
            AlertReason::Reminder => {
                info!(target_id, "Sending reminder for {} (still DOWN)", target.name)
            }
        }

        let message = format_message(target, check, reason);
        let payload = build_payload(webhook.kind, &message, check.is_up, now);

        info!(target_id, destination = %webhook.kind, "Sending notification for {}", target.name);
        if let Err(e) = self.sender.send(webhook, &payload).await {
            error!(target_id, "Webhook error for {}: {}", target.name, e);
            self.record_failure(target_id, now);
            return Ok(Outcome::DeliveryFailed(reason));
        }
        self.clear_backoff(target_id);

        let next = NotificationState { last_status_was_up: check.is_up, last_notification_sent_at: Some(now) };
        if self.states.advance_notification_state(target_id, state, next).await? {
            Ok(Outcome::Delivered(reason))
        } else {
            warn!(target_id, "Notification state for {} changed concurrently, not advanced", target.name);
            Ok(Outcome::DeliveredStale(reason))
        }
    }

    /// Evaluate a check fresh from the live feed
    pub async fn observe(&self, check: &Check, now: DateTime<Utc>) -> Result<Outcome> {
        if !self.remember(check) {
            debug!(target_id = check.target_id, "Check older than the latest seen, ignoring");
            return Ok(Outcome::NotDue);
        }

        let Some(target) = self.targets.find_target(check.target_id).await? else {
            debug!(target_id = check.target_id, "Check for a deleted target, ignoring");
            self.forget(check.target_id);
            return Ok(Outcome::NoWebhook);
        };
        if !target.active {
            return Ok(Outcome::NotDue);
        }
        self.evaluate_target(&target, check, now).await
    }

    /// Evaluate every active target with a webhook against its latest check
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        debug!("Starting notification sweep");

        let targets: Vec<Target> = self
            .targets
            .find_all_targets()
            .await?
            .into_iter()
            .filter(|target| target.active && target.webhook.is_some())
            .collect();

        let mut latest: HashMap<TargetId, Check> = self
            .checks
            .find_latest_per_target()
            .await?
            .into_iter()
            .map(|check| (check.target_id, check))
            .collect();
        self.merge_seen(&mut latest);

        let mut report = SweepReport::default();
        for target in &targets {
            let Some(check) = target.id.and_then(|id| latest.get(&id)) else {
                continue;
            };

            report.evaluated += 1;
            match self.evaluate_target(target, check, now).await {
                Ok(Outcome::Delivered(_) | Outcome::DeliveredStale(_)) => report.delivered += 1,
                Ok(Outcome::DeliveryFailed(_)) => report.failed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(target_id = ?target.id, "Notification evaluation failed: {}", e);
                }
            }
        }

        debug!(
            evaluated = report.evaluated,
            delivered = report.delivered,
            failed = report.failed,
            "Notification sweep completed"
        );
        Ok(report)
    }

    /// Run the engine: react to the live feed (if any) and sweep periodically
    pub fn start(self: Arc<Self>, mut feed: Option<LiveFeed>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.settings.evaluation_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            error!("Notification sweep failed: {}", e);
                        }
                    }
                    next = async {
                        match feed.as_mut() {
                            Some(feed) => feed.next().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match next {
                            Some(check) => {
                                if let Err(e) = self.observe(&check, Utc::now()).await {
                                    error!(target_id = check.target_id, "Notification evaluation failed: {}", e);
                                }
                            }
                            None => {
                                warn!("Live feed closed, notifications continue on periodic sweeps only");
                                feed = None;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Record `check` as the latest seen for its target. `false` when a newer
    /// check was already seen.
    fn remember(&self, check: &Check) -> bool {
        let mut seen = self.latest_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let newer = seen
            .get(&check.target_id)
            .is_none_or(|previous| previous.checked_at <= check.checked_at);
        if newer {
            seen.insert(check.target_id, check.clone());
        }
        newer
    }

    fn forget(&self, target_id: TargetId) {
        let mut seen = self.latest_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.remove(&target_id);
        drop(seen);
        self.clear_backoff(target_id);
    }

    /// Prefer in-memory checks that are newer than what the store returned
    fn merge_seen(&self, latest: &mut HashMap<TargetId, Check>) {
        let seen = self.latest_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (target_id, check) in seen.iter() {
            let newer = latest.get(target_id).is_none_or(|stored| stored.checked_at < check.checked_at);
            if newer {
                latest.insert(*target_id, check.clone());
            }
        }
    }

    fn is_backing_off(&self, target_id: TargetId, now: DateTime<Utc>) -> bool {
        if self.settings.retry_backoff_max.is_zero() {
            return false;
        }
        let backoff = self.backoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        backoff.get(&target_id).is_some_and(|b| now < b.retry_at)
    }

    fn record_failure(&self, target_id: TargetId, now: DateTime<Utc>) {
        if self.settings.retry_backoff_max.is_zero() {
            return;
        }
        let mut backoff = self.backoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let failures = backoff.get(&target_id).map_or(1, |b| b.failures.saturating_add(1));
        let delay = retry_delay(self.settings.evaluation_interval, self.settings.retry_backoff_max, failures);
        let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        debug!(target_id, failures, delay_ms = delay.as_millis() as u64, "Backing off webhook delivery");
        backoff.insert(target_id, Backoff { failures, retry_at });
    }

    fn clear_backoff(&self, target_id: TargetId) {
        let mut backoff = self.backoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        backoff.remove(&target_id);
    }
}

/// `base * 2^(failures - 1)`, capped at `max`
fn retry_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

fn label(is_up: bool) -> &'static str {
    if is_up { "UP" } else { "DOWN" }
}
