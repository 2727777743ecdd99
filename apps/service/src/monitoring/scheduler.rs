use anyhow::Result;
use futures::Stream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use super::executor::ProbeExecutor;
use super::types::Check;
use crate::database::models::Target;
use crate::database::{CheckStore, TargetStore};

/// Tuning of the shared monitoring cycle
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between two cycle starts
    pub interval: Duration,
    /// Probes allowed in flight at once, across overlapping cycles
    pub max_concurrent_probes: usize,
    /// Checks buffered per live subscriber before it starts lagging
    pub stream_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30_000),
            max_concurrent_probes: 32,
            stream_capacity: 256,
        }
    }
}

/// Cycle scheduler - one shared periodic driver probing every active target
///
/// The driver starts on the first [`subscribe`](Self::subscribe) and is shared
/// by every later subscriber. Subscribers only see checks emitted after they
/// joined.
#[derive(Clone)]
pub struct CycleScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<ProbeExecutor>,
    targets: Arc<dyn TargetStore>,
    checks: Arc<dyn CheckStore>,
    interval: Duration,
    workers: Arc<Semaphore>,
    feed_tx: broadcast::Sender<Check>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl CycleScheduler {
    /// Create a new cycle scheduler. Nothing runs until the first subscription.
    pub fn new(
        executor: Arc<ProbeExecutor>,
        targets: Arc<dyn TargetStore>,
        checks: Arc<dyn CheckStore>,
        settings: SchedulerSettings,
    ) -> Self {
        let (feed_tx, _) = broadcast::channel(settings.stream_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                executor,
                targets,
                checks,
                interval: settings.interval,
                workers: Arc::new(Semaphore::new(settings.max_concurrent_probes.max(1))),
                feed_tx,
                driver: Mutex::new(None),
            }),
        }
    }

    /// Join the live feed, starting the shared driver if it is not running yet
    pub fn subscribe(&self) -> LiveFeed {
        // Subscribe before starting so the very first cycle is not missed
        let receiver = self.inner.feed_tx.subscribe();
        self.ensure_started();
        LiveFeed { receiver }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.feed_tx.receiver_count()
    }

    pub fn is_running(&self) -> bool {
        self.driver_slot().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop scheduling new cycles. In-flight probes are abandoned.
    pub fn stop(&self) {
        if let Some(handle) = self.driver_slot().take() {
            handle.abort();
            info!("Monitoring cycle driver stopped");
        }
    }

    /// Run one cycle now and wait for every probe of it to finish
    pub async fn run_cycle(&self) -> Result<Vec<Check>> {
        run_cycle(self.inner.clone(), 0).await
    }

    /// Out-of-band probe of a single target: persisted and published like a
    /// cycle result
    pub async fn probe_now(&self, target: &Target) -> Check {
        process_target(&self.inner, target).await
    }

    fn ensure_started(&self) {
        let mut slot = self.driver_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        info!(interval_ms = self.inner.interval.as_millis() as u64, "Starting monitoring cycle driver");
        *slot = Some(tokio::spawn(drive(self.inner.clone())));
    }

    fn driver_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // A poisoned slot still holds a valid handle
        self.inner.driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ticks forever, spawning one cycle per tick so slow probes never delay the
/// cadence. Dropping this future aborts every cycle still in flight.
async fn drive(inner: Arc<Inner>) {
    let mut ticker = interval_at(Instant::now() + inner.interval, inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycles = JoinSet::new();
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cycle += 1;
                if !cycles.is_empty() {
                    // Previous cycle still probing: both run, bounded by the worker pool
                    debug!(cycle, in_flight = cycles.len(), "Monitoring cycles overlap");
                }
                let inner = inner.clone();
                cycles.spawn(async move {
                    if let Err(e) = run_cycle(inner, cycle).await {
                        error!(cycle, "Monitoring cycle failed: {}", e);
                    }
                });
            }
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined {
                    error!("Monitoring cycle task aborted: {}", e);
                }
            }
        }
    }
}

async fn run_cycle(inner: Arc<Inner>, cycle: u64) -> Result<Vec<Check>> {
    let targets = inner.targets.find_active_targets().await?;
    debug!(cycle, targets = targets.len(), "Starting monitoring cycle");

    let mut probes = JoinSet::new();
    for target in targets {
        let inner = inner.clone();
        probes.spawn(async move {
            // The semaphore is never closed
            let _permit = inner.workers.clone().acquire_owned().await.ok();
            process_target(&inner, &target).await
        });
    }

    let mut checks = Vec::with_capacity(probes.len());
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(check) => checks.push(check),
            Err(e) => error!(cycle, "Probe task failed: {}", e),
        }
    }

    debug!(cycle, checks = checks.len(), "Completed monitoring cycle");
    Ok(checks)
}

async fn process_target(inner: &Inner, target: &Target) -> Check {
    let mut check = inner.executor.probe(target).await;

    // A failed write still yields a usable in-memory result
    match inner.checks.save_check(&check).await {
        Ok(id) => {
            check.id = Some(id);
            debug!(target_id = check.target_id, "Status saved for {}", check.target_name);
        }
        Err(e) => error!(target_id = check.target_id, "Error saving status: {}", e),
    }

    if inner.feed_tx.send(check.clone()).is_err() {
        debug!(target_id = check.target_id, "No live subscribers, check not broadcast");
    }

    check
}

/// Receiving end of the live check feed
pub struct LiveFeed {
    receiver: broadcast::Receiver<Check>,
}

impl LiveFeed {
    /// Next check, or `None` once the scheduler is gone. Checks dropped
    /// because this subscriber fell behind are skipped.
    pub async fn next(&mut self) -> Option<Check> {
        loop {
            match self.receiver.recv().await {
                Ok(check) => return Some(check),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Live feed subscriber lagged behind, skipping checks");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a [`Stream`], e.g. for server-sent events
    pub fn into_stream(self) -> impl Stream<Item = Check> + Send + 'static {
        futures::stream::unfold(self, |mut feed| async move {
            feed.next().await.map(|check| (check, feed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TargetId;
    use crate::database::test_database;
    use crate::monitoring::checker::{Checker, HttpOutcome};
    use crate::monitoring::test_support::{closed_port_url, serve_status};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(10);

    fn settings(interval_ms: u64) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_millis(interval_ms),
            max_concurrent_probes: 4,
            stream_capacity: 64,
        }
    }

    fn executor() -> Arc<ProbeExecutor> {
        Arc::new(ProbeExecutor::new(Duration::from_secs(5)).unwrap())
    }

    async fn add_target(db: &dyn TargetStore, name: &str, url: String, active: bool) -> TargetId {
        let mut target = Target::new(name.into(), url);
        target.active = active;
        db.save_target(&target).await.unwrap()
    }

    /// Holds every request for `delay` and tracks how many run at once
    #[derive(Default)]
    struct CountingChecker {
        delay: Duration,
        started: AtomicUsize,
        finished: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingChecker {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { delay, ..Self::default() })
        }
    }

    #[async_trait]
    impl Checker for CountingChecker {
        async fn check(&self, _url: &str) -> Result<HttpOutcome> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(HttpOutcome { status_code: 200, reason: Some("OK".into()) })
        }
    }

    /// Check store whose writes always fail
    struct BrokenCheckStore;

    #[async_trait]
    impl CheckStore for BrokenCheckStore {
        async fn save_check(&self, _check: &Check) -> Result<i64> {
            Err(anyhow!("disk full"))
        }
        async fn find_latest_per_target(&self) -> Result<Vec<Check>> {
            Err(anyhow!("disk full"))
        }
        async fn find_recent_checks(&self, _id: TargetId, _limit: usize) -> Result<Vec<Check>> {
            Err(anyhow!("disk full"))
        }
        async fn find_checks_since(&self, _id: TargetId, _cutoff: DateTime<Utc>) -> Result<Vec<Check>> {
            Err(anyhow!("disk full"))
        }
        async fn count_by_target(&self, _id: TargetId) -> Result<u64> {
            Err(anyhow!("disk full"))
        }
        async fn count_all(&self) -> Result<u64> {
            Err(anyhow!("disk full"))
        }
        async fn find_distinct_target_ids(&self) -> Result<Vec<TargetId>> {
            Err(anyhow!("disk full"))
        }
        async fn delete_oldest_keeping(&self, _id: TargetId, _keep: usize) -> Result<u64> {
            Err(anyhow!("disk full"))
        }
        async fn delete_all_for_target(&self, _id: TargetId) -> Result<u64> {
            Err(anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn test_cycle_probes_only_active_targets() {
        let (db, _dir) = test_database().await.unwrap();
        let up = add_target(db.as_ref(), "up", serve_status("200 OK").await, true).await;
        add_target(db.as_ref(), "paused", serve_status("200 OK").await, false).await;

        let scheduler = CycleScheduler::new(executor(), db.clone(), db.clone(), settings(60_000));
        let checks = scheduler.run_cycle().await.unwrap();

        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].target_id, up);
        assert!(checks[0].is_up);
        assert!(checks[0].id.is_some());
        assert_eq!(db.count_by_target(up).await.unwrap(), 1);
        assert!(!scheduler.is_running(), "run_cycle must not start the driver");
    }

    #[tokio::test]
    async fn test_failing_target_does_not_abort_cycle() {
        let (db, _dir) = test_database().await.unwrap();
        let good = add_target(db.as_ref(), "good", serve_status("200 OK").await, true).await;
        let bad = add_target(db.as_ref(), "bad", closed_port_url().await, true).await;

        let scheduler = CycleScheduler::new(executor(), db.clone(), db.clone(), settings(60_000));
        let checks = scheduler.run_cycle().await.unwrap();

        assert_eq!(checks.len(), 2);
        let good_check = checks.iter().find(|c| c.target_id == good).unwrap();
        let bad_check = checks.iter().find(|c| c.target_id == bad).unwrap();
        assert!(good_check.is_up);
        assert!(!bad_check.is_up);
        assert_eq!(bad_check.status_code, 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_emits_check() {
        let (db, _dir) = test_database().await.unwrap();
        let id = add_target(db.as_ref(), "svc", serve_status("200 OK").await, true).await;

        let scheduler =
            CycleScheduler::new(executor(), db.clone(), Arc::new(BrokenCheckStore), settings(20));
        let mut feed = scheduler.subscribe();

        let check = tokio::time::timeout(WAIT, feed.next()).await.unwrap().unwrap();
        assert_eq!(check.target_id, id);
        assert!(check.is_up);
        assert!(check.id.is_none());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_driver_starts_lazily_and_is_shared() {
        let (db, _dir) = test_database().await.unwrap();
        add_target(db.as_ref(), "svc", serve_status("200 OK").await, true).await;

        let scheduler = CycleScheduler::new(executor(), db.clone(), db.clone(), settings(30));
        assert!(!scheduler.is_running());

        let mut first = scheduler.subscribe();
        assert!(scheduler.is_running());
        let mut second = scheduler.subscribe();
        assert_eq!(scheduler.subscriber_count(), 2);

        let a = tokio::time::timeout(WAIT, first.next()).await.unwrap().unwrap();
        let b = tokio::time::timeout(WAIT, second.next()).await.unwrap().unwrap();
        // Both subscribers observe the same emission from the single pipeline
        assert_eq!(a.id, b.id);
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let (db, _dir) = test_database().await.unwrap();
        add_target(db.as_ref(), "svc", serve_status("200 OK").await, true).await;

        let scheduler = CycleScheduler::new(executor(), db.clone(), db.clone(), settings(30));
        let mut early = scheduler.subscribe();
        let first = tokio::time::timeout(WAIT, early.next()).await.unwrap().unwrap();

        let late = scheduler.subscribe().into_stream();
        futures::pin_mut!(late);
        let next = tokio::time::timeout(WAIT, late.next()).await.unwrap().unwrap();

        assert!(next.id > first.id);
        assert!(next.checked_at >= first.checked_at);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_probe_now_persists_and_publishes() {
        let (db, _dir) = test_database().await.unwrap();
        let id = add_target(db.as_ref(), "svc", serve_status("503 Service Unavailable").await, false).await;
        let target = db.find_target(id).await.unwrap().unwrap();

        let scheduler = CycleScheduler::new(executor(), db.clone(), db.clone(), settings(60_000));
        let mut feed = scheduler.subscribe();

        let check = scheduler.probe_now(&target).await;
        assert_eq!(check.status_code, 503);
        assert!(!check.is_up);

        let published = tokio::time::timeout(WAIT, feed.next()).await.unwrap().unwrap();
        assert_eq!(published.id, check.id);
        assert_eq!(db.count_by_target(id).await.unwrap(), 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_probes_in_flight() {
        let (db, _dir) = test_database().await.unwrap();
        for i in 0..6 {
            add_target(db.as_ref(), &format!("svc-{i}"), format!("http://svc-{i}.test"), true).await;
        }

        let checker = CountingChecker::new(Duration::from_millis(100));
        let executor = Arc::new(ProbeExecutor::with_checker(checker.clone(), Duration::from_secs(5)));
        let bounded = SchedulerSettings { max_concurrent_probes: 2, ..settings(60_000) };
        let scheduler = CycleScheduler::new(executor, db.clone(), db.clone(), bounded);

        let checks = scheduler.run_cycle().await.unwrap();
        assert_eq!(checks.len(), 6);
        assert!(checks.iter().all(|check| check.is_up));
        assert_eq!(checker.finished.load(Ordering::SeqCst), 6);
        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_probe_does_not_delay_next_cycle() {
        let (db, _dir) = test_database().await.unwrap();
        add_target(db.as_ref(), "slow", "http://slow.test".into(), true).await;

        let checker = CountingChecker::new(Duration::from_secs(5));
        let executor = Arc::new(ProbeExecutor::with_checker(checker.clone(), Duration::from_secs(10)));
        let scheduler = CycleScheduler::new(executor, db.clone(), db.clone(), settings(50));
        let _feed = scheduler.subscribe();

        let overlapped = tokio::time::timeout(WAIT, async {
            while checker.started.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(overlapped.is_ok(), "second cycle never started");
        assert_eq!(checker.finished.load(Ordering::SeqCst), 0);
        assert!(checker.max_in_flight.load(Ordering::SeqCst) >= 2);
        scheduler.stop();
    }
}
