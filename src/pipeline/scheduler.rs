//! Monitor scheduler.
//!
//! A periodic sweep picks the monitors whose adaptive frequency says they are
//! due, checks a small batch of them sequentially and persists each verdict.
//! Manual checks share the same path but skip the due gate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{AppError, Result};
use crate::models::{CheckResult, Monitor, MonitorStatus, SchedulerConfig, Verdict};
use crate::services::{Classification, PageFetcher, StockClassifier};
use crate::storage::MonitorStore;
use crate::utils::clock::Clock;

/// Minutes between checks given the monitor's last status and error streak.
///
/// Out-of-stock pages are polled twice as often (never below
/// `min_minutes`), in-stock pages half as often, and failing pages back off
/// exponentially up to eight times the baseline.
pub fn effective_frequency(monitor: &Monitor, min_minutes: i64) -> i64 {
    let baseline = monitor.check_frequency.max(1);
    match monitor.status {
        MonitorStatus::OutOfStock => (baseline / 2).max(min_minutes),
        MonitorStatus::InStock => baseline.saturating_mul(2),
        MonitorStatus::Error if monitor.consecutive_errors > 0 => {
            baseline.saturating_mul(1i64 << monitor.consecutive_errors.min(3))
        }
        _ => baseline,
    }
}

/// Never-checked monitors are always due. A frequency too large to
/// represent as a duration is never due.
pub fn is_due(monitor: &Monitor, now: DateTime<Utc>, min_minutes: i64) -> bool {
    match monitor.last_checked {
        None => true,
        Some(last) => Duration::try_minutes(effective_frequency(monitor, min_minutes))
            .is_some_and(|frequency| now - last >= frequency),
    }
}

/// Result of one completed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub monitor_id: String,
    pub previous_status: MonitorStatus,
    pub status: MonitorStatus,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub consecutive_errors: u32,
}

impl CheckOutcome {
    /// The page came back in stock with this check.
    pub fn restocked(&self) -> bool {
        self.status == MonitorStatus::InStock && self.previous_status != MonitorStatus::InStock
    }

    pub fn is_error(&self) -> bool {
        self.status == MonitorStatus::Error
    }
}

/// Summary of a sweep or a bulk manual check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Active monitors looked at
    pub considered: usize,
    /// Monitors that were due (before the batch cap)
    pub due: usize,
    /// Skipped because a check was already running
    pub skipped: usize,
    pub outcomes: Vec<CheckOutcome>,
    /// Checks that could not run at all: (monitor id, error)
    pub failures: Vec<(String, String)>,
}

impl SweepReport {
    pub fn restocks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.restocked())
    }
}

/// Removes the monitor id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.id);
    }
}

pub struct MonitorScheduler {
    store: Arc<dyn MonitorStore>,
    fetcher: Arc<dyn PageFetcher>,
    classifier: Arc<StockClassifier>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<String>>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        fetcher: Arc<dyn PageFetcher>,
        classifier: Arc<StockClassifier>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            classifier,
            config,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn stale_after(&self) -> Duration {
        Duration::try_minutes(self.config.stale_check_minutes).unwrap_or(Duration::MAX)
    }

    fn is_in_flight(&self, id: &str) -> bool {
        let ids = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.contains(id)
    }

    /// Check up to `batch_size` due monitors, oldest first.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let min = self.config.min_frequency_minutes;
        let monitors = self.store.list_active_monitors().await?;

        let mut report = SweepReport {
            considered: monitors.len(),
            ..SweepReport::default()
        };

        let mut due = Vec::new();
        for monitor in monitors {
            let claimed_elsewhere = monitor.status == MonitorStatus::Checking
                && monitor
                    .check_started_at
                    .is_some_and(|at| now - at < self.stale_after());
            if self.is_in_flight(&monitor.id) || claimed_elsewhere {
                report.skipped += 1;
            } else if is_due(&monitor, now, min) {
                due.push(monitor);
            }
        }
        report.due = due.len();

        // Never-checked first (None sorts before Some), then oldest check.
        due.sort_by_key(|m| m.last_checked);
        due.truncate(self.config.batch_size);

        let delay = StdDuration::from_millis(self.config.check_delay_ms);
        for (i, monitor) in due.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.check_monitor(&monitor.id).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    log::warn!("Check skipped for {}: {}", monitor.label(), e);
                    report.failures.push((monitor.id.clone(), e.to_string()));
                }
            }
        }

        log::info!(
            "Sweep: {} active, {} due, {} checked, {} skipped",
            report.considered,
            report.due,
            report.outcomes.len(),
            report.skipped
        );
        Ok(report)
    }

    /// Check one monitor against its stored url and target text.
    pub async fn check_monitor(&self, id: &str) -> Result<CheckOutcome> {
        self.run_check(id, None).await
    }

    /// User-triggered check with the request's url and target text.
    pub async fn manual_check(
        &self,
        id: &str,
        url: &str,
        target_text: Option<&str>,
    ) -> Result<CheckOutcome> {
        self.run_check(id, Some((url, target_text))).await
    }

    /// Check every active monitor now, `concurrency` at a time.
    pub async fn check_all(&self, concurrency: usize) -> Result<SweepReport> {
        let monitors = self.store.list_active_monitors().await?;
        let mut report = SweepReport {
            considered: monitors.len(),
            due: monitors.len(),
            ..SweepReport::default()
        };

        let mut results = stream::iter(monitors)
            .map(|monitor| async move {
                let result = self.check_monitor(&monitor.id).await;
                (monitor.id, result)
            })
            .buffer_unordered(concurrency.max(1));

        while let Some((id, result)) = results.next().await {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(AppError::Busy(_)) => report.skipped += 1,
                Err(e) => report.failures.push((id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Clear a monitor's error streak.
    pub async fn reset_errors(&self, id: &str) -> Result<Monitor> {
        let mut monitor = self
            .store
            .get_monitor(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("monitor {id}")))?;
        monitor.reset_errors();
        self.store.save_monitor(&monitor).await?;
        log::info!("Reset error streak for {}", monitor.label());
        Ok(monitor)
    }

    async fn run_check(
        &self,
        id: &str,
        request: Option<(&str, Option<&str>)>,
    ) -> Result<CheckOutcome> {
        let _guard =
            InFlight::acquire(&self.in_flight, id).ok_or_else(|| AppError::Busy(id.to_string()))?;

        let claimed = self
            .store
            .try_begin_check(id, self.clock.now(), self.stale_after())
            .await?
            .ok_or_else(|| AppError::Busy(id.to_string()))?;
        let previous_status = claimed.status;

        let (url, target_text) = match request {
            Some((url, target)) => (url.to_string(), target.map(str::to_string)),
            None => (claimed.url.clone(), claimed.target_text.clone()),
        };

        let (result, reason) = match self.fetch_and_classify(&url, target_text.as_deref()).await {
            Ok(classification) => (
                CheckResult::Verdict(classification.verdict.into()),
                Some(classification.reason),
            ),
            Err(e) => {
                log::warn!("Check failed for {}: {}", claimed.label(), e);
                (CheckResult::Failed(e.to_string()), None)
            }
        };
        let checked_at = self.clock.now();

        let monitor = match self.store.finish_check(id, &result, checked_at).await? {
            Some(updated) => updated,
            None => {
                log::warn!("Monitor {} was removed during its check", id);
                let mut detached = claimed;
                detached.apply_check(&result, checked_at);
                detached
            }
        };

        let outcome = CheckOutcome {
            monitor_id: monitor.id.clone(),
            previous_status,
            status: monitor.status,
            checked_at,
            reason,
            error_message: monitor.error_message.clone(),
            consecutive_errors: monitor.consecutive_errors,
        };
        if outcome.restocked() {
            log::info!("Back in stock: {} ({})", monitor.label(), url);
        } else {
            log::debug!("{} -> {}", monitor.label(), outcome.status);
        }
        Ok(outcome)
    }

    async fn fetch_and_classify(
        &self,
        url: &str,
        target_text: Option<&str>,
    ) -> Result<Classification> {
        let page = self.fetcher.fetch(url).await?;
        let classification = self.classifier.classify(&page.body, url, target_text);
        if classification.verdict == Verdict::Error {
            return Err(AppError::Classification(classification.reason));
        }
        Ok(classification)
    }
}

/// Background loop calling [`MonitorScheduler::sweep`] on an interval.
pub struct Ticker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn start(scheduler: Arc<MonitorScheduler>) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let period = StdDuration::from_secs(scheduler.config.interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("Monitor ticker started ({}s interval)", period.as_secs());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.sweep().await {
                            log::error!("Sweep failed: {}", e);
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            log::info!("Monitor ticker stopped");
        });

        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for the in-progress sweep to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            log::error!("Ticker task ended abnormally: {}", e);
        }
    }
}
