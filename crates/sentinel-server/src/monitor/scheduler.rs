use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sentinel_common::types::AnomalyDetection;
use sentinel_notify::dispatcher::NotificationDispatcher;
use sentinel_storage::{AlertStore, AnomalySource};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::interval;
use utoipa::ToSchema;

use super::firing::{AlertTrigger, TickSummary};
use crate::config::MonitoringConfig;

/// Upper bound on rows scanned when counting critical anomalies for stats.
const STATS_SCAN_LIMIT: usize = 10_000;

/// Where the cursor goes after a tick that read `anomalies` (oldest first).
///
/// A short batch means everything since the window start was seen, so the
/// cursor moves to `now`. A full batch moves it so the next window starts at
/// the last record read; if that would not move it at all, it steps one
/// millisecond past so a full batch of unmatched records cannot stall it.
fn next_cursor(
    anomalies: &[AnomalyDetection],
    batch_size: usize,
    cursor: DateTime<Utc>,
    lookback: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(last) = anomalies.last() else {
        return now;
    };
    if anomalies.len() < batch_size {
        return now;
    }
    let mut next = last.detected_at + lookback;
    if next <= cursor {
        next = cursor + Duration::milliseconds(1);
    }
    next.min(now)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub last_check_time: DateTime<Utc>,
    pub lookback_minutes: i64,
    pub batch_size: usize,
    pub interval_secs: u64,
    pub critical_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnomalyStatistics {
    pub total_anomalies: u64,
    pub unprocessed_count: u64,
    pub critical_count: u64,
    /// e.g. `"5 minutes"`.
    pub time_window: String,
    pub last_check_time: DateTime<Utc>,
}

/// Polls the anomaly feed on two timers and retries unsent notifications
/// on a third.
///
/// The scheduler owns the "last check" cursor. A normal tick reads
/// unprocessed anomalies from `cursor - lookback` and moves the cursor
/// forward once the batch has been evaluated: to the tick's start time when
/// the batch was short, or only as far as the last evaluated record when the
/// batch was full, so the remainder is read next tick. A tick that fails
/// leaves the cursor where it was.
pub struct MonitoringScheduler {
    config: MonitoringConfig,
    store: Arc<AlertStore>,
    source: Arc<dyn AnomalySource>,
    trigger: AlertTrigger,
    dispatcher: NotificationDispatcher,
    // Serializes ticks so manual and periodic checks never overlap. The
    // cursor has its own lock, held only to read or write it.
    tick_lock: Mutex<()>,
    last_check: Mutex<DateTime<Utc>>,
}

impl MonitoringScheduler {
    pub fn new(
        config: MonitoringConfig,
        store: Arc<AlertStore>,
        source: Arc<dyn AnomalySource>,
        trigger: AlertTrigger,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            source,
            trigger,
            dispatcher,
            tick_lock: Mutex::new(()),
            last_check: Mutex::new(Utc::now()),
        }
    }

    /// Starts from an explicit cursor instead of the construction time.
    pub fn with_last_check(self, at: DateTime<Utc>) -> Self {
        *self.cursor() = at;
        self
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn last_check_time(&self) -> DateTime<Utc> {
        *self.cursor()
    }

    fn cursor(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.last_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookback(&self) -> Duration {
        Duration::minutes(self.config.lookback_minutes)
    }

    pub fn run_tick(&self) -> Result<TickSummary> {
        self.run_tick_at(Utc::now())
    }

    /// One normal tick evaluated as of `now`.
    pub fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let _tick = self
            .tick_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cursor = self.last_check_time();
        let since = cursor - self.lookback();
        let anomalies = self
            .source
            .find_unprocessed_anomalies(since, self.config.batch_size)?;

        let mut summary = TickSummary::default();
        if anomalies.is_empty() {
            tracing::debug!(since = %since, "No new anomalies found");
        } else {
            tracing::info!(count = anomalies.len(), "Found unprocessed anomalies");
            let rules = self.store.enabled_anomaly_rules()?;
            for anomaly in &anomalies {
                self.trigger.process_anomaly(&rules, anomaly, now, &mut summary);
            }
            tracing::info!(
                evaluated = summary.evaluated,
                created = summary.created,
                rate_limited = summary.rate_limited,
                "Anomaly monitoring tick complete"
            );
        }

        let next = next_cursor(&anomalies, self.config.batch_size, cursor, self.lookback(), now);
        if next < now {
            tracing::info!(
                last_check_time = %next,
                "Batch full, leaving the remainder for the next tick"
            );
        }
        *self.cursor() = next;
        Ok(summary)
    }

    pub fn run_critical_tick(&self) -> Result<TickSummary> {
        self.run_critical_tick_at(Utc::now())
    }

    /// Re-evaluates high-confidence, high-score anomalies from the trailing
    /// lookback window, processed or not. Existing alerts make repeats no-ops.
    pub fn run_critical_tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let since = now - self.lookback();
        let anomalies = self.source.find_critical_anomalies(
            self.config.critical_min_confidence,
            self.config.critical_min_score,
            since,
            self.config.batch_size,
        )?;

        let mut summary = TickSummary::default();
        if anomalies.is_empty() {
            return Ok(summary);
        }
        tracing::warn!(count = anomalies.len(), "Found critical anomalies");
        let rules = self.store.enabled_anomaly_rules()?;
        for anomaly in &anomalies {
            self.trigger.process_anomaly(&rules, anomaly, now, &mut summary);
        }
        if summary.created > 0 {
            tracing::info!(created = summary.created, "Critical anomaly alerts created");
        }
        Ok(summary)
    }

    /// Re-dispatches unsent alerts still under the retry bound and waits for
    /// the attempts to finish. Returns how many alerts were retried.
    pub async fn retry_pending_notifications(&self) -> Result<usize> {
        let pending = self
            .store
            .find_pending_notifications(self.config.max_notification_retries, self.config.batch_size)?;
        if pending.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = pending.len(), "Retrying pending notifications");
        let count = pending.len();
        let handles: Vec<_> = pending
            .into_iter()
            .map(|alert| self.dispatcher.dispatch(alert))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Notification retry task failed");
            }
        }
        Ok(count)
    }

    pub fn trigger_manual_check(&self) -> Result<TickSummary> {
        tracing::info!("Manual anomaly monitoring check triggered");
        self.run_tick()
    }

    /// Sets the cursor to one lookback window before now.
    pub fn reset_last_check_time(&self) -> DateTime<Utc> {
        let at = Utc::now() - self.lookback();
        *self.cursor() = at;
        tracing::info!(last_check_time = %at, "Last check time reset");
        at
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.config.enabled,
            last_check_time: self.last_check_time(),
            lookback_minutes: self.config.lookback_minutes,
            batch_size: self.config.batch_size,
            interval_secs: self.config.interval_secs,
            critical_interval_secs: self.config.critical_interval_secs,
        }
    }

    /// Counts over the trailing lookback window ending at `now`.
    pub fn anomaly_statistics(&self, now: DateTime<Utc>) -> Result<AnomalyStatistics> {
        let since = now - self.lookback();
        let total_anomalies = self.source.count_anomalies_between(since, now)?;
        let unprocessed_count = self.source.count_unprocessed_anomalies(since)?;
        let critical_count = self
            .source
            .find_critical_anomalies(
                self.config.critical_min_confidence,
                self.config.critical_min_score,
                since,
                STATS_SCAN_LIMIT,
            )?
            .len() as u64;
        Ok(AnomalyStatistics {
            total_anomalies,
            unprocessed_count,
            critical_count,
            time_window: format!("{} minutes", self.config.lookback_minutes),
            last_check_time: self.last_check_time(),
        })
    }

    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            lookback_minutes = self.config.lookback_minutes,
            batch_size = self.config.batch_size,
            "Anomaly monitoring scheduler started"
        );
        let mut tick = interval(std::time::Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tick.tick().await;
            if let Err(e) = self.run_tick() {
                tracing::error!(error = %e, "Anomaly monitoring tick failed");
            }
        }
    }

    pub async fn run_critical(&self) {
        tracing::info!(
            interval_secs = self.config.critical_interval_secs,
            "Critical anomaly scheduler started"
        );
        let mut tick = interval(std::time::Duration::from_secs(
            self.config.critical_interval_secs.max(1),
        ));
        loop {
            tick.tick().await;
            if let Err(e) = self.run_critical_tick() {
                tracing::error!(error = %e, "Critical anomaly tick failed");
            }
        }
    }

    pub async fn run_retry(&self) {
        tracing::info!(
            interval_secs = self.config.retry_interval_secs,
            max_retries = self.config.max_notification_retries,
            "Notification retry scheduler started"
        );
        let mut tick = interval(std::time::Duration::from_secs(
            self.config.retry_interval_secs.max(1),
        ));
        loop {
            tick.tick().await;
            if let Err(e) = self.retry_pending_notifications().await {
                tracing::error!(error = %e, "Notification retry cycle failed");
            }
        }
    }
}
