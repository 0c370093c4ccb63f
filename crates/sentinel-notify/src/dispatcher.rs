//! Fan-out of one alert to every enabled channel of its rule.
//!
//! Dispatches run on a semaphore-bounded pool so the caller never waits on
//! channel I/O. All channel sends for one alert run in a single
//! [`JoinSet`], which lets the alert-level outcome be computed once every
//! attempt has finished.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_common::types::{Alert, AlertRule, AlertStatus, ChannelType, NotificationChannel};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::NotifyError;
use crate::{Notice, NoticeKind, Senders};

/// Persistence the dispatcher needs, implemented by the storage crate.
pub trait DispatchStore: Send + Sync {
    fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>>;

    fn enabled_channels_for_rule(&self, rule_id: &str) -> Result<Vec<NotificationChannel>>;

    /// Bumps success/failure counters and last-success/last-failure stamps.
    fn record_channel_outcomes(&self, outcomes: &[ChannelOutcome], at: DateTime<Utc>) -> Result<()>;

    /// Stores the alert-level notification result.
    fn record_alert_notification(&self, alert_id: &str, report: &DispatchReport) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DispatchReport {
    pub alert_id: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when at least one channel accepted the notification.
    pub notification_sent: bool,
    pub last_error: Option<String>,
    pub outcomes: Vec<ChannelOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl DispatchReport {
    fn from_outcomes(alert_id: &str, outcomes: Vec<ChannelOutcome>, at: DateTime<Utc>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let last_error = outcomes
            .iter()
            .rev()
            .find_map(|o| o.error.as_ref().map(|e| format!("{} {}: {e}", o.channel_type, o.channel_id)));
        Self {
            alert_id: alert_id.to_string(),
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            notification_sent: succeeded > 0,
            last_error,
            outcomes,
            finished_at: at,
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    senders: Arc<Senders>,
    store: Arc<dyn DispatchStore>,
    workers: Arc<Semaphore>,
    channel_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        senders: Senders,
        store: Arc<dyn DispatchStore>,
        max_concurrent: usize,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            senders: Arc::new(senders),
            store,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            channel_timeout,
        }
    }

    /// Queues `alert` for delivery and returns immediately.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = dispatcher.workers.clone().acquire_owned().await else {
                return;
            };
            if let Err(e) = dispatcher.dispatch_now(&alert).await {
                tracing::error!(alert_id = %alert.id, error = %e, "Notification dispatch failed");
            }
        })
    }

    /// Queues a recovery notice for a resolved alert.
    pub fn dispatch_recovery(&self, alert: Alert) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = dispatcher.workers.clone().acquire_owned().await else {
                return;
            };
            if let Err(e) = dispatcher.fan_out(&alert, NoticeKind::Recovered).await {
                tracing::error!(alert_id = %alert.id, error = %e, "Recovery notification failed");
            }
        })
    }

    /// Sends `alert` to every enabled channel of its rule and records the
    /// result on the channels and on the alert.
    ///
    /// Channel failures are part of the report, not errors. An error is
    /// returned only when the channel list cannot be loaded.
    pub async fn dispatch_now(&self, alert: &Alert) -> Result<DispatchReport> {
        let report = self.fan_out(alert, NoticeKind::Firing).await?;
        if report.attempted > 0 {
            if let Err(e) = self.store.record_alert_notification(&alert.id, &report) {
                tracing::error!(alert_id = %alert.id, error = %e, "Failed to record notification status");
            }
        }
        Ok(report)
    }

    async fn fan_out(&self, alert: &Alert, kind: NoticeKind) -> Result<DispatchReport> {
        let channels = self.store.enabled_channels_for_rule(&alert.rule_id)?;
        if channels.is_empty() {
            tracing::warn!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                "No enabled notification channels for rule"
            );
            return Ok(DispatchReport::from_outcomes(&alert.id, Vec::new(), Utc::now()));
        }

        let rule = self.store.get_rule(&alert.rule_id).unwrap_or_else(|e| {
            tracing::warn!(rule_id = %alert.rule_id, error = %e, "Rule lookup failed");
            None
        });
        let notice = Arc::new(Notice::new(kind, alert.clone(), rule.as_ref()));

        // Pre-filled so a panicking sender still counts as a failure.
        let mut outcomes: Vec<ChannelOutcome> = channels
            .iter()
            .map(|channel| ChannelOutcome {
                channel_id: channel.id.clone(),
                channel_type: channel.channel_type,
                success: false,
                error: Some("sender task aborted".to_string()),
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, channel) in channels.into_iter().enumerate() {
            let senders = self.senders.clone();
            let notice = notice.clone();
            let timeout = self.channel_timeout;
            tasks.spawn(async move {
                let result = send_with_timeout(&senders, &notice, &channel, timeout).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    let outcome = &mut outcomes[index];
                    match result {
                        Ok(()) => {
                            outcome.success = true;
                            outcome.error = None;
                        }
                        Err(e) => {
                            tracing::warn!(
                                alert_id = %alert.id,
                                channel_id = %outcome.channel_id,
                                channel_type = %outcome.channel_type,
                                error = %e,
                                "Notification channel failed"
                            );
                            outcome.error = Some(e.to_string());
                        }
                    }
                }
                Err(e) => tracing::error!(alert_id = %alert.id, error = %e, "Sender task panicked"),
            }
        }

        let now = Utc::now();
        if let Err(e) = self.store.record_channel_outcomes(&outcomes, now) {
            tracing::error!(alert_id = %alert.id, error = %e, "Failed to record channel outcomes");
        }

        let report = DispatchReport::from_outcomes(&alert.id, outcomes, now);
        let recovery = kind == NoticeKind::Recovered;
        tracing::info!(
            alert_id = %alert.id,
            succeeded = report.succeeded,
            failed = report.failed,
            recovery,
            "Notifications dispatched"
        );
        Ok(report)
    }

    /// Sends a synthetic alert through `channel` without touching any counters.
    pub async fn test_channel(&self, channel: &NotificationChannel, rule: &AlertRule) -> ChannelOutcome {
        let now = Utc::now();
        let alert = Alert {
            id: format!("test-{}", now.timestamp_millis()),
            rule_id: rule.id.clone(),
            status: AlertStatus::Open,
            severity: rule.severity,
            title: format!("Test notification for rule {}", rule.name),
            description: Some("This is a test notification from the alert service.".to_string()),
            anomaly_detection_id: None,
            log_id: None,
            service: rule.service_name.clone(),
            context: None,
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            notification_sent: false,
            notification_sent_at: None,
            notification_failure_count: 0,
            last_notification_error: None,
        };
        let notice = Notice::new(NoticeKind::Test, alert, Some(rule));
        let result = send_with_timeout(&self.senders, &notice, channel, self.channel_timeout).await;
        ChannelOutcome {
            channel_id: channel.id.clone(),
            channel_type: channel.channel_type,
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

async fn send_with_timeout(
    senders: &Senders,
    notice: &Notice,
    channel: &NotificationChannel,
    timeout: Duration,
) -> crate::error::Result<()> {
    let sender = senders.for_type(channel.channel_type);
    match tokio::time::timeout(timeout, sender.send(notice, channel)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(timeout.as_secs())),
    }
}
