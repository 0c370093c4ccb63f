use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_alert::builder::alert_from_anomaly;
use sentinel_alert::engine::matching_rules;
use sentinel_alert::rate_limit::RateLimiter;
use sentinel_common::types::{AlertRule, AnomalyDetection};
use sentinel_notify::dispatcher::NotificationDispatcher;
use sentinel_storage::AlertStore;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// What happened when a matching rule tried to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Created,
    /// An alert for this rule and anomaly already exists.
    Duplicate,
    RateLimited,
}

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TickSummary {
    pub evaluated: usize,
    pub matched: usize,
    pub created: usize,
    pub duplicates: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: FireOutcome) {
        match outcome {
            FireOutcome::Created => self.created += 1,
            FireOutcome::Duplicate => self.duplicates += 1,
            FireOutcome::RateLimited => self.rate_limited += 1,
        }
    }
}

/// Rate limiter gate, alert creation and dispatch for matching rules.
#[derive(Clone)]
pub struct AlertTrigger {
    store: Arc<AlertStore>,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: NotificationDispatcher,
}

impl AlertTrigger {
    pub fn new(
        store: Arc<AlertStore>,
        rate_limiter: Arc<RateLimiter>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            dispatcher,
        }
    }

    /// Fires every rule in `rules` that matches `anomaly`. Each rule fires
    /// independently; a storage error on one does not stop the others.
    pub fn process_anomaly(
        &self,
        rules: &[AlertRule],
        anomaly: &AnomalyDetection,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        summary.evaluated += 1;
        for rule in matching_rules(rules, anomaly) {
            summary.matched += 1;
            match self.fire(rule, anomaly, now) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        rule_id = %rule.id,
                        log_id = %anomaly.log_id,
                        error = %e,
                        "Failed to fire alert rule"
                    );
                }
            }
        }
    }

    /// Creates and dispatches one alert for a rule already known to match.
    pub fn fire(&self, rule: &AlertRule, anomaly: &AnomalyDetection, now: DateTime<Utc>) -> Result<FireOutcome> {
        if self.store.alert_exists_for(&rule.id, &anomaly.log_id)? {
            tracing::debug!(rule_id = %rule.id, log_id = %anomaly.log_id, "Alert already exists");
            return Ok(FireOutcome::Duplicate);
        }

        if !self.rate_limiter.allow_at(&rule.id, now) {
            tracing::warn!(
                rule_id = %rule.id,
                rule = %rule.name,
                log_id = %anomaly.log_id,
                "Alert suppressed by rate limiter"
            );
            return Ok(FireOutcome::RateLimited);
        }

        let alert = alert_from_anomaly(rule, anomaly, now);
        if !self.store.insert_alert(&alert)? {
            return Ok(FireOutcome::Duplicate);
        }
        if let Err(e) = self.store.record_rule_trigger(&rule.id, now) {
            tracing::warn!(rule_id = %rule.id, error = %e, "Failed to update rule trigger count");
        }

        tracing::info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            severity = %alert.severity,
            log_id = %anomaly.log_id,
            "Alert created"
        );
        self.dispatcher.dispatch(alert);
        Ok(FireOutcome::Created)
    }
}
