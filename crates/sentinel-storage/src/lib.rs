//! SQLite persistence for rules, channels, alerts and the anomaly feed.
//!
//! Everything lives in a single WAL-mode database owned by [`AlertStore`].
//! The anomaly table is written by the scoring pipeline and only read here,
//! through the [`AnomalySource`] seam the monitoring scheduler depends on.

pub mod error;
pub mod store;


use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_common::types::{AlertStatus, AnomalyDetection, ChannelType, RuleType, Severity};

pub use store::AlertStore;

/// Read access to scored log records.
///
/// Implementations must be `Send + Sync`; the scheduler polls from its own
/// task while the REST API reads counts concurrently.
pub trait AnomalySource: Send + Sync {
    /// Anomalies detected at or after `since` that no alert references yet,
    /// oldest first, at most `limit` of them.
    fn find_unprocessed_anomalies(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AnomalyDetection>>;

    /// Anomalies at or above both bounds detected at or after `since`,
    /// whether or not an alert already references them.
    fn find_critical_anomalies(
        &self,
        min_confidence: f64,
        min_score: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AnomalyDetection>>;

    /// Flagged anomalies detected in `[start, end)`.
    fn count_anomalies_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64>;

    /// Flagged anomalies at or after `since` that no alert references yet.
    fn count_unprocessed_anomalies(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Rule list filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub rule_type: Option<RuleType>,
    pub severity: Option<Severity>,
    pub service_name: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    pub channel_type: Option<ChannelType>,
    pub enabled: Option<bool>,
    pub rule_id: Option<String>,
}

/// Alert list filter. The creation range is half-open: `[created_from, created_to)`.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub service: Option<String>,
    pub rule_id: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub detected_from: Option<DateTime<Utc>>,
    pub detected_to: Option<DateTime<Utc>>,
    /// Only rows with the anomaly flag set.
    pub anomalous_only: bool,
    pub min_confidence: Option<f64>,
    pub min_score: Option<f64>,
    /// Only rows no alert references through `anomaly_detection_id`.
    pub unprocessed_only: bool,
}

/// Per-channel-type counters for the monitoring endpoints.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ChannelTypeStats {
    pub channel_type: ChannelType,
    pub total: u64,
    pub enabled: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct HourlyCount {
    pub hour_start: DateTime<Utc>,
    pub count: u64,
}
