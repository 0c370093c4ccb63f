use crate::api::alerts::{severity_counts, status_counts};
use crate::api::{error_response, storage_error_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::monitor::scheduler::{AnomalyStatistics, SchedulerStatus};
use crate::monitor::TickSummary;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use sentinel_alert::rate_limit::RateLimitConfig;
use sentinel_common::types::{RuleType, CRITICAL_MIN_CONFIDENCE};
use sentinel_storage::error::StorageError;
use sentinel_storage::{AlertFilter, AnomalyFilter, ChannelFilter, ChannelTypeStats, HourlyCount, RuleFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

const DEFAULT_STATISTICS_HOURS: u32 = 168;
const DEFAULT_METRICS_HOURS: u32 = 24;
const TREND_HOURS: u32 = 24;
/// Upper bound for `hours` query parameters (one year).
const MAX_HOURS: u32 = 24 * 366;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct HoursParams {
    /// Look-back window in hours
    #[param(required = false)]
    #[serde(
        default,
        deserialize_with = "crate::api::pagination::deserialize_optional_u64"
    )]
    hours: Option<u64>,
}

impl HoursParams {
    fn resolve(&self, default: u32) -> u32 {
        self.hours
            .map(|h| u32::try_from(h).unwrap_or(MAX_HOURS))
            .unwrap_or(default)
            .min(MAX_HOURS)
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// UP when the database answers
    pub status: String,
    pub database: String,
    /// UP, or DISABLED when anomaly polling is switched off
    pub scheduler: String,
    pub version: String,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
    pub total_alert_rules: u64,
    pub total_notification_channels: u64,
    pub total_alerts: u64,
    pub last_check_time: DateTime<Utc>,
}

fn health_counts(state: &AppState) -> Result<(u64, u64, u64), StorageError> {
    state.store.ping()?;
    Ok((
        state.store.count_rules(&RuleFilter::default())?,
        state.store.count_channels(&ChannelFilter::default())?,
        state.store.count_alerts(&AlertFilter::default())?,
    ))
}

/// Database and scheduler health. Answers 503 when the database is unreachable.
#[utoipa::path(
    get,
    path = "/v1/monitoring/health",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = ApiError)
    )
)]
async fn health(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> impl IntoResponse {
    let (total_alert_rules, total_notification_channels, total_alerts) = match health_counts(&state) {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &trace_id,
                "service_unavailable",
                &format!("Database unavailable: {e}"),
            );
        }
    };
    let now = Utc::now();
    let scheduler = if state.config.monitoring.enabled { "UP" } else { "DISABLED" };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            status: "UP".to_string(),
            database: "UP".to_string(),
            scheduler: scheduler.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (now - state.start_time).num_seconds(),
            timestamp: now,
            total_alert_rules,
            total_notification_channels,
            total_alerts,
            last_check_time: state.scheduler.last_check_time(),
        },
    )
}

#[derive(Serialize, ToSchema)]
pub struct SystemStatistics {
    pub timestamp: DateTime<Utc>,
    pub time_range_hours: u32,
    pub total_alerts: u64,
    pub alerts_by_status: BTreeMap<String, u64>,
    pub alerts_by_severity: BTreeMap<String, u64>,
    /// Alerts created within the time range
    pub recent_alerts: u64,
    pub total_anomalies: u64,
    /// Anomaly records detected within the time range
    pub recent_anomalies: u64,
    pub unprocessed_anomalies: u64,
    pub total_alert_rules: u64,
    pub enabled_alert_rules: u64,
    pub total_notification_channels: u64,
    pub enabled_notification_channels: u64,
}

fn system_statistics(state: &AppState, hours: u32, now: DateTime<Utc>) -> Result<SystemStatistics, StorageError> {
    let since = now - Duration::hours(i64::from(hours));
    let alerts_by_status = status_counts(state)?;
    let alerts_by_severity = severity_counts(state)?;
    let store = &state.store;
    Ok(SystemStatistics {
        timestamp: now,
        time_range_hours: hours,
        total_alerts: alerts_by_status.values().sum(),
        alerts_by_status,
        alerts_by_severity,
        recent_alerts: store.count_alerts(&AlertFilter {
            created_from: Some(since),
            ..AlertFilter::default()
        })?,
        total_anomalies: store.count_anomalies(&AnomalyFilter::default())?,
        recent_anomalies: store.count_anomalies(&AnomalyFilter {
            detected_from: Some(since),
            ..AnomalyFilter::default()
        })?,
        unprocessed_anomalies: store.count_anomalies(&AnomalyFilter {
            anomalous_only: true,
            unprocessed_only: true,
            ..AnomalyFilter::default()
        })?,
        total_alert_rules: store.count_rules(&RuleFilter::default())?,
        enabled_alert_rules: store.count_rules(&RuleFilter {
            enabled: Some(true),
            ..RuleFilter::default()
        })?,
        total_notification_channels: store.count_channels(&ChannelFilter::default())?,
        enabled_notification_channels: store.count_channels(&ChannelFilter {
            enabled: Some(true),
            ..ChannelFilter::default()
        })?,
    })
}

/// Alert, anomaly, rule and channel totals. Default window `hours=168`.
#[utoipa::path(
    get,
    path = "/v1/monitoring/statistics",
    tag = "Monitoring",
    params(HoursParams),
    responses(
        (status = 200, description = "System statistics", body = SystemStatistics)
    )
)]
async fn statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<HoursParams>,
) -> impl IntoResponse {
    let hours = params.resolve(DEFAULT_STATISTICS_HOURS);
    match system_statistics(&state, hours, Utc::now()) {
        Ok(stats) => success_response(StatusCode::OK, &trace_id, stats),
        Err(e) => storage_error_response(&trace_id, &e, "collect system statistics"),
    }
}

/// Alert counts per status, zero-filled.
#[utoipa::path(
    get,
    path = "/v1/monitoring/alerts/by-status",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Counts keyed by status", body = BTreeMap<String, u64>)
    )
)]
async fn alerts_by_status(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match status_counts(&state) {
        Ok(counts) => success_response(StatusCode::OK, &trace_id, counts),
        Err(e) => storage_error_response(&trace_id, &e, "count alerts by status"),
    }
}

/// Alert counts per severity, zero-filled.
#[utoipa::path(
    get,
    path = "/v1/monitoring/alerts/by-severity",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Counts keyed by severity", body = BTreeMap<String, u64>)
    )
)]
async fn alerts_by_severity(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match severity_counts(&state) {
        Ok(counts) => success_response(StatusCode::OK, &trace_id, counts),
        Err(e) => storage_error_response(&trace_id, &e, "count alerts by severity"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct AlertTrend {
    /// Oldest bucket first
    pub hourly_counts: Vec<HourlyCount>,
    pub period_hours: u32,
    pub timestamp: DateTime<Utc>,
}

/// Hourly alert counts over the last 24 hours.
#[utoipa::path(
    get,
    path = "/v1/monitoring/alerts/trend",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Hourly alert counts", body = AlertTrend)
    )
)]
async fn alert_trend(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    match state.store.hourly_alert_counts(now, TREND_HOURS) {
        Ok(hourly_counts) => success_response(
            StatusCode::OK,
            &trace_id,
            AlertTrend {
                hourly_counts,
                period_hours: TREND_HOURS,
                timestamp: now,
            },
        ),
        Err(e) => storage_error_response(&trace_id, &e, "load alert trend"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct AnomalyMetrics {
    /// Anomaly records detected within the period
    pub total_anomalies: u64,
    /// Records within the period with confidence of at least 0.8
    pub high_confidence_anomalies: u64,
    /// Flagged anomalies no alert references yet, over all time
    pub unprocessed_anomalies: u64,
    pub period_hours: u32,
    pub timestamp: DateTime<Utc>,
}

fn anomaly_metrics(state: &AppState, hours: u32, now: DateTime<Utc>) -> Result<AnomalyMetrics, StorageError> {
    let since = now - Duration::hours(i64::from(hours));
    let store = &state.store;
    Ok(AnomalyMetrics {
        total_anomalies: store.count_anomalies(&AnomalyFilter {
            detected_from: Some(since),
            ..AnomalyFilter::default()
        })?,
        high_confidence_anomalies: store.count_anomalies(&AnomalyFilter {
            detected_from: Some(since),
            min_confidence: Some(CRITICAL_MIN_CONFIDENCE),
            ..AnomalyFilter::default()
        })?,
        unprocessed_anomalies: store.count_anomalies(&AnomalyFilter {
            anomalous_only: true,
            unprocessed_only: true,
            ..AnomalyFilter::default()
        })?,
        period_hours: hours,
        timestamp: now,
    })
}

/// Anomaly detection volume. Default window `hours=24`.
#[utoipa::path(
    get,
    path = "/v1/monitoring/anomalies/metrics",
    tag = "Monitoring",
    params(HoursParams),
    responses(
        (status = 200, description = "Anomaly metrics", body = AnomalyMetrics)
    )
)]
async fn anomalies_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<HoursParams>,
) -> impl IntoResponse {
    let hours = params.resolve(DEFAULT_METRICS_HOURS);
    match anomaly_metrics(&state, hours, Utc::now()) {
        Ok(metrics) => success_response(StatusCode::OK, &trace_id, metrics),
        Err(e) => storage_error_response(&trace_id, &e, "collect anomaly metrics"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct ChannelStatistics {
    pub total_channels: u64,
    pub enabled_channels: u64,
    pub by_type: Vec<ChannelTypeStats>,
    pub timestamp: DateTime<Utc>,
}

/// Channel totals and delivery counters per channel type.
#[utoipa::path(
    get,
    path = "/v1/monitoring/channels/statistics",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Channel statistics", body = ChannelStatistics)
    )
)]
async fn channel_statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.channel_type_stats() {
        Ok(by_type) => success_response(
            StatusCode::OK,
            &trace_id,
            ChannelStatistics {
                total_channels: by_type.iter().map(|s| s.total).sum(),
                enabled_channels: by_type.iter().map(|s| s.enabled).sum(),
                by_type,
                timestamp: Utc::now(),
            },
        ),
        Err(e) => storage_error_response(&trace_id, &e, "collect channel statistics"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct RuleStatistics {
    pub total_rules: u64,
    pub enabled_rules: u64,
    /// Every rule type, zero-filled
    pub by_type: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

fn rule_statistics_at(state: &AppState, now: DateTime<Utc>) -> Result<RuleStatistics, StorageError> {
    let mut by_type = BTreeMap::new();
    for rule_type in RuleType::ALL {
        let count = state.store.count_rules(&RuleFilter {
            rule_type: Some(rule_type),
            ..RuleFilter::default()
        })?;
        by_type.insert(rule_type.as_str().to_string(), count);
    }
    Ok(RuleStatistics {
        total_rules: state.store.count_rules(&RuleFilter::default())?,
        enabled_rules: state.store.count_rules(&RuleFilter {
            enabled: Some(true),
            ..RuleFilter::default()
        })?,
        by_type,
        timestamp: now,
    })
}

/// Rule totals per type.
#[utoipa::path(
    get,
    path = "/v1/monitoring/rules/statistics",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Rule statistics", body = RuleStatistics)
    )
)]
async fn rule_statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match rule_statistics_at(&state, Utc::now()) {
        Ok(stats) => success_response(StatusCode::OK, &trace_id, stats),
        Err(e) => storage_error_response(&trace_id, &e, "collect rule statistics"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct SchedulerOverview {
    pub status: SchedulerStatus,
    pub anomalies: AnomalyStatistics,
}

fn scheduler_failure(trace_id: &str, err: &anyhow::Error, action: &str) -> Response {
    tracing::error!(error = %err, "Failed to {action}");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        trace_id,
        "internal_error",
        &format!("Failed to {action}"),
    )
}

/// Scheduler settings, cursor and anomaly counts over the lookback window.
#[utoipa::path(
    get,
    path = "/v1/monitoring/scheduler",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Scheduler overview", body = SchedulerOverview)
    )
)]
async fn scheduler_status(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.scheduler.anomaly_statistics(Utc::now()) {
        Ok(anomalies) => success_response(
            StatusCode::OK,
            &trace_id,
            SchedulerOverview {
                status: state.scheduler.status(),
                anomalies,
            },
        ),
        Err(e) => scheduler_failure(&trace_id, &e, "collect anomaly statistics"),
    }
}

/// Run one monitoring tick now, whether or not polling is enabled.
#[utoipa::path(
    post,
    path = "/v1/monitoring/scheduler/check",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Tick summary", body = TickSummary),
        (status = 500, description = "Tick failed", body = ApiError)
    )
)]
async fn trigger_check(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.trigger_manual_check() {
        Ok(summary) => success_response(StatusCode::OK, &trace_id, summary),
        Err(e) => scheduler_failure(&trace_id, &e, "run monitoring check"),
    }
}

#[derive(Serialize, ToSchema)]
pub struct CursorResponse {
    pub last_check_time: DateTime<Utc>,
}

/// Move the cursor back to one lookback window before now.
#[utoipa::path(
    post,
    path = "/v1/monitoring/scheduler/reset",
    tag = "Monitoring",
    responses(
        (status = 200, description = "New cursor", body = CursorResponse)
    )
)]
async fn reset_cursor(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> impl IntoResponse {
    let last_check_time = state.scheduler.reset_last_check_time();
    success_response(StatusCode::OK, &trace_id, CursorResponse { last_check_time })
}

/// Active rate-limit settings.
#[utoipa::path(
    get,
    path = "/v1/monitoring/rate-limit",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Rate limiter configuration", body = RateLimitConfig)
    )
)]
async fn rate_limit_config(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    success_response(StatusCode::OK, &trace_id, state.rate_limiter.config().clone())
}

pub fn monitoring_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(statistics))
        .routes(routes!(alerts_by_status))
        .routes(routes!(alerts_by_severity))
        .routes(routes!(alert_trend))
        .routes(routes!(anomalies_metrics))
        .routes(routes!(channel_statistics))
        .routes(routes!(rule_statistics))
        .routes(routes!(scheduler_status))
        .routes(routes!(trigger_check))
        .routes(routes!(reset_cursor))
        .routes(routes!(rate_limit_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_default_and_clamp() {
        let params = HoursParams { hours: None };
        assert_eq!(params.resolve(DEFAULT_STATISTICS_HOURS), 168);
        let params = HoursParams { hours: Some(6) };
        assert_eq!(params.resolve(DEFAULT_METRICS_HOURS), 6);
        let params = HoursParams {
            hours: Some(u64::MAX),
        };
        assert_eq!(params.resolve(DEFAULT_METRICS_HOURS), MAX_HOURS);
    }
}
