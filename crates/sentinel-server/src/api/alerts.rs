use crate::api::pagination::PaginationParams;
use crate::api::rules::load_rule;
use crate::api::{
    bad_request, error_response, not_found, storage_error_response, success_paginated_response,
    success_response, ApiError,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use sentinel_alert::builder::{manual_alert, ManualAlert};
use sentinel_alert::lifecycle::{self, TransitionError};
use sentinel_common::types::{Alert, AlertStatus, Severity};
use sentinel_notify::dispatcher::DispatchReport;
use sentinel_storage::error::StorageError;
use sentinel_storage::AlertFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

const DEFAULT_RECENT_MINUTES: i64 = 60;
const DEFAULT_RECENT_LIMIT: u64 = 50;

fn load_alert(state: &AppState, trace_id: &str, id: &str) -> Result<Alert, Response> {
    match state.store.get_alert(id) {
        Ok(Some(alert)) => Ok(alert),
        Ok(None) => Err(not_found(trace_id, &format!("Alert '{id}' not found"))),
        Err(e) => Err(storage_error_response(trace_id, &e, "load alert")),
    }
}

fn conflict(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::CONFLICT, trace_id, "conflict", msg)
}

fn required_actor(value: &str, field: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(value.to_string())
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListAlertsParams {
    /// OPEN, ACKNOWLEDGED, RESOLVED or FALSE_POSITIVE
    #[param(required = false)]
    status: Option<String>,
    /// INFO, LOW, MEDIUM, HIGH or CRITICAL
    #[param(required = false)]
    severity: Option<String>,
    /// Exact service name
    #[param(required = false)]
    service: Option<String>,
    #[param(required = false)]
    rule_id: Option<String>,
    /// Page size (default 20)
    #[param(required = false)]
    #[serde(
        default,
        deserialize_with = "crate::api::pagination::deserialize_optional_u64"
    )]
    limit: Option<u64>,
    /// Offset (default 0)
    #[param(required = false)]
    #[serde(
        default,
        deserialize_with = "crate::api::pagination::deserialize_optional_u64"
    )]
    offset: Option<u64>,
}

fn build_alert_filter(params: &ListAlertsParams) -> Result<AlertFilter, String> {
    Ok(AlertFilter {
        status: params.status.as_deref().map(|s| s.trim().parse()).transpose()?,
        severity: params.severity.as_deref().map(|s| s.trim().parse()).transpose()?,
        service: params.service.clone(),
        rule_id: params.rule_id.clone(),
        ..AlertFilter::default()
    })
}

/// List alerts, newest first. Default paging `limit=20&offset=0`.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    params(ListAlertsParams),
    responses(
        (status = 200, description = "Paginated alerts", body = Vec<Alert>),
        (status = 400, description = "Unknown filter value", body = ApiError)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> impl IntoResponse {
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let filter = match build_alert_filter(&params) {
        Ok(filter) => filter,
        Err(msg) => return bad_request(&trace_id, &msg),
    };

    let total = match state.store.count_alerts(&filter) {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, &e, "count alerts"),
    };
    match state.store.list_alerts(&filter, limit, offset) {
        Ok(alerts) => success_paginated_response(StatusCode::OK, &trace_id, alerts, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, &e, "list alerts"),
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct RecentAlertsParams {
    /// Look-back window in minutes (default 60)
    #[param(required = false)]
    #[serde(
        default,
        deserialize_with = "crate::api::pagination::deserialize_optional_u64"
    )]
    minutes: Option<u64>,
    /// Maximum number of alerts (default 50)
    #[param(required = false)]
    #[serde(
        default,
        deserialize_with = "crate::api::pagination::deserialize_optional_u64"
    )]
    limit: Option<u64>,
}

/// Alerts created within the last `minutes`, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts/recent",
    tag = "Alerts",
    params(RecentAlertsParams),
    responses(
        (status = 200, description = "Recent alerts", body = Vec<Alert>)
    )
)]
async fn recent_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<RecentAlertsParams>,
) -> impl IntoResponse {
    let minutes = params
        .minutes
        .map(|m| i64::try_from(m).unwrap_or(i64::MAX))
        .unwrap_or(DEFAULT_RECENT_MINUTES)
        .min(Duration::weeks(52).num_minutes());
    let limit = PaginationParams::resolve_limit(Some(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT)));
    let filter = AlertFilter {
        created_from: Some(Utc::now() - Duration::minutes(minutes)),
        ..AlertFilter::default()
    };
    match state.store.list_alerts(&filter, limit, 0) {
        Ok(alerts) => success_response(StatusCode::OK, &trace_id, alerts),
        Err(e) => storage_error_response(&trace_id, &e, "list recent alerts"),
    }
}

/// Alert counts by status and by severity.
#[derive(Serialize, ToSchema)]
pub struct AlertStatisticsResponse {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
}

/// Every known status, zero-filled.
pub(crate) fn status_counts(state: &AppState) -> Result<BTreeMap<String, u64>, StorageError> {
    let mut counts: BTreeMap<String, u64> = AlertStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, count) in state.store.count_alerts_by_status()? {
        counts.insert(status.as_str().to_string(), count);
    }
    Ok(counts)
}

/// Every known severity, zero-filled.
pub(crate) fn severity_counts(state: &AppState) -> Result<BTreeMap<String, u64>, StorageError> {
    let mut counts: BTreeMap<String, u64> = Severity::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (severity, count) in state.store.count_alerts_by_severity()? {
        counts.insert(severity.as_str().to_string(), count);
    }
    Ok(counts)
}

/// Alert counts by status and severity.
#[utoipa::path(
    get,
    path = "/v1/alerts/statistics",
    tag = "Alerts",
    responses(
        (status = 200, description = "Alert statistics", body = AlertStatisticsResponse)
    )
)]
async fn alert_statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let by_status = match status_counts(&state) {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, &e, "count alerts by status"),
    };
    let by_severity = match severity_counts(&state) {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, &e, "count alerts by severity"),
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        AlertStatisticsResponse {
            total: by_status.values().sum(),
            by_status,
            by_severity,
        },
    )
}

/// Get one alert.
#[utoipa::path(
    get,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert", body = Alert),
        (status = 404, description = "Alert not found", body = ApiError)
    )
)]
async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_alert(&state, &trace_id, &id) {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAlertRequest {
    pub rule_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    /// Overrides the rule's severity
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub context: Option<serde_json::Value>,
}

impl CreateAlertRequest {
    fn into_manual(self) -> Result<(String, ManualAlert), String> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err("Alert title is required".to_string());
        }
        let severity = self
            .severity
            .as_deref()
            .map(|s| s.trim().parse::<Severity>())
            .transpose()?;
        Ok((
            self.rule_id,
            ManualAlert {
                title,
                description: self.description,
                service: self.service.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                severity,
                context: self.context,
            },
        ))
    }
}

/// Raise an alert by hand. It is dispatched to the rule's channels like any
/// other alert and counts as a rule trigger, but skips the rate limiter.
#[utoipa::path(
    post,
    path = "/v1/alerts",
    tag = "Alerts",
    request_body = CreateAlertRequest,
    responses(
        (status = 201, description = "Alert created", body = Alert),
        (status = 400, description = "Invalid alert", body = ApiError),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn create_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> impl IntoResponse {
    let (rule_id, input) = match req.into_manual() {
        Ok(parts) => parts,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    let rule = match load_rule(&state, &trace_id, &rule_id) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    let alert = manual_alert(&rule, input, now);
    if let Err(e) = state.store.insert_alert(&alert) {
        return storage_error_response(&trace_id, &e, "create alert");
    }
    if let Err(e) = state.store.record_rule_trigger(&rule.id, now) {
        tracing::warn!(rule_id = %rule.id, error = %e, "Failed to update rule trigger stats");
    }
    tracing::info!(alert_id = %alert.id, rule_id = %rule.id, "Manual alert created");
    state.dispatcher.dispatch(alert.clone());
    success_response(StatusCode::CREATED, &trace_id, alert)
}

fn transition_error(trace_id: &str, err: &TransitionError) -> Response {
    conflict(trace_id, &err.to_string())
}

/// Writes a transition made from `from`. A concurrent request that moved
/// the alert first turns this one into a conflict.
fn save_transition(state: &AppState, trace_id: &str, alert: &Alert, from: AlertStatus) -> Option<Response> {
    match state.store.update_alert_state(alert, from) {
        Ok(true) => None,
        Ok(false) => match state.store.get_alert(&alert.id) {
            Ok(Some(current)) => {
                tracing::warn!(
                    alert_id = %alert.id,
                    expected = %from,
                    actual = %current.status,
                    "Alert changed state during transition"
                );
                Some(conflict(
                    trace_id,
                    &format!("Alert '{}' is now {}", alert.id, current.status),
                ))
            }
            Ok(None) => Some(not_found(trace_id, &format!("Alert '{}' not found", alert.id))),
            Err(e) => Some(storage_error_response(trace_id, &e, "load alert")),
        },
        Err(e) => Some(storage_error_response(trace_id, &e, "update alert")),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: String,
}

/// Acknowledge an OPEN alert.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/acknowledge",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    request_body = AcknowledgeRequest,
    responses(
        (status = 200, description = "Alert acknowledged", body = Alert),
        (status = 400, description = "Missing actor", body = ApiError),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Alert is not OPEN", body = ApiError)
    )
)]
async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> impl IntoResponse {
    let by = match required_actor(&req.acknowledged_by, "acknowledged_by") {
        Ok(by) => by,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    let mut alert = match load_alert(&state, &trace_id, &id) {
        Ok(alert) => alert,
        Err(resp) => return resp,
    };
    let from = alert.status;
    if let Err(e) = lifecycle::acknowledge(&mut alert, &by, Utc::now()) {
        return transition_error(&trace_id, &e);
    }
    if let Some(resp) = save_transition(&state, &trace_id, &alert, from) {
        return resp;
    }
    tracing::info!(alert_id = %id, acknowledged_by = %by, "Alert acknowledged");
    success_response(StatusCode::OK, &trace_id, alert)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveRequest {
    pub resolved_by: String,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

/// Resolve an OPEN or ACKNOWLEDGED alert. Rules with `notify_on_recovery`
/// send a recovery notice to their channels.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/resolve",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Alert resolved", body = Alert),
        (status = 400, description = "Missing actor", body = ApiError),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Alert already closed", body = ApiError)
    )
)]
async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let by = match required_actor(&req.resolved_by, "resolved_by") {
        Ok(by) => by,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    let mut alert = match load_alert(&state, &trace_id, &id) {
        Ok(alert) => alert,
        Err(resp) => return resp,
    };
    let from = alert.status;
    if let Err(e) = lifecycle::resolve(&mut alert, &by, req.resolution_notes.as_deref(), Utc::now()) {
        return transition_error(&trace_id, &e);
    }
    if let Some(resp) = save_transition(&state, &trace_id, &alert, from) {
        return resp;
    }
    tracing::info!(alert_id = %id, resolved_by = %by, "Alert resolved");

    match state.store.get_rule(&alert.rule_id) {
        Ok(Some(rule)) if rule.notify_on_recovery => {
            state.dispatcher.dispatch_recovery(alert.clone());
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(alert_id = %id, error = %e, "Failed to load rule for recovery notice");
        }
    }
    success_response(StatusCode::OK, &trace_id, alert)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FalsePositiveRequest {
    pub resolved_by: String,
}

/// Close an OPEN or ACKNOWLEDGED alert as a false positive.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/false-positive",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    request_body = FalsePositiveRequest,
    responses(
        (status = 200, description = "Alert marked as false positive", body = Alert),
        (status = 400, description = "Missing actor", body = ApiError),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Alert already closed", body = ApiError)
    )
)]
async fn mark_false_positive(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FalsePositiveRequest>,
) -> impl IntoResponse {
    let by = match required_actor(&req.resolved_by, "resolved_by") {
        Ok(by) => by,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    let mut alert = match load_alert(&state, &trace_id, &id) {
        Ok(alert) => alert,
        Err(resp) => return resp,
    };
    let from = alert.status;
    if let Err(e) = lifecycle::mark_false_positive(&mut alert, &by, Utc::now()) {
        return transition_error(&trace_id, &e);
    }
    if let Some(resp) = save_transition(&state, &trace_id, &alert, from) {
        return resp;
    }
    tracing::info!(alert_id = %id, resolved_by = %by, "Alert marked as false positive");
    success_response(StatusCode::OK, &trace_id, alert)
}

/// Outcome of a manual notification retry.
#[derive(Serialize, ToSchema)]
pub struct RetryResponse {
    /// False when the alert had already been delivered.
    pub retried: bool,
    pub report: Option<DispatchReport>,
}

/// Send an undelivered alert to its channels again and wait for the result.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/retry-notifications",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Dispatch report", body = RetryResponse),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Retry limit reached", body = ApiError)
    )
)]
async fn retry_notifications(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let alert = match load_alert(&state, &trace_id, &id) {
        Ok(alert) => alert,
        Err(resp) => return resp,
    };
    if alert.notification_sent {
        return success_response(
            StatusCode::OK,
            &trace_id,
            RetryResponse {
                retried: false,
                report: None,
            },
        );
    }
    let max_retries = state.config.monitoring.max_notification_retries;
    if alert.notification_failure_count >= max_retries {
        return conflict(
            &trace_id,
            &format!(
                "Alert '{id}' reached the retry limit ({} of {max_retries} failures)",
                alert.notification_failure_count
            ),
        );
    }

    match state.dispatcher.dispatch_now(&alert).await {
        Ok(report) => {
            tracing::info!(
                alert_id = %id,
                succeeded = report.succeeded,
                failed = report.failed,
                "Notification retry finished"
            );
            success_response(
                StatusCode::OK,
                &trace_id,
                RetryResponse {
                    retried: true,
                    report: Some(report),
                },
            )
        }
        Err(e) => {
            tracing::error!(alert_id = %id, error = %e, "Notification retry failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "Notification retry failed",
            )
        }
    }
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts, create_alert))
        .routes(routes!(recent_alerts))
        .routes(routes!(alert_statistics))
        .routes(routes!(get_alert))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
        .routes(routes!(mark_false_positive))
        .routes(routes!(retry_notifications))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_request_validates_title_and_severity() {
        let req = CreateAlertRequest {
            rule_id: "1".to_string(),
            title: "  ".to_string(),
            description: None,
            service: None,
            severity: None,
            context: None,
        };
        assert!(req.into_manual().is_err());

        let req = CreateAlertRequest {
            rule_id: "1".to_string(),
            title: "Disk full".to_string(),
            description: None,
            service: Some(" ".to_string()),
            severity: Some("urgent".to_string()),
            context: None,
        };
        assert!(req.into_manual().is_err());

        let req = CreateAlertRequest {
            rule_id: "1".to_string(),
            title: " Disk full ".to_string(),
            description: None,
            service: Some(" ".to_string()),
            severity: Some("critical".to_string()),
            context: None,
        };
        let (rule_id, manual) = req.into_manual().expect("valid request");
        assert_eq!(rule_id, "1");
        assert_eq!(manual.title, "Disk full");
        assert_eq!(manual.severity, Some(Severity::Critical));
        assert!(manual.service.is_none());
    }

    #[test]
    fn actors_must_not_be_blank() {
        assert!(required_actor(" ", "resolved_by").is_err());
        assert_eq!(required_actor(" bob ", "resolved_by").as_deref(), Ok("bob"));
    }

    #[test]
    fn filter_rejects_unknown_status() {
        let params = ListAlertsParams {
            status: Some("CLOSED".to_string()),
            severity: None,
            service: None,
            rule_id: None,
            limit: None,
            offset: None,
        };
        assert!(build_alert_filter(&params).is_err());
    }
}
