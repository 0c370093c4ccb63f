use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, error_response, not_found, storage_error_response, success_empty_response,
    success_paginated_response, success_response, ApiError,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use sentinel_alert::engine::{evaluate, RuleEvaluation};
use sentinel_common::types::{AlertRule, AnomalyDetection, RuleType, Severity};
use sentinel_storage::RuleFilter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Loads a rule or produces the 404/500 response for it.
pub(crate) fn load_rule(state: &AppState, trace_id: &str, id: &str) -> Result<AlertRule, Response> {
    match state.store.get_rule(id) {
        Ok(Some(rule)) => Ok(rule),
        Ok(None) => Err(not_found(trace_id, &format!("Alert rule '{id}' not found"))),
        Err(e) => Err(storage_error_response(trace_id, &e, "load alert rule")),
    }
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, String> {
    raw.trim().parse()
}

fn check_threshold(threshold: Option<f64>) -> Result<(), String> {
    match threshold {
        Some(t) if !(0.0..=1.0).contains(&t) => {
            Err(format!("anomaly_threshold must be between 0 and 1, got {t}"))
        }
        _ => Ok(()),
    }
}

fn non_negative(field: &str, value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{field} must be a non-negative number, got {value}"))
}

/// Empty strings clear an optional filter.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// ANOMALY_DETECTION, THRESHOLD, PATTERN_MATCH, ERROR_RATE or CUSTOM
    pub rule_type: String,
    /// INFO, LOW, MEDIUM, HIGH or CRITICAL
    pub severity: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Option<String>,
    #[serde(default)]
    pub anomaly_threshold: Option<f64>,
    #[serde(default)]
    pub time_window_minutes: Option<i64>,
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default)]
    pub notify_on_recovery: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_minutes() -> i64 {
    15
}

impl CreateRuleRequest {
    fn into_rule(self, now: DateTime<Utc>) -> Result<AlertRule, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("Rule name is required".to_string());
        }
        check_threshold(self.anomaly_threshold)?;
        let time_window_minutes = self
            .time_window_minutes
            .map(|v| non_negative("time_window_minutes", v))
            .transpose()?;
        Ok(AlertRule {
            id: sentinel_common::id::next_id(),
            name,
            description: self.description,
            rule_type: parse_enum::<RuleType>(&self.rule_type)?,
            severity: parse_enum::<Severity>(&self.severity)?,
            enabled: self.enabled,
            conditions: self.conditions,
            anomaly_threshold: self.anomaly_threshold,
            time_window_minutes,
            threshold: self.threshold,
            service_name: non_empty(self.service_name),
            log_level: non_empty(self.log_level),
            cooldown_minutes: non_negative("cooldown_minutes", self.cooldown_minutes)?,
            notify_on_recovery: self.notify_on_recovery,
            created_by: self.created_by,
            trigger_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update; omitted fields keep their value. An empty
/// `service_name` or `log_level` removes that filter.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule_type: Option<String>,
    pub severity: Option<String>,
    pub enabled: Option<bool>,
    pub conditions: Option<String>,
    pub anomaly_threshold: Option<f64>,
    pub time_window_minutes: Option<i64>,
    pub threshold: Option<i64>,
    pub service_name: Option<String>,
    pub log_level: Option<String>,
    pub cooldown_minutes: Option<i64>,
    pub notify_on_recovery: Option<bool>,
}

impl UpdateRuleRequest {
    fn apply(self, rule: &mut AlertRule, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(name) = self.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err("Rule name must not be empty".to_string());
            }
            rule.name = name;
        }
        check_threshold(self.anomaly_threshold)?;
        if let Some(description) = self.description {
            rule.description = Some(description);
        }
        if let Some(raw) = self.rule_type {
            rule.rule_type = parse_enum(&raw)?;
        }
        if let Some(raw) = self.severity {
            rule.severity = parse_enum(&raw)?;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(conditions) = self.conditions {
            rule.conditions = Some(conditions);
        }
        if let Some(threshold) = self.anomaly_threshold {
            rule.anomaly_threshold = Some(threshold);
        }
        if let Some(window) = self.time_window_minutes {
            rule.time_window_minutes = Some(non_negative("time_window_minutes", window)?);
        }
        if let Some(threshold) = self.threshold {
            rule.threshold = Some(threshold);
        }
        if self.service_name.is_some() {
            rule.service_name = non_empty(self.service_name);
        }
        if self.log_level.is_some() {
            rule.log_level = non_empty(self.log_level);
        }
        if let Some(cooldown) = self.cooldown_minutes {
            rule.cooldown_minutes = non_negative("cooldown_minutes", cooldown)?;
        }
        if let Some(notify) = self.notify_on_recovery {
            rule.notify_on_recovery = notify;
        }
        rule.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListRulesParams {
    /// Rule type exact match
    #[param(required = false)]
    rule_type: Option<String>,
    /// Severity exact match
    #[param(required = false)]
    severity: Option<String>,
    /// Service filter exact match
    #[param(required = false)]
    service_name: Option<String>,
    #[param(required = false)]
    enabled: Option<bool>,
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

/// Create an alert rule.
#[utoipa::path(
    post,
    path = "/v1/alert-rules",
    tag = "Alert Rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = AlertRule),
        (status = 400, description = "Invalid rule", body = ApiError),
        (status = 409, description = "Rule name already taken", body = ApiError)
    )
)]
async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    let rule = match req.into_rule(Utc::now()) {
        Ok(rule) => rule,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    match state.store.insert_rule(&rule) {
        Ok(()) => {
            tracing::info!(rule_id = %rule.id, name = %rule.name, "Alert rule created");
            success_response(StatusCode::CREATED, &trace_id, rule)
        }
        Err(e) => storage_error_response(&trace_id, &e, "create alert rule"),
    }
}

/// List alert rules, newest first. Default paging `limit=20&offset=0`.
#[utoipa::path(
    get,
    path = "/v1/alert-rules",
    tag = "Alert Rules",
    params(ListRulesParams),
    responses(
        (status = 200, description = "Paginated rules", body = Vec<AlertRule>),
        (status = 400, description = "Unknown filter value", body = ApiError)
    )
)]
async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListRulesParams>,
) -> impl IntoResponse {
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let filter = match build_rule_filter(&params) {
        Ok(filter) => filter,
        Err(msg) => return bad_request(&trace_id, &msg),
    };

    let total = match state.store.count_rules(&filter) {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, &e, "count alert rules"),
    };
    match state.store.list_rules(&filter, limit, offset) {
        Ok(rules) => success_paginated_response(StatusCode::OK, &trace_id, rules, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, &e, "list alert rules"),
    }
}

fn build_rule_filter(params: &ListRulesParams) -> Result<RuleFilter, String> {
    Ok(RuleFilter {
        rule_type: params.rule_type.as_deref().map(parse_enum).transpose()?,
        severity: params.severity.as_deref().map(parse_enum).transpose()?,
        service_name: params.service_name.clone(),
        enabled: params.enabled,
    })
}

/// Get one alert rule.
#[utoipa::path(
    get,
    path = "/v1/alert-rules/{id}",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule", body = AlertRule),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn get_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_rule(&state, &trace_id, &id) {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(resp) => resp,
    }
}

/// Update an alert rule.
#[utoipa::path(
    put,
    path = "/v1/alert-rules/{id}",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Updated rule", body = AlertRule),
        (status = 400, description = "Invalid field", body = ApiError),
        (status = 404, description = "Rule not found", body = ApiError),
        (status = 409, description = "Rule name already taken", body = ApiError)
    )
)]
async fn update_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    let mut rule = match load_rule(&state, &trace_id, &id) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };
    if let Err(msg) = req.apply(&mut rule, Utc::now()) {
        return bad_request(&trace_id, &msg);
    }
    match state.store.update_rule(&rule) {
        Ok(true) => success_response(StatusCode::OK, &trace_id, rule),
        Ok(false) => not_found(&trace_id, &format!("Alert rule '{id}' not found")),
        Err(e) => storage_error_response(&trace_id, &e, "update alert rule"),
    }
}

/// Delete an alert rule and its channels. Rules that already produced
/// alerts cannot be deleted; disable them instead.
#[utoipa::path(
    delete,
    path = "/v1/alert-rules/{id}",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule deleted"),
        (status = 404, description = "Rule not found", body = ApiError),
        (status = 409, description = "Rule still has alerts", body = ApiError)
    )
)]
async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_rule(&id) {
        Ok(true) => {
            state.rate_limiter.clear_cooldown(&id);
            tracing::info!(rule_id = %id, "Alert rule deleted");
            success_empty_response(StatusCode::OK, &trace_id, "Alert rule deleted")
        }
        Ok(false) => not_found(&trace_id, &format!("Alert rule '{id}' not found")),
        Err(e) => storage_error_response(&trace_id, &e, "delete alert rule"),
    }
}

fn set_rule_enabled(state: AppState, trace_id: &str, id: &str, enabled: bool) -> Response {
    match state.store.set_rule_enabled(id, enabled, Utc::now()) {
        Ok(true) => match load_rule(&state, trace_id, id) {
            Ok(rule) => {
                tracing::info!(rule_id = %id, enabled, "Alert rule toggled");
                success_response(StatusCode::OK, trace_id, rule)
            }
            Err(resp) => resp,
        },
        Ok(false) => not_found(trace_id, &format!("Alert rule '{id}' not found")),
        Err(e) => storage_error_response(trace_id, &e, "toggle alert rule"),
    }
}

/// Enable an alert rule.
#[utoipa::path(
    post,
    path = "/v1/alert-rules/{id}/enable",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule enabled", body = AlertRule),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn enable_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_rule_enabled(state, &trace_id, &id, true)
}

/// Disable an alert rule.
#[utoipa::path(
    post,
    path = "/v1/alert-rules/{id}/disable",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule disabled", body = AlertRule),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn disable_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_rule_enabled(state, &trace_id, &id, false)
}

/// Sample anomaly for a dry run. Missing fields are filled so that the
/// sample satisfies the rule's own filters.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TestRuleRequest {
    pub log_id: Option<String>,
    pub is_anomaly: Option<bool>,
    pub confidence: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
}

impl TestRuleRequest {
    fn into_anomaly(self, rule: &AlertRule, now: DateTime<Utc>) -> AnomalyDetection {
        AnomalyDetection {
            log_id: self
                .log_id
                .unwrap_or_else(|| format!("test-{}", now.timestamp_millis())),
            is_anomaly: self.is_anomaly.unwrap_or(true),
            anomaly_score: self.anomaly_score.unwrap_or(0.9),
            confidence: self.confidence.unwrap_or(0.95),
            model_version: Some("dry-run".to_string()),
            features: None,
            detected_at: now,
            level: self
                .level
                .or_else(|| rule.log_level.clone())
                .or_else(|| Some("ERROR".to_string())),
            message: self
                .message
                .or_else(|| Some("Synthetic anomaly for rule test".to_string())),
            service: self.service.or_else(|| rule.service_name.clone()),
            log_timestamp: Some(now),
        }
    }
}

/// Dry-run a rule against a sample anomaly. Creates no alert and touches
/// no counters or cooldowns. The body is optional.
#[utoipa::path(
    post,
    path = "/v1/alert-rules/{id}/test",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    request_body(content = Option<TestRuleRequest>, description = "Optional sample anomaly"),
    responses(
        (status = 200, description = "Evaluation result", body = RuleEvaluation),
        (status = 400, description = "Malformed sample", body = ApiError),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn test_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let rule = match load_rule(&state, &trace_id, &id) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };
    let sample = if body.iter().all(u8::is_ascii_whitespace) {
        TestRuleRequest::default()
    } else {
        match serde_json::from_slice::<Option<TestRuleRequest>>(&body) {
            Ok(sample) => sample.unwrap_or_default(),
            Err(e) => return bad_request(&trace_id, &format!("Invalid sample anomaly: {e}")),
        }
    };
    let anomaly = sample.into_anomaly(&rule, Utc::now());
    success_response(StatusCode::OK, &trace_id, evaluate(&rule, &anomaly))
}

#[derive(Serialize, ToSchema)]
struct RuleCooldownResponse {
    rule_id: String,
    in_cooldown: bool,
    cooldown_until: Option<DateTime<Utc>>,
    /// Alerts created for the rule within the rate-limit window
    alert_count: u64,
    max_alerts_per_rule: u64,
    time_window_minutes: i64,
}

/// Rate-limit state of one rule.
#[utoipa::path(
    get,
    path = "/v1/alert-rules/{id}/cooldown",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Cooldown status", body = RuleCooldownResponse),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn get_rule_cooldown(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = load_rule(&state, &trace_id, &id) {
        return resp;
    }
    let now = Utc::now();
    let status = state.rate_limiter.cooldown_status(&id, now);
    let alert_count = match state.rate_limiter.alert_count(&id, now) {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(rule_id = %id, error = %e, "Failed to count alerts for rule");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    };
    let config = state.rate_limiter.config();
    success_response(
        StatusCode::OK,
        &trace_id,
        RuleCooldownResponse {
            rule_id: status.rule_id,
            in_cooldown: status.in_cooldown,
            cooldown_until: status.cooldown_until,
            alert_count,
            max_alerts_per_rule: config.max_alerts_per_rule,
            time_window_minutes: config.time_window_minutes,
        },
    )
}

/// Clear a rule's cooldown so its next match is counted again.
#[utoipa::path(
    delete,
    path = "/v1/alert-rules/{id}/cooldown",
    tag = "Alert Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Cooldown cleared"),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn clear_rule_cooldown(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = load_rule(&state, &trace_id, &id) {
        return resp;
    }
    state.rate_limiter.clear_cooldown(&id);
    tracing::info!(rule_id = %id, "Rule cooldown cleared by operator");
    success_empty_response(StatusCode::OK, &trace_id, "Cooldown cleared")
}

pub fn rule_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_rule, list_rules))
        .routes(routes!(get_rule, update_rule, delete_rule))
        .routes(routes!(enable_rule))
        .routes(routes!(disable_rule))
        .routes(routes!(test_rule))
        .routes(routes!(get_rule_cooldown, clear_rule_cooldown))
}
