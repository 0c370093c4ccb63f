use crate::api::pagination::PaginationParams;
use crate::api::rules::load_rule;
use crate::api::{
    bad_request, not_found, storage_error_response, success_empty_response,
    success_paginated_response, success_response, ApiError,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use sentinel_common::types::{ChannelType, NotificationChannel};
use sentinel_notify::channels::webhook::WebhookTarget;
use sentinel_notify::dispatcher::ChannelOutcome;
use sentinel_notify::utils::redact_sensitive_json;
use sentinel_storage::ChannelFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// A channel as returned by the API; secrets in `config` are masked.
#[derive(Serialize, ToSchema)]
pub struct ChannelResponse {
    pub id: String,
    pub rule_id: String,
    pub name: String,
    pub channel_type: ChannelType,
    pub enabled: bool,
    #[schema(value_type = Object)]
    pub config: Value,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<NotificationChannel> for ChannelResponse {
    fn from(c: NotificationChannel) -> Self {
        Self {
            config: redact_sensitive_json(&c.config),
            id: c.id,
            rule_id: c.rule_id,
            name: c.name,
            channel_type: c.channel_type,
            enabled: c.enabled,
            success_count: c.success_count,
            failure_count: c.failure_count,
            last_success_at: c.last_success_at,
            last_failure_at: c.last_failure_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

fn load_channel(state: &AppState, trace_id: &str, id: &str) -> Result<NotificationChannel, Response> {
    match state.store.get_channel(id) {
        Ok(Some(channel)) => Ok(channel),
        Ok(None) => Err(not_found(trace_id, &format!("Notification channel '{id}' not found"))),
        Err(e) => Err(storage_error_response(trace_id, &e, "load notification channel")),
    }
}

/// Channel configs must be JSON objects; webhook methods are checked up
/// front. Missing URLs or recipients are left to surface as delivery failures.
fn validate_config(channel_type: ChannelType, config: &Value) -> Result<(), String> {
    if !config.is_object() {
        return Err("Channel config must be a JSON object".to_string());
    }
    if channel_type == ChannelType::Webhook {
        WebhookTarget::method_from_config(config).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChannelRequest {
    pub rule_id: String,
    pub name: String,
    /// EMAIL, SLACK or WEBHOOK
    pub channel_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Recipients for email, `webhook_url` for Slack, `url`/`method`/`headers` for webhooks
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub channel_type: Option<String>,
    pub enabled: Option<bool>,
    /// Replaces the whole config object
    #[schema(value_type = Option<Object>)]
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListChannelsParams {
    /// EMAIL, SLACK or WEBHOOK
    #[param(required = false)]
    channel_type: Option<String>,
    #[param(required = false)]
    enabled: Option<bool>,
    /// Owning rule id
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

/// Create a notification channel for a rule.
#[utoipa::path(
    post,
    path = "/v1/channels",
    tag = "Channels",
    request_body = CreateChannelRequest,
    responses(
        (status = 201, description = "Channel created", body = ChannelResponse),
        (status = 400, description = "Invalid channel", body = ApiError),
        (status = 404, description = "Rule not found", body = ApiError)
    )
)]
async fn create_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> impl IntoResponse {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return bad_request(&trace_id, "Channel name is required");
    }
    let channel_type: ChannelType = match req.channel_type.trim().parse() {
        Ok(t) => t,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    if let Err(msg) = validate_config(channel_type, &req.config) {
        return bad_request(&trace_id, &msg);
    }
    if let Err(resp) = load_rule(&state, &trace_id, &req.rule_id) {
        return resp;
    }

    let now = Utc::now();
    let channel = NotificationChannel {
        id: sentinel_common::id::next_id(),
        rule_id: req.rule_id,
        name,
        channel_type,
        enabled: req.enabled,
        config: req.config,
        success_count: 0,
        failure_count: 0,
        last_success_at: None,
        last_failure_at: None,
        created_at: now,
        updated_at: now,
    };
    match state.store.insert_channel(&channel) {
        Ok(()) => {
            tracing::info!(
                channel_id = %channel.id,
                rule_id = %channel.rule_id,
                channel_type = %channel.channel_type,
                "Notification channel created"
            );
            success_response(StatusCode::CREATED, &trace_id, ChannelResponse::from(channel))
        }
        // The rule vanished between the lookup and the insert.
        Err(sentinel_storage::error::StorageError::ForeignKey { .. }) => {
            not_found(&trace_id, "Alert rule not found")
        }
        Err(e) => storage_error_response(&trace_id, &e, "create notification channel"),
    }
}

/// List notification channels, newest first.
#[utoipa::path(
    get,
    path = "/v1/channels",
    tag = "Channels",
    params(ListChannelsParams),
    responses(
        (status = 200, description = "Paginated channels", body = Vec<ChannelResponse>),
        (status = 400, description = "Unknown channel type", body = ApiError)
    )
)]
async fn list_channels(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListChannelsParams>,
) -> impl IntoResponse {
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let channel_type = match params.channel_type.as_deref().map(str::parse::<ChannelType>).transpose() {
        Ok(t) => t,
        Err(msg) => return bad_request(&trace_id, &msg),
    };
    let filter = ChannelFilter {
        channel_type,
        enabled: params.enabled,
        rule_id: params.rule_id,
    };

    let total = match state.store.count_channels(&filter) {
        Ok(c) => c,
        Err(e) => return storage_error_response(&trace_id, &e, "count notification channels"),
    };
    match state.store.list_channels(&filter, limit, offset) {
        Ok(channels) => {
            let items: Vec<ChannelResponse> = channels.into_iter().map(ChannelResponse::from).collect();
            success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset)
        }
        Err(e) => storage_error_response(&trace_id, &e, "list notification channels"),
    }
}

/// Get one notification channel.
#[utoipa::path(
    get,
    path = "/v1/channels/{id}",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    responses(
        (status = 200, description = "Channel", body = ChannelResponse),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn get_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_channel(&state, &trace_id, &id) {
        Ok(channel) => success_response(StatusCode::OK, &trace_id, ChannelResponse::from(channel)),
        Err(resp) => resp,
    }
}

/// Update a notification channel. Delivery counters are kept.
#[utoipa::path(
    put,
    path = "/v1/channels/{id}",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    request_body = UpdateChannelRequest,
    responses(
        (status = 200, description = "Updated channel", body = ChannelResponse),
        (status = 400, description = "Invalid field", body = ApiError),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn update_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateChannelRequest>,
) -> impl IntoResponse {
    let mut channel = match load_channel(&state, &trace_id, &id) {
        Ok(channel) => channel,
        Err(resp) => return resp,
    };
    if let Some(name) = req.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return bad_request(&trace_id, "Channel name must not be empty");
        }
        channel.name = name;
    }
    if let Some(raw) = req.channel_type {
        match raw.trim().parse() {
            Ok(t) => channel.channel_type = t,
            Err(msg) => return bad_request(&trace_id, &msg),
        }
    }
    if let Some(enabled) = req.enabled {
        channel.enabled = enabled;
    }
    if let Some(config) = req.config {
        channel.config = config;
    }
    if let Err(msg) = validate_config(channel.channel_type, &channel.config) {
        return bad_request(&trace_id, &msg);
    }
    channel.updated_at = Utc::now();

    match state.store.update_channel(&channel) {
        Ok(true) => success_response(StatusCode::OK, &trace_id, ChannelResponse::from(channel)),
        Ok(false) => not_found(&trace_id, &format!("Notification channel '{id}' not found")),
        Err(e) => storage_error_response(&trace_id, &e, "update notification channel"),
    }
}

/// Delete a notification channel.
#[utoipa::path(
    delete,
    path = "/v1/channels/{id}",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    responses(
        (status = 200, description = "Channel deleted"),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn delete_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_channel(&id) {
        Ok(true) => {
            tracing::info!(channel_id = %id, "Notification channel deleted");
            success_empty_response(StatusCode::OK, &trace_id, "Notification channel deleted")
        }
        Ok(false) => not_found(&trace_id, &format!("Notification channel '{id}' not found")),
        Err(e) => storage_error_response(&trace_id, &e, "delete notification channel"),
    }
}

fn set_channel_enabled(state: &AppState, trace_id: &str, id: &str, enabled: bool) -> Response {
    match state.store.set_channel_enabled(id, enabled, Utc::now()) {
        Ok(true) => match load_channel(state, trace_id, id) {
            Ok(channel) => success_response(StatusCode::OK, trace_id, ChannelResponse::from(channel)),
            Err(resp) => resp,
        },
        Ok(false) => not_found(trace_id, &format!("Notification channel '{id}' not found")),
        Err(e) => storage_error_response(trace_id, &e, "toggle notification channel"),
    }
}

/// Enable a notification channel.
#[utoipa::path(
    post,
    path = "/v1/channels/{id}/enable",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    responses(
        (status = 200, description = "Channel enabled", body = ChannelResponse),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn enable_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_channel_enabled(&state, &trace_id, &id, true)
}

/// Disable a notification channel.
#[utoipa::path(
    post,
    path = "/v1/channels/{id}/disable",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    responses(
        (status = 200, description = "Channel disabled", body = ChannelResponse),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn disable_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_channel_enabled(&state, &trace_id, &id, false)
}

/// Send a synthetic test alert through one channel. Works on disabled
/// channels too and never changes delivery counters.
#[utoipa::path(
    post,
    path = "/v1/channels/{id}/test",
    tag = "Channels",
    params(("id" = String, Path, description = "Channel id")),
    responses(
        (status = 200, description = "Delivery outcome", body = ChannelOutcome),
        (status = 404, description = "Channel not found", body = ApiError)
    )
)]
async fn test_channel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let channel = match load_channel(&state, &trace_id, &id) {
        Ok(channel) => channel,
        Err(resp) => return resp,
    };
    let rule = match load_rule(&state, &trace_id, &channel.rule_id) {
        Ok(rule) => rule,
        Err(resp) => return resp,
    };
    let outcome = state.dispatcher.test_channel(&channel, &rule).await;
    tracing::info!(
        channel_id = %id,
        success = outcome.success,
        "Channel test finished"
    );
    success_response(StatusCode::OK, &trace_id, outcome)
}

pub fn channel_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_channel, list_channels))
        .routes(routes!(get_channel, update_channel, delete_channel))
        .routes(routes!(enable_channel))
        .routes(routes!(disable_channel))
        .routes(routes!(test_channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_must_be_an_object() {
        assert!(validate_config(ChannelType::Email, &json!(["a@b.c"])).is_err());
        assert!(validate_config(ChannelType::Email, &json!({"recipients": []})).is_ok());
    }

    #[test]
    fn webhook_method_is_checked_but_url_is_not() {
        assert!(validate_config(ChannelType::Webhook, &json!({})).is_ok());
        assert!(validate_config(ChannelType::Webhook, &json!({"method": "patch"})).is_ok());
        let err = validate_config(ChannelType::Webhook, &json!({"method": "DELETE"}))
            .expect_err("DELETE is not allowed");
        assert!(err.contains("DELETE"));
        assert!(validate_config(ChannelType::Slack, &json!({"method": "DELETE"})).is_ok());
    }

    #[test]
    fn response_masks_secrets() {
        let now = Utc::now();
        let channel = NotificationChannel {
            id: "1".to_string(),
            rule_id: "r".to_string(),
            name: "hook".to_string(),
            channel_type: ChannelType::Webhook,
            enabled: true,
            config: json!({"url": "http://x", "headers": {"Authorization": "Bearer abc"}}),
            success_count: 0,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        };
        let resp = ChannelResponse::from(channel);
        assert_eq!(resp.config["headers"]["Authorization"], "***");
        assert_eq!(resp.config["url"], "http://x");
    }
}
