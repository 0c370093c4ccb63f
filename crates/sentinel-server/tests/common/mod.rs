#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use sentinel_common::types::AnomalyDetection;
use sentinel_server::app;
use sentinel_server::config::ServerConfig;
use sentinel_server::state::AppState;
use sentinel_storage::AlertStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

/// Defaults with fast, single-attempt senders and no SMTP relay.
pub fn test_config(temp_dir: &TempDir) -> ServerConfig {
    let mut config = ServerConfig {
        data_dir: temp_dir.path().to_string_lossy().to_string(),
        ..ServerConfig::default()
    };
    config.notification.channel_timeout_secs = 5;
    config.notification.slack.timeout_ms = 2000;
    config.notification.webhook.timeout_ms = 2000;
    config.notification.webhook.retry_on_failure = false;
    config
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_| {})
}

pub fn build_test_context_with(customize: impl FnOnce(&mut ServerConfig)) -> Result<TestContext> {
    sentinel_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let mut config = test_config(&temp_dir);
    customize(&mut config);

    let store = Arc::new(AlertStore::new(temp_dir.path())?);
    let state = AppState::new(config, store)?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(req_body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected envelope: {body}");
    assert!(body["trace_id"].as_str().is_some());
}

pub fn assert_err_envelope(body: &Value, err_code: i64) {
    assert_eq!(body["err_code"], err_code, "unexpected envelope: {body}");
    assert!(body["err_msg"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(body["data"].is_null());
}

/// Creates an anomaly-detection rule through the API and returns its id.
pub async fn create_rule(app: &axum::Router, body: Value) -> String {
    let (status, resp, _) = request_json(app, "POST", "/v1/alert-rules", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "rule creation failed: {resp}");
    resp["data"]["id"]
        .as_str()
        .expect("rule id should exist")
        .to_string()
}

pub async fn create_named_rule(app: &axum::Router, name: &str) -> String {
    create_rule(
        app,
        json!({
            "name": name,
            "rule_type": "ANOMALY_DETECTION",
            "severity": "HIGH",
            "anomaly_threshold": 0.8
        }),
    )
    .await
}

pub async fn create_channel(app: &axum::Router, body: Value) -> String {
    let (status, resp, _) = request_json(app, "POST", "/v1/channels", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "channel creation failed: {resp}");
    resp["data"]["id"]
        .as_str()
        .expect("channel id should exist")
        .to_string()
}

pub fn anomaly(log_id: &str, service: &str, confidence: f64, detected_at: DateTime<Utc>) -> AnomalyDetection {
    AnomalyDetection {
        log_id: log_id.to_string(),
        is_anomaly: true,
        anomaly_score: confidence,
        confidence,
        model_version: Some("test-model".to_string()),
        features: None,
        detected_at,
        level: Some("ERROR".to_string()),
        message: Some(format!("{service} failure")),
        service: Some(service.to_string()),
        log_timestamp: Some(detected_at),
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
