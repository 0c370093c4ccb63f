mod common;

use axum::http::StatusCode;
use common::{
    anomaly, assert_err_envelope, assert_ok_envelope, build_test_context, create_channel,
    create_named_rule, create_rule, request_json, request_no_body, wait_until,
};
use serde_json::json;

// Nothing listens here, so webhook deliveries fail fast.
const DEAD_WEBHOOK: &str = "http://127.0.0.1:9/hook";

#[tokio::test]
async fn health_should_return_ok_envelope() {
    let ctx = build_test_context().expect("test context should build");
    let (status, body, trace) = request_no_body(&ctx.app, "GET", "/v1/monitoring/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["status"], "UP");
    assert_eq!(body["data"]["database"], "UP");
    assert!(body["data"]["version"].is_string());
    assert_eq!(body["data"]["total_alerts"], 0);
    assert_eq!(trace.as_deref(), body["trace_id"].as_str());
}

#[tokio::test]
async fn caller_trace_id_should_be_echoed() {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    let ctx = build_test_context().expect("test context should build");
    let req = Request::builder()
        .method("GET")
        .uri("/v1/alerts/999")
        .header("X-Trace-Id", "upstream-trace-01")
        .body(Body::empty())
        .expect("request should build");
    let resp = ctx.app.clone().oneshot(req).await.expect("request should be handled");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.headers().get("x-trace-id").and_then(|h| h.to_str().ok()),
        Some("upstream-trace-01")
    );
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body should read");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["trace_id"], "upstream-trace-01");
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn rule_endpoints_should_cover_validation_and_crud_paths() {
    let ctx = build_test_context().expect("test context should build");

    let id = create_rule(
        &ctx.app,
        json!({
            "name": "Payments anomalies",
            "rule_type": "anomaly_detection",
            "severity": "high",
            "anomaly_threshold": 0.8,
            "service_name": "payments"
        }),
    )
    .await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alert-rules",
        Some(json!({"name":"Payments anomalies","rule_type":"ANOMALY_DETECTION","severity":"HIGH"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    for bad in [
        json!({"name":" ","rule_type":"ANOMALY_DETECTION","severity":"HIGH"}),
        json!({"name":"x","rule_type":"ANOMALY_DETECTION","severity":"HIGH","anomaly_threshold":1.2}),
        json!({"name":"x","rule_type":"ANOMALY_DETECTION","severity":"HIGH","cooldown_minutes":-1}),
        json!({"name":"x","rule_type":"ANOMALY_DETECTION","severity":"SEVERE"}),
        json!({"name":"x","rule_type":"MAGIC","severity":"HIGH"}),
    ] {
        let (status, body, _) = request_json(&ctx.app, "POST", "/v1/alert-rules", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_err_envelope(&body, 1001);
    }

    let (status, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alert-rules/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["rule_type"], "ANOMALY_DETECTION");
    assert_eq!(body["data"]["severity"], "HIGH");
    assert_eq!(body["data"]["cooldown_minutes"], 15);
    assert_eq!(body["data"]["trigger_count"], 0);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/alert-rules?service_name=payments&enabled=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 20);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alert-rules?severity=LOW").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        &format!("/v1/alert-rules/{id}"),
        Some(json!({"severity":"CRITICAL","service_name":""})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["severity"], "CRITICAL");
    assert!(body["data"]["service_name"].is_null());
    assert_eq!(body["data"]["anomaly_threshold"], 0.8);

    let (status, body, _) =
        request_no_body(&ctx.app, "POST", &format!("/v1/alert-rules/{id}/disable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    let (status, body, _) = request_no_body(&ctx.app, "POST", &format!("/v1/alert-rules/{id}/enable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/alert-rules/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (status, _, _) = request_no_body(&ctx.app, "DELETE", &format!("/v1/alert-rules/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body, _) = request_no_body(&ctx.app, "DELETE", &format!("/v1/alert-rules/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn rule_test_should_dry_run_without_side_effects() {
    let ctx = build_test_context().expect("test context should build");
    let id = create_rule(
        &ctx.app,
        json!({"name":"Orders","rule_type":"ANOMALY_DETECTION","severity":"MEDIUM",
               "anomaly_threshold":0.8,"service_name":"orders"}),
    )
    .await;

    // No body: synthetic anomaly built from the rule's own filters.
    let (status, body, _) = request_no_body(&ctx.app, "POST", &format!("/v1/alert-rules/{id}/test")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["triggered"], true);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alert-rules/{id}/test"),
        Some(json!({"confidence":0.5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["triggered"], false);
    assert!(body["data"]["details"].as_array().is_some_and(|d| !d.is_empty()));

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alert-rules/{id}/test"),
        Some(json!({"service":"payments","confidence":0.99})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["triggered"], false);

    let (_, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alert-rules/{id}")).await;
    assert_eq!(body["data"]["trigger_count"], 0);
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts").await;
    assert_eq!(body["data"]["total"], 0);

    let (status, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alert-rules/{id}/cooldown")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["in_cooldown"], false);
    assert_eq!(body["data"]["alert_count"], 0);
    assert_eq!(body["data"]["max_alerts_per_rule"], 10);

    let (status, _, _) = request_no_body(&ctx.app, "DELETE", &format!("/v1/alert-rules/{id}/cooldown")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn channel_endpoints_should_cover_validation_redaction_and_crud_paths() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Channel owner").await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/channels",
        Some(json!({"rule_id":"missing","name":"x","channel_type":"SLACK","config":{}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/channels",
        Some(json!({"rule_id":rule_id,"name":"hook","channel_type":"WEBHOOK",
                    "config":{"url":DEAD_WEBHOOK,"method":"DELETE"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/channels",
        Some(json!({"rule_id":rule_id,"name":"pager","channel_type":"PAGER","config":{}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/channels",
        Some(json!({"rule_id":rule_id,"name":"hook","channel_type":"webhook",
                    "config":{"url":DEAD_WEBHOOK,"method":"put",
                              "headers":{"Authorization":"Bearer secret-token","X-Team":"ops"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["channel_type"], "WEBHOOK");
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(body["data"]["config"]["headers"]["X-Team"], "ops");
    assert_ne!(body["data"]["config"]["headers"]["Authorization"], "Bearer secret-token");
    let hook_id = body["data"]["id"].as_str().expect("id").to_string();

    // Stored config keeps the real secret.
    let stored = ctx
        .state
        .store
        .get_channel(&hook_id)
        .expect("lookup")
        .expect("channel exists");
    assert_eq!(stored.config["headers"]["Authorization"], "Bearer secret-token");

    let email_id = create_channel(
        &ctx.app,
        json!({"rule_id":rule_id,"name":"mail","channel_type":"EMAIL","enabled":false,
               "config":{"recipients":"ops@example.com"}}),
    )
    .await;

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", &format!("/v1/channels?rule_id={rule_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/channels?enabled=true").await;
    assert_eq!(body["data"]["total"], 1);
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/channels?channel_type=EMAIL").await;
    assert_eq!(body["data"]["items"][0]["id"], email_id.as_str());

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        &format!("/v1/channels/{email_id}"),
        Some(json!({"name":"mail-ops","config":{"recipients":["a@example.com","b@example.com"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "mail-ops");
    assert_eq!(body["data"]["enabled"], false);

    let (status, body, _) =
        request_no_body(&ctx.app, "POST", &format!("/v1/channels/{email_id}/enable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);
    let (status, body, _) =
        request_no_body(&ctx.app, "POST", &format!("/v1/channels/{hook_id}/disable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);

    // Test sends ignore the enabled flag and never touch counters.
    let (status, body, _) = request_no_body(&ctx.app, "POST", &format!("/v1/channels/{hook_id}/test")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], false);
    assert!(body["data"]["error"].is_string());
    let (_, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/channels/{hook_id}")).await;
    assert_eq!(body["data"]["failure_count"], 0);

    let (status, _, _) = request_no_body(&ctx.app, "DELETE", &format!("/v1/channels/{hook_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/channels/{hook_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn alert_lifecycle_should_enforce_transitions() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Lifecycle").await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts",
        Some(json!({"rule_id":rule_id,"title":"Checkout latency","service":"checkout"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "OPEN");
    assert_eq!(body["data"]["severity"], "HIGH");
    assert!(body["data"]["anomaly_detection_id"].is_null());
    let id = body["data"]["id"].as_str().expect("id").to_string();

    let (_, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alert-rules/{rule_id}")).await;
    assert_eq!(body["data"]["trigger_count"], 1);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{id}/acknowledge"),
        Some(json!({"acknowledged_by":"  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{id}/acknowledge"),
        Some(json!({"acknowledged_by":"alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ACKNOWLEDGED");
    assert_eq!(body["data"]["acknowledged_by"], "alice");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{id}/resolve"),
        Some(json!({"resolved_by":"bob","resolution_notes":"fixed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "RESOLVED");
    assert_eq!(body["data"]["resolved_by"], "bob");
    assert_eq!(body["data"]["resolution_notes"], "fixed");

    for (path, payload) in [
        ("acknowledge", json!({"acknowledged_by":"carol"})),
        ("resolve", json!({"resolved_by":"carol"})),
        ("false-positive", json!({"resolved_by":"carol"})),
    ] {
        let (status, body, _) =
            request_json(&ctx.app, "POST", &format!("/v1/alerts/{id}/{path}"), Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT, "{path} on a resolved alert");
        assert_err_envelope(&body, 1005);
    }

    let (_, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alerts/{id}")).await;
    assert_eq!(body["data"]["status"], "RESOLVED");
    assert_eq!(body["data"]["acknowledged_by"], "alice");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts",
        Some(json!({"rule_id":rule_id,"title":"Noise","severity":"LOW"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let noise = body["data"]["id"].as_str().expect("id").to_string();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{noise}/false-positive"),
        Some(json!({"resolved_by":"dave"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "FALSE_POSITIVE");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/missing/acknowledge",
        Some(json!({"acknowledged_by":"alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts",
        Some(json!({"rule_id":"missing","title":"x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);

    // Rules that produced alerts cannot be deleted.
    let (status, body, _) = request_no_body(&ctx.app, "DELETE", &format!("/v1/alert-rules/{rule_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);
}

#[tokio::test]
async fn alert_queries_should_filter_and_count() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Queries").await;

    for (title, severity, service) in [
        ("a", "CRITICAL", "payments"),
        ("b", "HIGH", "payments"),
        ("c", "HIGH", "orders"),
    ] {
        let (status, _, _) = request_json(
            &ctx.app,
            "POST",
            "/v1/alerts",
            Some(json!({"rule_id":rule_id,"title":title,"severity":severity,"service":service})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts?service=payments&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(1));

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts?severity=high").await;
    assert_eq!(body["data"]["total"], 2);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts?status=CLOSED").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts/recent?minutes=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["by_status"]["OPEN"], 3);
    assert_eq!(body["data"]["by_status"]["RESOLVED"], 0);
    assert_eq!(body["data"]["by_severity"]["HIGH"], 2);
    assert_eq!(body["data"]["by_severity"]["INFO"], 0);
}

#[tokio::test]
async fn retry_notifications_should_stop_at_the_retry_limit() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Retry").await;
    create_channel(
        &ctx.app,
        json!({"rule_id":rule_id,"name":"dead","channel_type":"WEBHOOK","config":{"url":DEAD_WEBHOOK}}),
    )
    .await;

    let (_, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts",
        Some(json!({"rule_id":rule_id,"title":"Needs delivery"})),
    )
    .await;
    let id = body["data"]["id"].as_str().expect("id").to_string();

    // The creation dispatch fails once in the background.
    let store = ctx.state.store.clone();
    let first_failure = wait_until(|| {
        store
            .get_alert(&id)
            .ok()
            .flatten()
            .is_some_and(|a| a.notification_failure_count == 1)
    })
    .await;
    assert!(first_failure);

    for expected in [2, 3] {
        let (status, body, _) =
            request_no_body(&ctx.app, "POST", &format!("/v1/alerts/{id}/retry-notifications")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["retried"], true);
        assert_eq!(body["data"]["report"]["failed"], 1);
        assert_eq!(body["data"]["report"]["notification_sent"], false);
        let (_, alert, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alerts/{id}")).await;
        assert_eq!(alert["data"]["notification_failure_count"], expected);
        assert!(alert["data"]["last_notification_error"].is_string());
    }

    let (status, body, _) =
        request_no_body(&ctx.app, "POST", &format!("/v1/alerts/{id}/retry-notifications")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/channels/statistics").await;
    let webhook = body["data"]["by_type"]
        .as_array()
        .and_then(|types| types.iter().find(|t| t["channel_type"] == "WEBHOOK"))
        .cloned()
        .expect("webhook stats");
    assert_eq!(webhook["failure_count"], 3);
}

#[tokio::test]
async fn monitoring_endpoints_should_report_counts() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Stats").await;
    create_channel(
        &ctx.app,
        json!({"rule_id":rule_id,"name":"mail","channel_type":"EMAIL","enabled":false,"config":{}}),
    )
    .await;
    request_json(
        &ctx.app,
        "POST",
        "/v1/alerts",
        Some(json!({"rule_id":rule_id,"title":"One","severity":"CRITICAL"})),
    )
    .await;

    let now = chrono::Utc::now();
    ctx.state
        .store
        .insert_anomaly(&anomaly("log-high", "payments", 0.95, now))
        .expect("insert anomaly");
    ctx.state
        .store
        .insert_anomaly(&anomaly("log-low", "payments", 0.4, now - chrono::Duration::hours(30)))
        .expect("insert anomaly");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["time_range_hours"], 168);
    assert_eq!(body["data"]["total_alerts"], 1);
    assert_eq!(body["data"]["recent_alerts"], 1);
    assert_eq!(body["data"]["total_anomalies"], 2);
    assert_eq!(body["data"]["total_alert_rules"], 1);
    assert_eq!(body["data"]["total_notification_channels"], 1);
    assert_eq!(body["data"]["enabled_notification_channels"], 0);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/alerts/by-status").await;
    assert_eq!(body["data"]["OPEN"], 1);
    assert_eq!(body["data"]["FALSE_POSITIVE"], 0);
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/alerts/by-severity").await;
    assert_eq!(body["data"]["CRITICAL"], 1);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/alerts/trend").await;
    let buckets = body["data"]["hourly_counts"].as_array().expect("buckets");
    assert_eq!(buckets.len(), 24);
    assert_eq!(buckets.iter().filter_map(|b| b["count"].as_u64()).sum::<u64>(), 1);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/anomalies/metrics").await;
    assert_eq!(body["data"]["period_hours"], 24);
    assert_eq!(body["data"]["total_anomalies"], 1);
    assert_eq!(body["data"]["high_confidence_anomalies"], 1);
    assert_eq!(body["data"]["unprocessed_anomalies"], 2);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/anomalies/metrics?hours=48").await;
    assert_eq!(body["data"]["total_anomalies"], 2);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/rules/statistics").await;
    assert_eq!(body["data"]["total_rules"], 1);
    assert_eq!(body["data"]["by_type"]["ANOMALY_DETECTION"], 1);
    assert_eq!(body["data"]["by_type"]["THRESHOLD"], 0);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/channels/statistics").await;
    assert_eq!(body["data"]["total_channels"], 1);
    assert_eq!(body["data"]["by_type"].as_array().map(Vec::len), Some(3));

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/rate-limit").await;
    assert_eq!(body["data"]["max_alerts_per_rule"], 10);
    assert_eq!(body["data"]["cooldown_minutes"], 15);
}

#[tokio::test]
async fn scheduler_endpoints_should_run_checks_and_reset_the_cursor() {
    let ctx = build_test_context().expect("test context should build");
    let rule_id = create_named_rule(&ctx.app, "Scheduler").await;
    let now = chrono::Utc::now();
    ctx.state
        .store
        .insert_anomaly(&anomaly("log-1", "payments", 0.95, now - chrono::Duration::minutes(1)))
        .expect("insert anomaly");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/monitoring/scheduler").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"]["lookback_minutes"], 5);
    assert_eq!(body["data"]["anomalies"]["unprocessed_count"], 1);
    assert_eq!(body["data"]["anomalies"]["time_window"], "5 minutes");

    let (status, body, _) = request_no_body(&ctx.app, "POST", "/v1/monitoring/scheduler/check").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["evaluated"], 1);
    assert_eq!(body["data"]["created"], 1);

    let (_, body, _) = request_no_body(&ctx.app, "GET", &format!("/v1/alerts?rule_id={rule_id}")).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["anomaly_detection_id"], "log-1");

    let (_, body, _) = request_no_body(&ctx.app, "POST", "/v1/monitoring/scheduler/check").await;
    assert_eq!(body["data"]["evaluated"], 0);

    let (status, body, _) = request_no_body(&ctx.app, "POST", "/v1/monitoring/scheduler/reset").await;
    assert_eq!(status, StatusCode::OK);
    let cursor = body["data"]["last_check_time"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .expect("cursor timestamp");
    assert!(cursor.with_timezone(&chrono::Utc) < chrono::Utc::now() - chrono::Duration::minutes(4));
}

#[tokio::test]
async fn openapi_endpoint_should_be_accessible() {
    let ctx = build_test_context().expect("test context should build");
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["openapi"].is_string());
    assert!(body["paths"]["/v1/alerts"].is_object());
}
