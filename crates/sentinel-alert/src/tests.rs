use crate::builder::{alert_from_anomaly, manual_alert, ManualAlert};
use crate::engine::{evaluate, matches, matching_rules};
use crate::lifecycle::{acknowledge, mark_false_positive, resolve, TransitionError};
use crate::rate_limit::{
    AlertHistory, CooldownStore, InMemoryCooldownStore, RateLimitConfig, RateLimiter,
};
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sentinel_common::types::{
    AlertRule, AlertStatus, AnomalyDetection, RuleType, Severity,
};
use std::sync::{Arc, Mutex};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn make_rule(id: &str) -> AlertRule {
    AlertRule {
        id: id.into(),
        name: format!("rule {id}"),
        description: None,
        rule_type: RuleType::AnomalyDetection,
        severity: Severity::High,
        enabled: true,
        conditions: None,
        anomaly_threshold: Some(0.8),
        time_window_minutes: Some(60),
        threshold: None,
        service_name: None,
        log_level: None,
        cooldown_minutes: 15,
        notify_on_recovery: false,
        created_by: None,
        trigger_count: 0,
        last_triggered_at: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

fn make_anomaly(confidence: f64, service: Option<&str>) -> AnomalyDetection {
    AnomalyDetection {
        log_id: "log-42".into(),
        is_anomaly: true,
        anomaly_score: 0.9,
        confidence,
        model_version: Some("v1".into()),
        features: None,
        detected_at: t0(),
        level: Some("ERROR".into()),
        message: Some("connection reset".into()),
        service: service.map(str::to_string),
        log_timestamp: None,
    }
}

// ---- rule matching ----

#[test]
fn rule_without_service_filter_matches_confident_anomaly() {
    let rule = make_rule("r1");
    let anomaly = make_anomaly(0.95, Some("payments"));
    assert!(matches(&rule, &anomaly));
}

#[test]
fn anomaly_below_threshold_does_not_match() {
    let rule = make_rule("r1");
    let anomaly = make_anomaly(0.5, None);
    assert!(!matches(&rule, &anomaly));
}

#[test]
fn service_filter_rejects_other_service() {
    let mut rule = make_rule("r1");
    rule.service_name = Some("payments".into());
    let anomaly = make_anomaly(0.99, Some("orders"));
    assert!(!matches(&rule, &anomaly));
}

#[test]
fn service_filter_is_case_sensitive() {
    let mut rule = make_rule("r1");
    rule.service_name = Some("payments".into());
    assert!(!matches(&rule, &make_anomaly(0.99, Some("Payments"))));
    assert!(matches(&rule, &make_anomaly(0.99, Some("payments"))));
}

#[test]
fn level_filter_requires_equal_level() {
    let mut rule = make_rule("r1");
    rule.log_level = Some("WARN".into());
    let mut anomaly = make_anomaly(0.99, None);
    assert!(!matches(&rule, &anomaly));
    anomaly.level = Some("WARN".into());
    assert!(matches(&rule, &anomaly));
}

#[test]
fn missing_threshold_always_passes_confidence() {
    let mut rule = make_rule("r1");
    rule.anomaly_threshold = None;
    assert!(matches(&rule, &make_anomaly(0.01, None)));
}

#[test]
fn disabled_rule_or_unflagged_record_never_matches() {
    let mut rule = make_rule("r1");
    let mut anomaly = make_anomaly(0.99, None);
    anomaly.is_anomaly = false;
    assert!(!matches(&rule, &anomaly));

    anomaly.is_anomaly = true;
    rule.enabled = false;
    assert!(!matches(&rule, &anomaly));
}

#[test]
fn verdict_ignores_unrelated_fields() {
    let rule = make_rule("r1");
    let anomaly = make_anomaly(0.9, Some("payments"));
    let baseline = matches(&rule, &anomaly);

    let mut other_rule = rule.clone();
    other_rule.name = "renamed".into();
    other_rule.severity = Severity::Info;
    other_rule.cooldown_minutes = 0;
    other_rule.trigger_count = 99;
    other_rule.threshold = Some(5);
    other_rule.notify_on_recovery = true;

    let mut other_anomaly = anomaly.clone();
    other_anomaly.log_id = "another".into();
    other_anomaly.anomaly_score = 0.0;
    other_anomaly.message = None;
    other_anomaly.model_version = None;
    other_anomaly.detected_at = t0() - Duration::days(3);

    assert_eq!(matches(&other_rule, &other_anomaly), baseline);
}

#[test]
fn matching_rules_skips_other_rule_types_and_returns_all_matches() {
    let a = make_rule("a");
    let b = make_rule("b");
    let mut threshold = make_rule("c");
    threshold.rule_type = RuleType::Threshold;
    let rules = vec![a, b, threshold];

    let matched = matching_rules(&rules, &make_anomaly(0.95, None));
    let ids: Vec<&str> = matched.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn dry_run_explains_each_check() {
    let mut rule = make_rule("r1");
    rule.service_name = Some("payments".into());
    let evaluation = evaluate(&rule, &make_anomaly(0.95, Some("orders")));

    assert!(!evaluation.triggered);
    assert_eq!(evaluation.anomaly_id, "log-42");
    assert!(evaluation
        .details
        .contains(&"Confidence check: 0.95 >= 0.80 = true".to_string()));
    assert!(evaluation
        .details
        .contains(&"Service check: orders == payments = false".to_string()));
}

#[test]
fn dry_run_never_triggers_for_non_anomaly_rules() {
    let mut rule = make_rule("r1");
    rule.rule_type = RuleType::ErrorRate;
    let evaluation = evaluate(&rule, &make_anomaly(0.95, None));
    assert!(!evaluation.triggered);
    assert!(evaluation.details.iter().any(|d| d.starts_with("Rule type")));
}

// ---- rate limiter ----

#[derive(Default)]
struct RecordedAlerts {
    created: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl RecordedAlerts {
    fn record(&self, rule_id: &str, at: DateTime<Utc>) {
        self.created.lock().unwrap().push((rule_id.to_string(), at));
    }
}

impl AlertHistory for RecordedAlerts {
    fn count_alerts_since(&self, rule_id: &str, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .created
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, at)| id == rule_id && *at >= since)
            .count() as u64)
    }
}

struct FailingHistory;

impl AlertHistory for FailingHistory {
    fn count_alerts_since(&self, _rule_id: &str, _since: DateTime<Utc>) -> Result<u64> {
        anyhow::bail!("database is locked")
    }
}

fn limiter(max: u64, history: Arc<dyn AlertHistory>) -> RateLimiter {
    RateLimiter::new(
        RateLimitConfig {
            enabled: true,
            max_alerts_per_rule: max,
            time_window_minutes: 60,
            cooldown_minutes: 15,
        },
        Arc::new(InMemoryCooldownStore::new()),
        history,
    )
}

// Mirrors the firing path: an allowed attempt creates an alert.
fn attempt(limiter: &RateLimiter, history: &RecordedAlerts, at: DateTime<Utc>) -> bool {
    let allowed = limiter.allow_at("r1", at);
    if allowed {
        history.record("r1", at);
    }
    allowed
}

#[test]
fn limiter_denies_third_alert_and_recovers_after_cooldown() {
    let history = Arc::new(RecordedAlerts::default());
    let limiter = limiter(2, history.clone());

    assert!(attempt(&limiter, &history, t0()));
    assert!(attempt(&limiter, &history, t0() + Duration::seconds(20)));
    assert!(!attempt(&limiter, &history, t0() + Duration::seconds(40)));

    let status = limiter.cooldown_status("r1", t0() + Duration::minutes(1));
    assert!(status.in_cooldown);

    assert!(!attempt(&limiter, &history, t0() + Duration::minutes(5)));
    assert!(attempt(&limiter, &history, t0() + Duration::minutes(16)));
}

#[test]
fn limiter_stays_denied_for_the_whole_cooldown() {
    let history = Arc::new(RecordedAlerts::default());
    let limiter = limiter(1, history.clone());
    assert!(attempt(&limiter, &history, t0()));
    assert!(!attempt(&limiter, &history, t0() + Duration::seconds(1)));

    for minute in 1..15 {
        assert!(
            !attempt(&limiter, &history, t0() + Duration::minutes(minute)),
            "minute {minute} should still be in cooldown"
        );
    }
}

#[test]
fn limiter_tracks_rules_independently() {
    let history = Arc::new(RecordedAlerts::default());
    let limiter = limiter(1, history.clone());
    history.record("r1", t0());
    assert!(!limiter.allow_at("r1", t0()));
    assert!(limiter.allow_at("r2", t0()));
}

#[test]
fn cleared_cooldown_allows_once_count_drops() {
    let history = Arc::new(RecordedAlerts::default());
    let limiter = limiter(1, history.clone());
    history.record("r1", t0());
    assert!(!limiter.allow_at("r1", t0() + Duration::minutes(1)));

    limiter.clear_cooldown("r1");
    assert!(!limiter.cooldown_status("r1", t0()).in_cooldown);
    // history still counts the earlier alert inside the window
    assert!(!limiter.allow_at("r1", t0() + Duration::minutes(2)));
    limiter.clear_cooldown("r1");
    assert!(limiter.allow_at("r1", t0() + Duration::minutes(61)));
}

#[test]
fn disabled_limiter_always_allows() {
    let history = Arc::new(RecordedAlerts::default());
    let limiter = RateLimiter::new(
        RateLimitConfig {
            enabled: false,
            max_alerts_per_rule: 0,
            ..Default::default()
        },
        Arc::new(InMemoryCooldownStore::new()),
        history,
    );
    assert!(limiter.allow_at("r1", t0()));
}

#[test]
fn limiter_allows_when_history_is_unavailable() {
    let limiter = limiter(1, Arc::new(FailingHistory));
    assert!(limiter.allow_at("r1", t0()));
    assert!(limiter.alert_count("r1", t0()).is_err());
}

#[test]
fn in_memory_store_set_get_clear() {
    let store = InMemoryCooldownStore::new();
    assert!(store.get("r1").is_none());
    store.set(
        "r1",
        crate::rate_limit::Cooldown {
            started_at: t0(),
            until: t0() + Duration::minutes(15),
        },
    );
    assert_eq!(store.get("r1").map(|c| c.until), Some(t0() + Duration::minutes(15)));
    store.clear("r1");
    assert!(store.get("r1").is_none());
}

#[test]
fn default_config_matches_documented_limits() {
    let config = RateLimitConfig::default();
    assert!(config.enabled);
    assert_eq!(config.max_alerts_per_rule, 10);
    assert_eq!(config.time_window_minutes, 60);
    assert_eq!(config.cooldown_minutes, 15);
}

// ---- alert building ----

#[test]
fn alert_from_anomaly_copies_rule_severity_and_log_id() {
    sentinel_common::id::init(1, 1);
    let rule = make_rule("r1");
    let alert = alert_from_anomaly(&rule, &make_anomaly(0.9512, Some("payments")), t0());

    assert_eq!(alert.status, AlertStatus::Open);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.title, "Anomaly Detected: rule r1 - payments");
    assert_eq!(alert.anomaly_detection_id.as_deref(), Some("log-42"));
    assert_eq!(alert.log_id.as_deref(), Some("log-42"));
    assert!(!alert.notification_sent);

    let description = alert.description.unwrap();
    assert!(description.contains("Confidence: 95.12%"));
    assert!(description.contains("Log Message: connection reset"));
    assert!(description.contains("Log Level: ERROR"));
}

#[test]
fn alert_title_falls_back_to_unknown_service() {
    let alert = alert_from_anomaly(&make_rule("r1"), &make_anomaly(0.9, None), t0());
    assert!(alert.title.ends_with("Unknown Service"));
}

#[test]
fn manual_alert_has_no_anomaly_reference() {
    let rule = make_rule("r1");
    let alert = manual_alert(
        &rule,
        ManualAlert {
            title: "disk full".into(),
            severity: Some(Severity::Critical),
            ..Default::default()
        },
        t0(),
    );
    assert_eq!(alert.severity, Severity::Critical);
    assert!(alert.anomaly_detection_id.is_none());
}

// ---- lifecycle ----

#[test]
fn acknowledge_then_resolve_then_reacknowledge_fails() {
    let mut alert = alert_from_anomaly(&make_rule("r1"), &make_anomaly(0.9, None), t0());

    acknowledge(&mut alert, "alice", t0() + Duration::minutes(1)).unwrap();
    resolve(&mut alert, "bob", Some("fixed"), t0() + Duration::minutes(2)).unwrap();

    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_eq!(alert.acknowledged_by.as_deref(), Some("alice"));
    assert_eq!(alert.resolved_by.as_deref(), Some("bob"));
    assert_eq!(alert.resolution_notes.as_deref(), Some("fixed"));

    let err = acknowledge(&mut alert, "carol", t0() + Duration::minutes(3)).unwrap_err();
    assert!(matches!(err, TransitionError::NotOpen { .. }));
    assert_eq!(alert.acknowledged_by.as_deref(), Some("alice"));
}

#[test]
fn resolve_twice_is_rejected() {
    let mut alert = alert_from_anomaly(&make_rule("r1"), &make_anomaly(0.9, None), t0());
    resolve(&mut alert, "bob", None, t0()).unwrap();
    let err = resolve(&mut alert, "bob", None, t0()).unwrap_err();
    assert_eq!(err.to_string(), format!("Alert {} is already resolved", alert.id));
}

#[test]
fn false_positive_is_terminal() {
    let mut alert = alert_from_anomaly(&make_rule("r1"), &make_anomaly(0.9, None), t0());
    acknowledge(&mut alert, "alice", t0()).unwrap();
    mark_false_positive(&mut alert, "dave", t0()).unwrap();

    assert_eq!(alert.status, AlertStatus::FalsePositive);
    assert_eq!(alert.resolved_by.as_deref(), Some("dave"));
    assert!(acknowledge(&mut alert, "x", t0()).is_err());
    assert!(resolve(&mut alert, "x", None, t0()).is_err());
    assert!(mark_false_positive(&mut alert, "x", t0()).is_err());
}

#[test]
fn transition_timestamps_never_precede_creation() {
    let mut alert = alert_from_anomaly(&make_rule("r1"), &make_anomaly(0.9, None), t0());
    let skewed = t0() - Duration::minutes(10);
    acknowledge(&mut alert, "alice", skewed).unwrap();
    resolve(&mut alert, "bob", None, skewed).unwrap();
    assert!(alert.acknowledged_at.unwrap() >= alert.created_at);
    assert!(alert.resolved_at.unwrap() >= alert.created_at);
}
