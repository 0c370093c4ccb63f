use crate::types::*;
use chrono::Utc;

fn anomaly(is_anomaly: bool, confidence: f64, score: f64) -> AnomalyDetection {
    AnomalyDetection {
        log_id: "log-1".into(),
        is_anomaly,
        anomaly_score: score,
        confidence,
        model_version: None,
        features: None,
        detected_at: Utc::now(),
        level: None,
        message: None,
        service: None,
        log_timestamp: None,
    }
}

#[test]
fn severity_parses_case_insensitively() {
    assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
    assert_eq!("medium".parse::<Severity>().unwrap(), Severity::Medium);
    assert!("warning".parse::<Severity>().is_err());
}

#[test]
fn severity_serializes_uppercase() {
    let json = serde_json::to_string(&Severity::Low).unwrap();
    assert_eq!(json, "\"LOW\"");
}

#[test]
fn alert_status_round_trips_through_display() {
    for status in AlertStatus::ALL {
        let parsed: AlertStatus = status.to_string().parse().unwrap();
        assert_eq!(parsed, status);
    }
    assert_eq!(
        "false-positive".parse::<AlertStatus>().unwrap(),
        AlertStatus::FalsePositive
    );
}

#[test]
fn only_resolved_and_false_positive_are_terminal() {
    assert!(!AlertStatus::Open.is_terminal());
    assert!(!AlertStatus::Acknowledged.is_terminal());
    assert!(AlertStatus::Resolved.is_terminal());
    assert!(AlertStatus::FalsePositive.is_terminal());
}

#[test]
fn rule_type_uses_screaming_snake_case() {
    let json = serde_json::to_string(&RuleType::AnomalyDetection).unwrap();
    assert_eq!(json, "\"ANOMALY_DETECTION\"");
    assert_eq!(
        "pattern_match".parse::<RuleType>().unwrap(),
        RuleType::PatternMatch
    );
}

#[test]
fn channel_type_rejects_unknown_kind() {
    assert_eq!("Slack".parse::<ChannelType>().unwrap(), ChannelType::Slack);
    assert!("sms".parse::<ChannelType>().is_err());
}

#[test]
fn critical_requires_flag_confidence_and_score() {
    assert!(anomaly(true, 0.8, 0.8).is_critical());
    assert!(!anomaly(false, 0.99, 0.99).is_critical());
    assert!(!anomaly(true, 0.79, 0.95).is_critical());
    assert!(!anomaly(true, 0.95, 0.5).is_critical());
}
