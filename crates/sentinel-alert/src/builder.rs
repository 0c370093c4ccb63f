use chrono::{DateTime, Utc};
use sentinel_common::types::{Alert, AlertRule, AlertStatus, AnomalyDetection, Severity};
use std::fmt::Write;

/// Builds the OPEN alert for `rule` firing on `anomaly`.
///
/// Severity is copied from the rule; the anomaly's log id becomes both the
/// detection reference and the log reference.
pub fn alert_from_anomaly(rule: &AlertRule, anomaly: &AnomalyDetection, now: DateTime<Utc>) -> Alert {
    let service_label = anomaly.service.as_deref().unwrap_or("Unknown Service");
    let context = serde_json::json!({
        "log_id": anomaly.log_id,
        "anomaly_score": anomaly.anomaly_score,
        "confidence": anomaly.confidence,
        "model_version": anomaly.model_version,
        "level": anomaly.level,
        "service": anomaly.service,
        "detected_at": anomaly.detected_at.to_rfc3339(),
    });

    Alert {
        id: sentinel_common::id::next_id(),
        rule_id: rule.id.clone(),
        status: AlertStatus::Open,
        severity: rule.severity,
        title: format!("Anomaly Detected: {} - {}", rule.name, service_label),
        description: Some(describe_anomaly(anomaly)),
        anomaly_detection_id: Some(anomaly.log_id.clone()),
        log_id: Some(anomaly.log_id.clone()),
        service: anomaly.service.clone(),
        context: Some(context),
        created_at: now,
        updated_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution_notes: None,
        notification_sent: false,
        notification_sent_at: None,
        notification_failure_count: 0,
        last_notification_error: None,
    }
}

fn describe_anomaly(anomaly: &AnomalyDetection) -> String {
    let mut text = String::from("An anomaly was detected by the ML service.\n\n");
    let _ = writeln!(text, "Confidence: {:.2}%", anomaly.confidence * 100.0);
    let _ = writeln!(text, "Anomaly Score: {:.2}", anomaly.anomaly_score);
    if let Some(message) = &anomaly.message {
        let _ = writeln!(text, "\nLog Message: {message}");
    }
    if let Some(level) = &anomaly.level {
        let _ = writeln!(text, "Log Level: {level}");
    }
    let _ = write!(text, "\nDetected At: {}", anomaly.detected_at.to_rfc3339());
    text
}

/// Operator-supplied fields of a manually raised alert.
#[derive(Debug, Clone, Default)]
pub struct ManualAlert {
    pub title: String,
    pub description: Option<String>,
    pub service: Option<String>,
    pub severity: Option<Severity>,
    pub context: Option<serde_json::Value>,
}

/// Builds an OPEN alert that is not tied to any anomaly record.
pub fn manual_alert(rule: &AlertRule, input: ManualAlert, now: DateTime<Utc>) -> Alert {
    Alert {
        id: sentinel_common::id::next_id(),
        rule_id: rule.id.clone(),
        status: AlertStatus::Open,
        severity: input.severity.unwrap_or(rule.severity),
        title: input.title,
        description: input.description,
        anomaly_detection_id: None,
        log_id: None,
        service: input.service,
        context: input.context,
        created_at: now,
        updated_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution_notes: None,
        notification_sent: false,
        notification_sent_at: None,
        notification_failure_count: 0,
        last_notification_error: None,
    }
}
