use sentinel_common::types::{AlertRule, AnomalyDetection, RuleType};
use serde::{Deserialize, Serialize};

/// Returns true when `rule` fires for `anomaly`.
///
/// The verdict depends only on the rule's enabled flag, service filter,
/// level filter and confidence threshold, and on the anomaly's flag,
/// service, level and confidence. Rule type is not checked here; callers
/// on the anomaly path select [`RuleType::AnomalyDetection`] rules first.
pub fn matches(rule: &AlertRule, anomaly: &AnomalyDetection) -> bool {
    rule.enabled
        && anomaly.is_anomaly
        && confidence_passes(rule, anomaly)
        && filter_passes(rule.service_name.as_deref(), anomaly.service.as_deref())
        && filter_passes(rule.log_level.as_deref(), anomaly.level.as_deref())
}

fn confidence_passes(rule: &AlertRule, anomaly: &AnomalyDetection) -> bool {
    rule.anomaly_threshold
        .map_or(true, |threshold| anomaly.confidence >= threshold)
}

// Case-sensitive exact match; an unset filter matches everything.
fn filter_passes(filter: Option<&str>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(expected) => value == Some(expected),
    }
}

/// Enabled anomaly-detection rules from `rules` that match `anomaly`.
///
/// Each returned rule fires independently of the others.
pub fn matching_rules<'a>(rules: &'a [AlertRule], anomaly: &AnomalyDetection) -> Vec<&'a AlertRule> {
    rules
        .iter()
        .filter(|rule| rule.rule_type == RuleType::AnomalyDetection)
        .filter(|rule| matches(rule, anomaly))
        .collect()
}

/// Outcome of a dry-run evaluation, with the values each check saw.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RuleEvaluation {
    pub triggered: bool,
    pub rule_id: String,
    pub rule_name: String,
    pub anomaly_id: String,
    pub anomaly_confidence: f64,
    pub anomaly_score: f64,
    pub anomaly_service: Option<String>,
    pub anomaly_level: Option<String>,
    pub anomaly_threshold: Option<f64>,
    pub details: Vec<String>,
}

/// Runs the same predicate as [`matches`] without any side effects and
/// explains every check.
pub fn evaluate(rule: &AlertRule, anomaly: &AnomalyDetection) -> RuleEvaluation {
    let mut details = Vec::with_capacity(6);

    details.push(format!("Rule enabled: {}", rule.enabled));
    if rule.rule_type != RuleType::AnomalyDetection {
        details.push(format!(
            "Rule type: {} (only {} rules fire on anomalies)",
            rule.rule_type,
            RuleType::AnomalyDetection
        ));
    }
    details.push(format!("Anomaly flagged: {}", anomaly.is_anomaly));

    match rule.anomaly_threshold {
        Some(threshold) => details.push(format!(
            "Confidence check: {:.2} >= {:.2} = {}",
            anomaly.confidence,
            threshold,
            anomaly.confidence >= threshold
        )),
        None => details.push("Confidence check: no threshold configured = true".to_string()),
    }

    details.push(describe_filter(
        "Service check",
        rule.service_name.as_deref(),
        anomaly.service.as_deref(),
    ));
    details.push(describe_filter(
        "Log level check",
        rule.log_level.as_deref(),
        anomaly.level.as_deref(),
    ));

    let triggered = rule.rule_type == RuleType::AnomalyDetection && matches(rule, anomaly);

    RuleEvaluation {
        triggered,
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        anomaly_id: anomaly.log_id.clone(),
        anomaly_confidence: anomaly.confidence,
        anomaly_score: anomaly.anomaly_score,
        anomaly_service: anomaly.service.clone(),
        anomaly_level: anomaly.level.clone(),
        anomaly_threshold: rule.anomaly_threshold,
        details,
    }
}

fn describe_filter(label: &str, filter: Option<&str>, value: Option<&str>) -> String {
    match filter {
        None => format!("{label}: any = true"),
        Some(expected) => format!(
            "{label}: {} == {} = {}",
            value.unwrap_or("<none>"),
            expected,
            filter_passes(filter, value)
        ),
    }
}
