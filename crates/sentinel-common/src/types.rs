use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use sentinel_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "HIGH");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Lifecycle state of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 4] = [
        AlertStatus::Open,
        AlertStatus::Acknowledged,
        AlertStatus::Resolved,
        AlertStatus::FalsePositive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "OPEN",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::FalsePositive => "FALSE_POSITIVE",
        }
    }

    /// Resolved and false-positive alerts accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "OPEN" => Ok(AlertStatus::Open),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            "FALSE_POSITIVE" => Ok(AlertStatus::FalsePositive),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    AnomalyDetection,
    Threshold,
    PatternMatch,
    ErrorRate,
    Custom,
}

impl RuleType {
    pub const ALL: [RuleType; 5] = [
        RuleType::AnomalyDetection,
        RuleType::Threshold,
        RuleType::PatternMatch,
        RuleType::ErrorRate,
        RuleType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::AnomalyDetection => "ANOMALY_DETECTION",
            RuleType::Threshold => "THRESHOLD",
            RuleType::PatternMatch => "PATTERN_MATCH",
            RuleType::ErrorRate => "ERROR_RATE",
            RuleType::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ANOMALY_DETECTION" => Ok(RuleType::AnomalyDetection),
            "THRESHOLD" => Ok(RuleType::Threshold),
            "PATTERN_MATCH" => Ok(RuleType::PatternMatch),
            "ERROR_RATE" => Ok(RuleType::ErrorRate),
            "CUSTOM" => Ok(RuleType::Custom),
            _ => Err(format!("unknown rule type: {s}")),
        }
    }
}

/// The fixed set of delivery channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    Email,
    Slack,
    Webhook,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [ChannelType::Email, ChannelType::Slack, ChannelType::Webhook];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "EMAIL",
            ChannelType::Slack => "SLACK",
            ChannelType::Webhook => "WEBHOOK",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(ChannelType::Email),
            "slack" => Ok(ChannelType::Slack),
            "webhook" => Ok(ChannelType::Webhook),
            _ => Err(format!("unknown channel type: {s}")),
        }
    }
}

/// A named, user-defined trigger condition.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub enabled: bool,
    /// Opaque rule conditions, stored as provided.
    pub conditions: Option<String>,
    /// Minimum anomaly confidence in `[0, 1]`; `None` always passes.
    pub anomaly_threshold: Option<f64>,
    pub time_window_minutes: Option<u32>,
    pub threshold: Option<i64>,
    /// Exact service name filter; `None` matches every service.
    pub service_name: Option<String>,
    /// Exact log level filter; `None` matches every level.
    pub log_level: Option<String>,
    pub cooldown_minutes: u32,
    pub notify_on_recovery: bool,
    pub created_by: Option<String>,
    pub trigger_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One delivery target bound to exactly one rule.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationChannel {
    pub id: String,
    pub rule_id: String,
    pub name: String,
    pub channel_type: ChannelType,
    pub enabled: bool,
    /// Channel-type specific settings (recipients, webhook URL, headers).
    #[schema(value_type = Object)]
    pub config: Value,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted record of one rule firing once.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub anomaly_detection_id: Option<String>,
    pub log_id: Option<String>,
    pub service: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub context: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub notification_failure_count: u32,
    pub last_notification_error: Option<String>,
}

/// One scored log record produced by the external anomaly model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnomalyDetection {
    pub log_id: String,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub model_version: Option<String>,
    pub features: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub service: Option<String>,
    pub log_timestamp: Option<DateTime<Utc>>,
}

pub const CRITICAL_MIN_CONFIDENCE: f64 = 0.8;
pub const CRITICAL_MIN_SCORE: f64 = 0.8;

impl AnomalyDetection {
    pub fn is_critical(&self) -> bool {
        self.is_anomaly
            && self.confidence >= CRITICAL_MIN_CONFIDENCE
            && self.anomaly_score >= CRITICAL_MIN_SCORE
    }
}
