use sentinel_alert::rate_limit::RateLimitConfig;
use sentinel_notify::config::NotificationConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Snowflake worker id, `0..32`.
    #[serde(default = "default_worker_id")]
    pub worker_id: i32,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            worker_id: default_worker_id(),
            monitoring: MonitoringConfig::default(),
            rate_limit: RateLimitConfig::default(),
            notification: NotificationConfig::default(),
        }
    }
}

fn default_http_port() -> u16 {
    8084
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_worker_id() -> i32 {
    1
}

/// Anomaly polling and notification retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_critical_interval_secs")]
    pub critical_interval_secs: u64,
    /// How far before the last check time each tick looks.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,
    /// Anomalies evaluated per tick; the rest wait for the next one.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_critical_min")]
    pub critical_min_confidence: f64,
    #[serde(default = "default_critical_min")]
    pub critical_min_score: f64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Alerts whose failed channel attempts reach this count are not retried.
    #[serde(default = "default_max_notification_retries")]
    pub max_notification_retries: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_interval_secs(),
            critical_interval_secs: default_critical_interval_secs(),
            lookback_minutes: default_lookback_minutes(),
            batch_size: default_batch_size(),
            critical_min_confidence: default_critical_min(),
            critical_min_score: default_critical_min(),
            retry_interval_secs: default_retry_interval_secs(),
            max_notification_retries: default_max_notification_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_critical_interval_secs() -> u64 {
    30
}

fn default_lookback_minutes() -> i64 {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_critical_min() -> f64 {
    sentinel_common::types::CRITICAL_MIN_CONFIDENCE
}

fn default_retry_interval_secs() -> u64 {
    300
}

fn default_max_notification_retries() -> u32 {
    3
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

// ---- Rules seed file types (used by `init-rules` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<SeedAlertRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedAlertRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_seed_rule_type")]
    pub rule_type: String,
    #[serde(default = "default_seed_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub anomaly_threshold: Option<f64>,
    #[serde(default)]
    pub time_window_minutes: Option<u32>,
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_seed_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub notify_on_recovery: bool,
    #[serde(default)]
    pub channels: Vec<SeedChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedChannel {
    pub name: String,
    pub channel_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_seed_rule_type() -> String {
    "ANOMALY_DETECTION".to_string()
}

fn default_seed_severity() -> String {
    "HIGH".to_string()
}

fn default_seed_cooldown_minutes() -> u32 {
    15
}
