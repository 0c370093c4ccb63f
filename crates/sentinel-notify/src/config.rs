use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Alerts dispatched concurrently; further alerts wait for a free slot.
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    /// Upper bound for a single channel send, retries included.
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub slack: SlackSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            channel_timeout_secs: default_channel_timeout_secs(),
            email: EmailSettings::default(),
            slack: SlackSettings::default(),
            webhook: WebhookSettings::default(),
        }
    }
}

fn default_max_concurrent_dispatches() -> usize {
    8
}

fn default_channel_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "alerts@localhost".to_string()
}

fn default_from_name() -> String {
    "AI Monitoring Alerts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_slack_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_slack_timeout_ms(),
        }
    }
}

fn default_slack_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay; doubles after every failed attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_webhook_timeout_ms(),
            retry_on_failure: true,
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}
