use crate::config::WebhookSettings;
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{ChannelSender, Notice, NoticeKind};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use sentinel_common::types::{ChannelType, NotificationChannel};
use serde_json::{json, Value};
use std::time::Duration;

pub struct WebhookSender {
    settings: WebhookSettings,
    client: reqwest::Client,
}

/// Longest pause between two webhook attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt + 1`: `backoff_ms * 2^attempt`,
/// saturating and capped at [`MAX_BACKOFF_MS`].
pub fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Parsed webhook channel configuration.
#[derive(Debug)]
pub struct WebhookTarget {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
}

impl WebhookTarget {
    /// POST unless the config names PUT or PATCH; anything else is rejected.
    pub fn method_from_config(config: &Value) -> Result<Method> {
        match config
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .as_deref()
        {
            None | Some("POST") => Ok(Method::POST),
            Some("PUT") => Ok(Method::PUT),
            Some("PATCH") => Ok(Method::PATCH),
            Some(other) => Err(NotifyError::InvalidConfig(format!(
                "Unsupported HTTP method: {other}"
            ))),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| NotifyError::InvalidConfig("No webhook URL configured".to_string()))?
            .to_string();

        let method = Self::method_from_config(config)?;

        let headers = match config.get("headers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                    (k.clone(), value)
                })
                .collect(),
            Some(_) => {
                return Err(NotifyError::InvalidConfig(
                    "Webhook headers must be a JSON object".to_string(),
                ))
            }
        };

        Ok(Self {
            url,
            method,
            headers,
        })
    }
}

impl WebhookSender {
    pub fn new(settings: WebhookSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn build_payload(notice: &Notice) -> Value {
        let alert = &notice.alert;
        if notice.kind == NoticeKind::Test {
            return json!({
                "test": true,
                "message": "Test notification from AI Monitoring System",
                "timestamp": Utc::now().timestamp_millis(),
            });
        }
        json!({
            "alert_id": alert.id,
            "event": match notice.kind {
                NoticeKind::Recovered => "recovered",
                _ => "firing",
            },
            "title": alert.title,
            "description": alert.description,
            "severity": alert.severity,
            "status": alert.status,
            "created_at": alert.created_at.to_rfc3339(),
            "alert_rule": {
                "id": alert.rule_id,
                "name": notice.rule_name,
                "type": notice.rule_type,
            },
            "service": alert.service,
            "anomaly": {
                "detection_id": alert.anomaly_detection_id,
                "log_id": alert.log_id,
            },
            "context": alert.context,
            "metadata": {
                "source": "ai-monitoring-system",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": Utc::now().to_rfc3339(),
            },
        })
    }

    async fn attempt(&self, target: &WebhookTarget, payload: &Value) -> Result<()> {
        let mut request = self
            .client
            .request(target.method.clone(), target.url.as_str())
            .json(payload);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            service: "Webhook".to_string(),
            status: status.as_u16(),
            body: truncate_string(&body, MAX_BODY_LENGTH),
        })
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, notice: &Notice, channel: &NotificationChannel) -> Result<()> {
        let target = WebhookTarget::from_config(&channel.config)?;
        if !self.settings.enabled {
            return Err(NotifyError::Disabled("Webhook".to_string()));
        }

        let payload = Self::build_payload(notice);
        let max_attempts = if self.settings.retry_on_failure {
            self.settings.max_attempts.max(1)
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 0..max_attempts {
            match self.attempt(&target, &payload).await {
                Ok(()) => {
                    tracing::debug!(
                        channel_id = %channel.id,
                        alert_id = %notice.alert.id,
                        attempt = attempt + 1,
                        "Webhook notification sent"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook send failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(backoff_delay(self.settings.backoff_ms, attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            NotifyError::InvalidConfig("webhook was never attempted".to_string())
        }))
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }
}
