use crate::config::SlackSettings;
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{ChannelSender, Notice};
use async_trait::async_trait;
use sentinel_common::types::{ChannelType, NotificationChannel, Severity};
use serde_json::{json, Value};
use std::time::Duration;

pub struct SlackSender {
    settings: SlackSettings,
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new(settings: SlackSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self { settings, client })
    }

    /// Block-kit message with a plain-text fallback.
    pub fn build_payload(notice: &Notice, channel_override: Option<&str>) -> Value {
        let alert = &notice.alert;
        let emoji = severity_emoji(alert.severity);
        let header = format!("🚨 {}{} Alert", notice.status_tag(), alert.severity);
        let title = format!("{emoji} *{}*", alert.title);
        let description = alert
            .description
            .as_deref()
            .map(|d| truncate_string(d, 2500))
            .unwrap_or_default();

        let mut payload = json!({
            "text": format!("{}{} {}", notice.status_tag(), alert.severity, alert.title),
            "blocks": [
                {
                    "type": "header",
                    "text": { "type": "plain_text", "text": header, "emoji": true }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("{title}\n{description}") }
                },
                { "type": "divider" },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*Rule:*\n{}", notice.rule_name) },
                        { "type": "mrkdwn", "text": format!("*Severity:*\n{emoji} {}", alert.severity) },
                        { "type": "mrkdwn", "text": format!("*Status:*\n{}", alert.status) },
                        { "type": "mrkdwn", "text": format!("*Service:*\n{}", alert.service.as_deref().unwrap_or("N/A")) },
                        { "type": "mrkdwn", "text": format!("*Created:*\n{}", alert.created_at.format("%Y-%m-%d %H:%M:%S UTC")) },
                        { "type": "mrkdwn", "text": format!("*Alert ID:*\n{}", alert.id) }
                    ]
                },
                {
                    "type": "context",
                    "elements": [ { "type": "mrkdwn", "text": "AI Log Monitoring System" } ]
                }
            ]
        });
        if let (Some(target), Some(obj)) = (channel_override, payload.as_object_mut()) {
            obj.insert("channel".to_string(), Value::String(target.to_string()));
        }
        payload
    }
}

#[async_trait]
impl ChannelSender for SlackSender {
    async fn send(&self, notice: &Notice, channel: &NotificationChannel) -> Result<()> {
        let webhook_url = channel
            .config
            .get("webhook_url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| NotifyError::InvalidConfig("No Slack webhook URL configured".to_string()))?;
        if !self.settings.enabled {
            return Err(NotifyError::Disabled("Slack".to_string()));
        }

        let channel_override = channel.config.get("channel").and_then(Value::as_str);
        let payload = Self::build_payload(notice, channel_override);

        let resp = self.client.post(webhook_url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                service: "Slack".to_string(),
                status: status.as_u16(),
                body: truncate_string(&body, MAX_BODY_LENGTH),
            });
        }

        tracing::debug!(channel_id = %channel.id, alert_id = %notice.alert.id, "Slack notification sent");
        Ok(())
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }
}

pub fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "🟢",
        Severity::Info => "🔵",
    }
}
