use crate::config::EmailSettings;
use crate::error::{NotifyError, Result};
use crate::{ChannelSender, Notice};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sentinel_common::types::{ChannelType, NotificationChannel, Severity};
use serde_json::Value;

pub struct EmailSender {
    settings: EmailSettings,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailSender {
    pub fn new(settings: EmailSettings) -> Result<Self> {
        let transport = match (&settings.smtp_host, settings.enabled) {
            (Some(host), true) => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| NotifyError::Smtp(e.to_string()))?
                    .port(settings.smtp_port);
                if let (Some(user), Some(pass)) = (&settings.smtp_username, &settings.smtp_password)
                {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }
                Some(builder.build())
            }
            _ => None,
        };
        Ok(Self {
            settings,
            transport,
        })
    }

    pub fn subject(notice: &Notice) -> String {
        format!(
            "{}[{}] {} - {}",
            notice.status_tag(),
            notice.alert.severity,
            notice.rule_name,
            notice.alert.title
        )
    }

    pub fn render_html(notice: &Notice) -> String {
        let alert = &notice.alert;
        let color = severity_color(alert.severity);
        let description = alert
            .description
            .as_deref()
            .map(|d| html_escape(d).replace('\n', "<br>"))
            .unwrap_or_default();
        let service = alert.service.as_deref().unwrap_or("N/A");
        format!(
            r#"<html><body style="font-family: Arial, sans-serif;">
<div style="border-left: 6px solid {color}; padding: 12px 16px;">
<h2 style="color: {color}; margin-top: 0;">{tag}{severity} Alert</h2>
<h3>{title}</h3>
<table cellpadding="4">
<tr><td><b>Rule</b></td><td>{rule}</td></tr>
<tr><td><b>Severity</b></td><td>{severity}</td></tr>
<tr><td><b>Status</b></td><td>{status}</td></tr>
<tr><td><b>Service</b></td><td>{service}</td></tr>
<tr><td><b>Created</b></td><td>{created}</td></tr>
<tr><td><b>Alert ID</b></td><td>{id}</td></tr>
</table>
<p>{description}</p>
</div>
<p style="color: #777; font-size: 12px;">AI Log Monitoring System</p>
</body></html>"#,
            color = color,
            tag = notice.status_tag(),
            severity = alert.severity,
            title = html_escape(&alert.title),
            rule = html_escape(&notice.rule_name),
            status = alert.status,
            service = html_escape(service),
            created = alert.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            id = alert.id,
            description = description,
        )
    }

    fn from_mailbox(&self) -> Result<Mailbox> {
        format!("{} <{}>", self.settings.from_name, self.settings.from_address)
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("invalid sender address: {e}")))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, notice: &Notice, channel: &NotificationChannel) -> Result<()> {
        let recipients = recipients_from_config(&channel.config);
        if recipients.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "No recipients configured for email channel".to_string(),
            ));
        }
        if !self.settings.enabled {
            return Err(NotifyError::Disabled("Email".to_string()));
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| NotifyError::InvalidConfig("SMTP host not configured".to_string()))?;

        let from = self.from_mailbox()?;
        let subject = Self::subject(notice);
        let body = Self::render_html(notice);
        let mut failures = Vec::new();

        for recipient in &recipients {
            let to: Mailbox = match recipient.parse() {
                Ok(to) => to,
                Err(e) => {
                    failures.push(format!("{recipient}: {e}"));
                    continue;
                }
            };
            let email = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&subject)
                .header(ContentType::TEXT_HTML)
                .body(body.clone())
                .map_err(|e| NotifyError::Smtp(e.to_string()))?;

            match transport.send(email).await {
                Ok(_) => {
                    tracing::debug!(channel_id = %channel.id, recipient = %recipient, "Email sent");
                }
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        recipient = %recipient,
                        error = %e,
                        "Email send failed"
                    );
                    failures.push(format!("{recipient}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Smtp(format!(
                "{} of {} recipients failed: {}",
                failures.len(),
                recipients.len(),
                failures.join("; ")
            )))
        }
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }
}

/// Reads `recipients` as either a JSON array or a comma-separated string.
pub fn recipients_from_config(config: &Value) -> Vec<String> {
    let raw: Vec<String> = match config.get("recipients") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(list)) => list.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

pub fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#d32f2f",
        Severity::High => "#f57c00",
        Severity::Medium => "#fbc02d",
        Severity::Low => "#388e3c",
        Severity::Info => "#1976d2",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
