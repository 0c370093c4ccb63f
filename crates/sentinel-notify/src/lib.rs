//! Notification delivery for fired alerts.
//!
//! Each alert is fanned out to the enabled channels of its rule by the
//! [`dispatcher::NotificationDispatcher`]. Delivery itself is done by one
//! [`ChannelSender`] per [`ChannelType`]; the set of kinds is closed and
//! resolved through [`Senders::for_type`].

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod utils;


use async_trait::async_trait;
use sentinel_common::types::{Alert, AlertRule, ChannelType, NotificationChannel, RuleType};

use crate::channels::email::EmailSender;
use crate::channels::slack::SlackSender;
use crate::channels::webhook::WebhookSender;
use crate::config::NotificationConfig;
use crate::error::Result;

/// Why a notification is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Firing,
    Recovered,
    Test,
}

/// One alert as handed to a sender, with the owning rule's identity.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub alert: Alert,
    pub rule_name: String,
    pub rule_type: RuleType,
}

impl Notice {
    pub fn new(kind: NoticeKind, alert: Alert, rule: Option<&AlertRule>) -> Self {
        let (rule_name, rule_type) = match rule {
            Some(rule) => (rule.name.clone(), rule.rule_type),
            None => (alert.rule_id.clone(), RuleType::Custom),
        };
        Self {
            kind,
            alert,
            rule_name,
            rule_type,
        }
    }

    /// Subject-line tag; empty for firing notices.
    pub fn status_tag(&self) -> &'static str {
        match self.kind {
            NoticeKind::Firing => "",
            NoticeKind::Recovered => "[RECOVERED] ",
            NoticeKind::Test => "[TEST] ",
        }
    }
}

/// Delivers one alert as one notification through a single channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the channel configuration is unusable or the
    /// remote side rejects the notification (after retries, if any).
    async fn send(&self, notice: &Notice, channel: &NotificationChannel) -> Result<()>;

    fn channel_type(&self) -> ChannelType;
}

/// The fixed set of senders, one per [`ChannelType`].
pub struct Senders {
    pub email: EmailSender,
    pub slack: SlackSender,
    pub webhook: WebhookSender,
}

impl Senders {
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        Ok(Self {
            email: EmailSender::new(config.email.clone())?,
            slack: SlackSender::new(config.slack.clone())?,
            webhook: WebhookSender::new(config.webhook.clone())?,
        })
    }

    pub fn for_type(&self, channel_type: ChannelType) -> &dyn ChannelSender {
        match channel_type {
            ChannelType::Email => &self.email,
            ChannelType::Slack => &self.slack,
            ChannelType::Webhook => &self.webhook,
        }
    }
}
