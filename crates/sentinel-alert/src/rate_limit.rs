//! Per-rule rate limiting: a persisted alert count over a trailing window
//! plus a volatile cooldown that short-circuits further checks.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A cooldown entered when a rule exceeded its allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    /// The moment of the denial that opened this cooldown.
    pub started_at: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Storage for cooldown entries keyed by rule id.
///
/// The in-process [`InMemoryCooldownStore`] is lost on restart; a shared
/// cache can stand in for multi-instance deployments.
pub trait CooldownStore: Send + Sync {
    fn get(&self, rule_id: &str) -> Option<Cooldown>;
    fn set(&self, rule_id: &str, cooldown: Cooldown);
    fn clear(&self, rule_id: &str);
}

#[derive(Default)]
pub struct InMemoryCooldownStore {
    entries: DashMap<String, Cooldown>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownStore for InMemoryCooldownStore {
    fn get(&self, rule_id: &str) -> Option<Cooldown> {
        self.entries.get(rule_id).map(|entry| *entry.value())
    }

    fn set(&self, rule_id: &str, cooldown: Cooldown) {
        self.entries.insert(rule_id.to_string(), cooldown);
    }

    fn clear(&self, rule_id: &str) {
        self.entries.remove(rule_id);
    }
}

/// Source of persisted alert counts used for the window check.
pub trait AlertHistory: Send + Sync {
    fn count_alerts_since(&self, rule_id: &str, since: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_alerts_per_rule")]
    pub max_alerts_per_rule: u64,
    #[serde(default = "default_time_window_minutes")]
    pub time_window_minutes: i64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_alerts_per_rule: default_max_alerts_per_rule(),
            time_window_minutes: default_time_window_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_alerts_per_rule() -> u64 {
    10
}

fn default_time_window_minutes() -> i64 {
    60
}

fn default_cooldown_minutes() -> i64 {
    15
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CooldownStatus {
    pub rule_id: String,
    pub in_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    cooldowns: Arc<dyn CooldownStore>,
    history: Arc<dyn AlertHistory>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        cooldowns: Arc<dyn CooldownStore>,
        history: Arc<dyn AlertHistory>,
    ) -> Self {
        Self {
            config,
            cooldowns,
            history,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn allow(&self, rule_id: &str) -> bool {
        self.allow_at(rule_id, Utc::now())
    }

    /// Decides whether `rule_id` may create another alert at `now`.
    ///
    /// A denial opens a cooldown during which every call is denied without
    /// consulting history. Once it lapses, only alerts created after the
    /// denial count toward the window.
    pub fn allow_at(&self, rule_id: &str, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let window_start = now - Duration::minutes(self.config.time_window_minutes);
        let mut since = window_start;

        if let Some(cooldown) = self.cooldowns.get(rule_id) {
            if now < cooldown.until {
                tracing::debug!(
                    rule_id,
                    until = %cooldown.until,
                    "Rule in cooldown, alert suppressed"
                );
                return false;
            }
            if cooldown.started_at > window_start {
                since = cooldown.started_at;
            } else {
                self.cooldowns.clear(rule_id);
            }
        }

        let count = match self.history.count_alerts_since(rule_id, since) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(rule_id, error = %e, "Alert count unavailable, allowing alert");
                return true;
            }
        };

        if count >= self.config.max_alerts_per_rule {
            let until = now + Duration::minutes(self.config.cooldown_minutes);
            self.cooldowns.set(
                rule_id,
                Cooldown {
                    started_at: now,
                    until,
                },
            );
            tracing::warn!(
                rule_id,
                count,
                max = self.config.max_alerts_per_rule,
                until = %until,
                "Rate limit exceeded, rule entering cooldown"
            );
            return false;
        }

        true
    }

    pub fn cooldown_status(&self, rule_id: &str, now: DateTime<Utc>) -> CooldownStatus {
        let active = self
            .cooldowns
            .get(rule_id)
            .filter(|cooldown| now < cooldown.until);
        CooldownStatus {
            rule_id: rule_id.to_string(),
            in_cooldown: active.is_some(),
            cooldown_until: active.map(|cooldown| cooldown.until),
        }
    }

    /// Operator override: lifts any cooldown for the rule.
    pub fn clear_cooldown(&self, rule_id: &str) {
        self.cooldowns.clear(rule_id);
        tracing::info!(rule_id, "Cooldown cleared");
    }

    /// Alerts created for the rule within the trailing window.
    pub fn alert_count(&self, rule_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let since = now - Duration::minutes(self.config.time_window_minutes);
        self.history.count_alerts_since(rule_id, since)
    }
}
