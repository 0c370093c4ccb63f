use crate::config::{RulesSeedFile, SeedAlertRule, SeedChannel};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sentinel_common::types::{AlertRule, NotificationChannel};
use sentinel_storage::AlertStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
    pub channels: u32,
}

/// Reads and parses a JSON rules seed file.
pub fn load_seed_file(path: &str) -> Result<RulesSeedFile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read seed file '{path}'"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse seed file '{path}'"))
}

fn build_rule(seed: &SeedAlertRule, now: DateTime<Utc>) -> Result<AlertRule> {
    let name = seed.name.trim();
    if name.is_empty() {
        bail!("rule name is empty");
    }
    if let Some(t) = seed.anomaly_threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("anomaly_threshold must be between 0 and 1, got {t}");
        }
    }
    Ok(AlertRule {
        id: sentinel_common::id::next_id(),
        name: name.to_string(),
        description: seed.description.clone(),
        rule_type: seed.rule_type.parse().map_err(anyhow::Error::msg)?,
        severity: seed.severity.parse().map_err(anyhow::Error::msg)?,
        enabled: seed.enabled,
        conditions: None,
        anomaly_threshold: seed.anomaly_threshold,
        time_window_minutes: seed.time_window_minutes,
        threshold: seed.threshold,
        service_name: seed.service_name.clone().filter(|s| !s.trim().is_empty()),
        log_level: seed.log_level.clone().filter(|s| !s.trim().is_empty()),
        cooldown_minutes: seed.cooldown_minutes,
        notify_on_recovery: seed.notify_on_recovery,
        created_by: Some("seed".to_string()),
        trigger_count: 0,
        last_triggered_at: None,
        created_at: now,
        updated_at: now,
    })
}

fn build_channel(rule_id: &str, seed: &SeedChannel, now: DateTime<Utc>) -> Result<NotificationChannel> {
    let config = match &seed.config {
        serde_json::Value::Null => serde_json::json!({}),
        v if v.is_object() => v.clone(),
        _ => bail!("channel '{}' config must be a JSON object", seed.name),
    };
    Ok(NotificationChannel {
        id: sentinel_common::id::next_id(),
        rule_id: rule_id.to_string(),
        name: seed.name.clone(),
        channel_type: seed.channel_type.parse().map_err(anyhow::Error::msg)?,
        enabled: seed.enabled,
        config,
        success_count: 0,
        failure_count: 0,
        last_success_at: None,
        last_failure_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// Inserts every seed rule whose name is not taken yet, together with its
/// channels. Bad entries are logged and counted, not fatal.
pub fn seed_rules(store: &AlertStore, seed: &RulesSeedFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let now = Utc::now();

    for entry in &seed.rules {
        if store.get_rule_by_name(entry.name.trim())?.is_some() {
            tracing::warn!(name = %entry.name, "Alert rule already exists, skipping");
            summary.skipped += 1;
            continue;
        }

        let rule = match build_rule(entry, now) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::error!(name = %entry.name, error = %e, "Invalid seed rule");
                summary.failed += 1;
                continue;
            }
        };
        if let Err(e) = store.insert_rule(&rule) {
            tracing::error!(name = %entry.name, error = %e, "Failed to create alert rule");
            summary.failed += 1;
            continue;
        }
        tracing::info!(name = %rule.name, id = %rule.id, "Alert rule created");
        summary.created += 1;

        for channel_seed in &entry.channels {
            let result = build_channel(&rule.id, channel_seed, now)
                .and_then(|channel| store.insert_channel(&channel).map_err(anyhow::Error::from));
            match result {
                Ok(()) => summary.channels += 1,
                Err(e) => {
                    tracing::error!(
                        rule = %rule.name,
                        channel = %channel_seed.name,
                        error = %e,
                        "Failed to create notification channel"
                    );
                }
            }
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        channels = summary.channels,
        "init-rules completed"
    );
    Ok(summary)
}
