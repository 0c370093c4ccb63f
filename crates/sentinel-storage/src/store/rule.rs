use chrono::{DateTime, Utc};
use rusqlite::params;
use sentinel_common::types::{AlertRule, RuleType};

use super::{from_ms, opt_from_ms, parse_col, to_ms, AlertStore, Where};
use crate::error::{is_foreign_key_violation, is_unique_violation, Result, StorageError};
use crate::RuleFilter;

const RULE_COLUMNS: &str = "id, name, description, rule_type, severity, enabled, conditions, \
    anomaly_threshold, time_window_minutes, threshold, service_name, log_level, cooldown_minutes, \
    notify_on_recovery, created_by, trigger_count, last_triggered_at, created_at, updated_at";

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AlertRule> {
    let time_window: Option<i64> = row.get(8)?;
    let cooldown: i64 = row.get(12)?;
    let trigger_count: i64 = row.get(15)?;
    Ok(AlertRule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        rule_type: parse_col(row, 3)?,
        severity: parse_col(row, 4)?,
        enabled: row.get::<_, i32>(5)? != 0,
        conditions: row.get(6)?,
        anomaly_threshold: row.get(7)?,
        time_window_minutes: time_window.map(|v| v as u32),
        threshold: row.get(9)?,
        service_name: row.get(10)?,
        log_level: row.get(11)?,
        cooldown_minutes: cooldown as u32,
        notify_on_recovery: row.get::<_, i32>(13)? != 0,
        created_by: row.get(14)?,
        trigger_count: trigger_count as u64,
        last_triggered_at: opt_from_ms(row.get(16)?),
        created_at: from_ms(row.get(17)?),
        updated_at: from_ms(row.get(18)?),
    })
}

fn rule_where(filter: &RuleFilter) -> Where {
    let mut w = Where::default();
    if let Some(rule_type) = filter.rule_type {
        w.eq("rule_type =", rule_type.as_str());
    }
    if let Some(severity) = filter.severity {
        w.eq("severity =", severity.as_str());
    }
    if let Some(service) = &filter.service_name {
        w.eq("service_name =", service.clone());
    }
    if let Some(enabled) = filter.enabled {
        w.eq("enabled =", enabled as i32);
    }
    w
}

impl AlertStore {
    /// Inserts a new rule. A taken name yields [`StorageError::Duplicate`].
    pub fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        let conn = self.conn();
        let result = conn.execute(
            &format!(
                "INSERT INTO alert_rules ({RULE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                rule.id,
                rule.name,
                rule.description,
                rule.rule_type.as_str(),
                rule.severity.as_str(),
                rule.enabled as i32,
                rule.conditions,
                rule.anomaly_threshold,
                rule.time_window_minutes.map(i64::from),
                rule.threshold,
                rule.service_name,
                rule.log_level,
                i64::from(rule.cooldown_minutes),
                rule.notify_on_recovery as i32,
                rule.created_by,
                rule.trigger_count as i64,
                rule.last_triggered_at.map(to_ms),
                to_ms(rule.created_at),
                to_ms(rule.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::Duplicate {
                entity: "alert_rule",
                key: rule.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], row_to_rule)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE name = ?1"))?;
        let mut rows = stmt.query_map(params![name], row_to_rule)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_rules(&self, filter: &RuleFilter, limit: usize, offset: usize) -> Result<Vec<AlertRule>> {
        let mut w = rule_where(filter);
        let where_sql = w.sql();
        let page = w.page(limit, offset);
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules{where_sql} ORDER BY created_at DESC, id DESC{page}"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(w.params().as_slice(), row_to_rule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_rules(&self, filter: &RuleFilter) -> Result<u64> {
        self.count_where("alert_rules", &rule_where(filter))
    }

    /// Enabled anomaly-detection rules, the candidate set for the firing path.
    pub fn enabled_anomaly_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules WHERE enabled = 1 AND rule_type = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![RuleType::AnomalyDetection.as_str()], row_to_rule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Rewrites every editable column of `rule`. Returns false when the id is unknown.
    pub fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
        let conn = self.conn();
        let result = conn.execute(
            "UPDATE alert_rules SET name = ?2, description = ?3, rule_type = ?4, severity = ?5, \
             enabled = ?6, conditions = ?7, anomaly_threshold = ?8, time_window_minutes = ?9, \
             threshold = ?10, service_name = ?11, log_level = ?12, cooldown_minutes = ?13, \
             notify_on_recovery = ?14, updated_at = ?15 WHERE id = ?1",
            params![
                rule.id,
                rule.name,
                rule.description,
                rule.rule_type.as_str(),
                rule.severity.as_str(),
                rule.enabled as i32,
                rule.conditions,
                rule.anomaly_threshold,
                rule.time_window_minutes.map(i64::from),
                rule.threshold,
                rule.service_name,
                rule.log_level,
                i64::from(rule.cooldown_minutes),
                rule.notify_on_recovery as i32,
                to_ms(rule.updated_at),
            ],
        );
        match result {
            Ok(n) => Ok(n > 0),
            Err(e) if is_unique_violation(&e) => Err(StorageError::Duplicate {
                entity: "alert_rule",
                key: rule.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE alert_rules SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, enabled as i32, to_ms(now)],
        )?;
        Ok(n > 0)
    }

    /// Deletes a rule and, by cascade, its channels. Rules that still own
    /// alerts are kept and reported as [`StorageError::ForeignKey`].
    pub fn delete_rule(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        match conn.execute("DELETE FROM alert_rules WHERE id = ?1", params![id]) {
            Ok(n) => Ok(n > 0),
            Err(e) if is_foreign_key_violation(&e) => Err(StorageError::ForeignKey {
                entity: "alert_rule",
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Bumps `trigger_count` and stamps `last_triggered_at`.
    pub fn record_rule_trigger(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE alert_rules SET trigger_count = trigger_count + 1, last_triggered_at = ?2 WHERE id = ?1",
            params![id, to_ms(at)],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_rule",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
