use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use sentinel_alert::rate_limit::AlertHistory;
use sentinel_common::types::{Alert, AlertStatus, Severity};
use sentinel_notify::dispatcher::DispatchReport;

use super::{from_ms, json_col, opt_from_ms, parse_col, to_ms, AlertStore, Where};
use crate::error::{is_unique_violation, Result};
use crate::{AlertFilter, HourlyCount};

const ALERT_COLUMNS: &str = "id, rule_id, status, severity, title, description, \
    anomaly_detection_id, log_id, service, context, created_at, updated_at, acknowledged_at, \
    acknowledged_by, resolved_at, resolved_by, resolution_notes, notification_sent, \
    notification_sent_at, notification_failure_count, last_notification_error";

fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
    let failures: i64 = row.get(19)?;
    Ok(Alert {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        status: parse_col(row, 2)?,
        severity: parse_col(row, 3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        anomaly_detection_id: row.get(6)?,
        log_id: row.get(7)?,
        service: row.get(8)?,
        context: json_col(row, 9)?,
        created_at: from_ms(row.get(10)?),
        updated_at: from_ms(row.get(11)?),
        acknowledged_at: opt_from_ms(row.get(12)?),
        acknowledged_by: row.get(13)?,
        resolved_at: opt_from_ms(row.get(14)?),
        resolved_by: row.get(15)?,
        resolution_notes: row.get(16)?,
        notification_sent: row.get::<_, i32>(17)? != 0,
        notification_sent_at: opt_from_ms(row.get(18)?),
        notification_failure_count: failures as u32,
        last_notification_error: row.get(20)?,
    })
}

fn alert_where(filter: &AlertFilter) -> Where {
    let mut w = Where::default();
    if let Some(status) = filter.status {
        w.eq("status =", status.as_str());
    }
    if let Some(severity) = filter.severity {
        w.eq("severity =", severity.as_str());
    }
    if let Some(service) = &filter.service {
        w.eq("service =", service.clone());
    }
    if let Some(rule_id) = &filter.rule_id {
        w.eq("rule_id =", rule_id.clone());
    }
    if let Some(from) = filter.created_from {
        w.eq("created_at >=", to_ms(from));
    }
    if let Some(to) = filter.created_to {
        w.eq("created_at <", to_ms(to));
    }
    w
}

impl AlertStore {
    /// Inserts `alert` unless one already exists for the same rule and
    /// anomaly. Returns whether a row was written.
    pub fn insert_alert(&self, alert: &Alert) -> Result<bool> {
        let context = alert.context.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn();
        let result = conn.execute(
            &format!(
                "INSERT INTO alerts ({ALERT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                 ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                alert.id,
                alert.rule_id,
                alert.status.as_str(),
                alert.severity.as_str(),
                alert.title,
                alert.description,
                alert.anomaly_detection_id,
                alert.log_id,
                alert.service,
                context,
                to_ms(alert.created_at),
                to_ms(alert.updated_at),
                alert.acknowledged_at.map(to_ms),
                alert.acknowledged_by,
                alert.resolved_at.map(to_ms),
                alert.resolved_by,
                alert.resolution_notes,
                alert.notification_sent as i32,
                alert.notification_sent_at.map(to_ms),
                i64::from(alert.notification_failure_count),
                alert.last_notification_error,
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(
                    rule_id = %alert.rule_id,
                    anomaly_id = ?alert.anomaly_detection_id,
                    "Alert already exists for rule and anomaly"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], row_to_alert)?;
        Ok(rows.next().transpose()?)
    }

    /// Newest first.
    pub fn list_alerts(&self, filter: &AlertFilter, limit: usize, offset: usize) -> Result<Vec<Alert>> {
        let mut w = alert_where(filter);
        let where_sql = w.sql();
        let page = w.page(limit, offset);
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts{where_sql} ORDER BY created_at DESC, id DESC{page}"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(w.params().as_slice(), row_to_alert)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        self.count_where("alerts", &alert_where(filter))
    }

    /// Persists the lifecycle columns of `alert` after a transition out of
    /// `from`. Returns false when the row is gone or no longer in `from`.
    pub fn update_alert_state(&self, alert: &Alert, from: AlertStatus) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE alerts SET status = ?2, updated_at = ?3, acknowledged_at = ?4, \
             acknowledged_by = ?5, resolved_at = ?6, resolved_by = ?7, resolution_notes = ?8 \
             WHERE id = ?1 AND status = ?9",
            params![
                alert.id,
                alert.status.as_str(),
                to_ms(alert.updated_at),
                alert.acknowledged_at.map(to_ms),
                alert.acknowledged_by,
                alert.resolved_at.map(to_ms),
                alert.resolved_by,
                alert.resolution_notes,
                from.as_str(),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn alert_exists_for(&self, rule_id: &str, anomaly_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE rule_id = ?1 AND anomaly_detection_id = ?2)",
            params![rule_id, anomaly_id],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    /// Folds a dispatch report into the alert's notification columns.
    ///
    /// Failed channels add to `notification_failure_count`; one success is
    /// enough to mark the alert as notified.
    pub fn record_alert_notification(&self, alert_id: &str, report: &DispatchReport) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE alerts SET \
             notification_failure_count = notification_failure_count + ?2, \
             last_notification_error = COALESCE(?3, last_notification_error), \
             notification_sent = CASE WHEN ?4 = 1 THEN 1 ELSE notification_sent END, \
             notification_sent_at = CASE WHEN ?4 = 1 THEN ?5 ELSE notification_sent_at END, \
             updated_at = ?5 \
             WHERE id = ?1",
            params![
                alert_id,
                report.failed as i64,
                report.last_error,
                report.notification_sent as i32,
                to_ms(report.finished_at),
            ],
        )?;
        Ok(())
    }

    /// Unsent alerts still under the retry bound whose rule has at least
    /// one enabled channel, oldest first.
    pub fn find_pending_notifications(&self, max_retries: u32, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE notification_sent = 0 AND notification_failure_count < ?1 \
             AND EXISTS (SELECT 1 FROM notification_channels c \
                         WHERE c.rule_id = alerts.rule_id AND c.enabled = 1) \
             ORDER BY created_at ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![i64::from(max_retries), limit as i64], row_to_alert)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Alert counts for every status, zero-filled.
    pub fn count_alerts_by_status(&self) -> Result<Vec<(AlertStatus, u64)>> {
        let counts = self.group_count("status")?;
        Ok(AlertStatus::ALL
            .iter()
            .map(|s| (*s, lookup(&counts, s.as_str())))
            .collect())
    }

    /// Alert counts for every severity, highest first, zero-filled.
    pub fn count_alerts_by_severity(&self) -> Result<Vec<(Severity, u64)>> {
        let counts = self.group_count("severity")?;
        Ok(Severity::ALL
            .iter()
            .rev()
            .map(|s| (*s, lookup(&counts, s.as_str())))
            .collect())
    }

    fn group_count(&self, column: &str) -> Result<Vec<(String, u64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {column}, COUNT(*) FROM alerts GROUP BY {column}"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Alert counts per hour for the `hours` hours ending at `now`, oldest first.
    pub fn hourly_alert_counts(&self, now: DateTime<Utc>, hours: u32) -> Result<Vec<HourlyCount>> {
        let start = now - Duration::hours(i64::from(hours));
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT created_at FROM alerts WHERE created_at >= ?1 AND created_at < ?2")?;
        let rows = stmt.query_map(params![to_ms(start), to_ms(now)], |row| row.get::<_, i64>(0))?;

        let mut buckets: Vec<HourlyCount> = (0..hours)
            .map(|i| HourlyCount {
                hour_start: start + Duration::hours(i64::from(i)),
                count: 0,
            })
            .collect();
        let hour_ms = Duration::hours(1).num_milliseconds();
        for created in rows {
            let index = ((created? - to_ms(start)) / hour_ms) as usize;
            if let Some(bucket) = buckets.get_mut(index) {
                bucket.count += 1;
            }
        }
        Ok(buckets)
    }
}

fn lookup(counts: &[(String, u64)], key: &str) -> u64 {
    counts
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, n)| *n)
        .unwrap_or(0)
}

impl AlertHistory for AlertStore {
    fn count_alerts_since(&self, rule_id: &str, since: DateTime<Utc>) -> anyhow::Result<u64> {
        let filter = AlertFilter {
            rule_id: Some(rule_id.to_string()),
            created_from: Some(since),
            ..Default::default()
        };
        Ok(self.count_alerts(&filter)?)
    }
}
