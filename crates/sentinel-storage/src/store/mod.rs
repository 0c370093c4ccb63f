use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;

mod alert;
mod anomaly;
mod channel;
mod rule;

const ALERT_RULES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    rule_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    conditions TEXT,
    anomaly_threshold REAL,
    time_window_minutes INTEGER,
    threshold INTEGER,
    service_name TEXT,
    log_level TEXT,
    cooldown_minutes INTEGER NOT NULL DEFAULT 15,
    notify_on_recovery INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    trigger_count INTEGER NOT NULL DEFAULT 0,
    last_triggered_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled_type ON alert_rules(enabled, rule_type);
";

const NOTIFICATION_CHANNELS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notification_channels (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL REFERENCES alert_rules(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    config TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_success_at INTEGER,
    last_failure_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_channels_rule_id ON notification_channels(rule_id);
";

const ALERTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL REFERENCES alert_rules(id),
    status TEXT NOT NULL,
    severity TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    anomaly_detection_id TEXT,
    log_id TEXT,
    service TEXT,
    context TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    resolved_at INTEGER,
    resolved_by TEXT,
    resolution_notes TEXT,
    notification_sent INTEGER NOT NULL DEFAULT 0,
    notification_sent_at INTEGER,
    notification_failure_count INTEGER NOT NULL DEFAULT 0,
    last_notification_error TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_rule_anomaly ON alerts(rule_id, anomaly_detection_id);
CREATE INDEX IF NOT EXISTS idx_alerts_anomaly ON alerts(anomaly_detection_id);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
";

const ANOMALY_DETECTIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS anomaly_detections (
    log_id TEXT PRIMARY KEY,
    is_anomaly INTEGER NOT NULL,
    anomaly_score REAL NOT NULL,
    confidence REAL NOT NULL,
    model_version TEXT,
    features TEXT,
    detected_at INTEGER NOT NULL,
    level TEXT,
    message TEXT,
    service TEXT,
    log_timestamp INTEGER
);
CREATE INDEX IF NOT EXISTS idx_anomalies_detected_at ON anomaly_detections(detected_at);
";

/// The service database: rules, channels, alerts and the anomaly feed.
pub struct AlertStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl AlertStore {
    pub fn new(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("sentinel.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(ALERT_RULES_SCHEMA)?;
        conn.execute_batch(NOTIFICATION_CHANNELS_SCHEMA)?;
        conn.execute_batch(ALERTS_SCHEMA)?;
        conn.execute_batch(ANOMALY_DETECTIONS_SCHEMA)?;

        tracing::info!(path = %db_path.display(), "Initialized alert store");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Round-trips a trivial query; used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn count_where(&self, table: &str, filter: &Where) -> Result<u64> {
        let conn = self.conn();
        let sql = format!("SELECT COUNT(*) FROM {table}{}", filter.sql());
        let count: i64 = conn.query_row(&sql, filter.params().as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Incrementally built `WHERE` clause with numbered placeholders.
#[derive(Default)]
pub(crate) struct Where {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Where {
    /// Adds `{lhs} ?N`, e.g. `eq("status =", "OPEN")`.
    pub(crate) fn eq<T: ToSql + 'static>(&mut self, lhs: &str, value: T) {
        self.params.push(Box::new(value));
        self.clauses.push(format!("{lhs} ?{}", self.params.len()));
    }

    /// Adds a clause that takes no parameter.
    pub(crate) fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Appends `LIMIT ?N OFFSET ?N+1`; call after every filter clause.
    pub(crate) fn page(&mut self, limit: usize, offset: usize) -> String {
        self.params.push(Box::new(limit as i64));
        self.params.push(Box::new(offset as i64));
        let n = self.params.len();
        format!(" LIMIT ?{} OFFSET ?{n}", n - 1)
    }

    pub(crate) fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

pub(crate) fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn opt_from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Reads a TEXT column holding one of the `sentinel_common` enums.
pub(crate) fn parse_col<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

pub(crate) fn json_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl sentinel_notify::dispatcher::DispatchStore for AlertStore {
    fn get_rule(&self, rule_id: &str) -> anyhow::Result<Option<sentinel_common::types::AlertRule>> {
        Ok(AlertStore::get_rule(self, rule_id)?)
    }

    fn enabled_channels_for_rule(
        &self,
        rule_id: &str,
    ) -> anyhow::Result<Vec<sentinel_common::types::NotificationChannel>> {
        Ok(AlertStore::enabled_channels_for_rule(self, rule_id)?)
    }

    fn record_channel_outcomes(
        &self,
        outcomes: &[sentinel_notify::dispatcher::ChannelOutcome],
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Ok(AlertStore::record_channel_outcomes(self, outcomes, at)?)
    }

    fn record_alert_notification(
        &self,
        alert_id: &str,
        report: &sentinel_notify::dispatcher::DispatchReport,
    ) -> anyhow::Result<()> {
        Ok(AlertStore::record_alert_notification(self, alert_id, report)?)
    }
}
