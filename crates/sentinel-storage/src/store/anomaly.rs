use chrono::{DateTime, Utc};
use rusqlite::params;
use sentinel_common::types::AnomalyDetection;

use super::{from_ms, opt_from_ms, to_ms, AlertStore, Where};
use crate::error::Result;
use crate::{AnomalyFilter, AnomalySource};

const ANOMALY_COLUMNS: &str = "log_id, is_anomaly, anomaly_score, confidence, model_version, \
    features, detected_at, level, message, service, log_timestamp";

fn row_to_anomaly(row: &rusqlite::Row) -> rusqlite::Result<AnomalyDetection> {
    Ok(AnomalyDetection {
        log_id: row.get(0)?,
        is_anomaly: row.get::<_, i32>(1)? != 0,
        anomaly_score: row.get(2)?,
        confidence: row.get(3)?,
        model_version: row.get(4)?,
        features: row.get(5)?,
        detected_at: from_ms(row.get(6)?),
        level: row.get(7)?,
        message: row.get(8)?,
        service: row.get(9)?,
        log_timestamp: opt_from_ms(row.get(10)?),
    })
}

fn anomaly_where(filter: &AnomalyFilter) -> Where {
    let mut w = Where::default();
    if let Some(from) = filter.detected_from {
        w.eq("detected_at >=", to_ms(from));
    }
    if let Some(to) = filter.detected_to {
        w.eq("detected_at <", to_ms(to));
    }
    if filter.anomalous_only {
        w.raw("is_anomaly = 1");
    }
    if let Some(min) = filter.min_confidence {
        w.eq("confidence >=", min);
    }
    if let Some(min) = filter.min_score {
        w.eq("anomaly_score >=", min);
    }
    if filter.unprocessed_only {
        w.raw(
            "NOT EXISTS (SELECT 1 FROM alerts a \
             WHERE a.anomaly_detection_id = anomaly_detections.log_id)",
        );
    }
    w
}

impl AlertStore {
    /// Writes one scored record. The scoring pipeline owns this table in
    /// production; the service itself only uses this for seeding.
    pub fn insert_anomaly(&self, anomaly: &AnomalyDetection) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO anomaly_detections ({ANOMALY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                anomaly.log_id,
                anomaly.is_anomaly as i32,
                anomaly.anomaly_score,
                anomaly.confidence,
                anomaly.model_version,
                anomaly.features,
                to_ms(anomaly.detected_at),
                anomaly.level,
                anomaly.message,
                anomaly.service,
                anomaly.log_timestamp.map(to_ms),
            ],
        )?;
        Ok(())
    }

    /// Oldest first, at most `limit` rows.
    pub fn list_anomalies(&self, filter: &AnomalyFilter, limit: usize) -> Result<Vec<AnomalyDetection>> {
        let mut w = anomaly_where(filter);
        let where_sql = w.sql();
        let page = w.page(limit, 0);
        let sql = format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomaly_detections{where_sql} \
             ORDER BY detected_at ASC, log_id ASC{page}"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(w.params().as_slice(), row_to_anomaly)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_anomalies(&self, filter: &AnomalyFilter) -> Result<u64> {
        self.count_where("anomaly_detections", &anomaly_where(filter))
    }
}

impl AnomalySource for AlertStore {
    fn find_unprocessed_anomalies(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<AnomalyDetection>> {
        let filter = AnomalyFilter {
            detected_from: Some(since),
            anomalous_only: true,
            unprocessed_only: true,
            ..Default::default()
        };
        Ok(self.list_anomalies(&filter, limit)?)
    }

    fn find_critical_anomalies(
        &self,
        min_confidence: f64,
        min_score: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<AnomalyDetection>> {
        let filter = AnomalyFilter {
            detected_from: Some(since),
            anomalous_only: true,
            min_confidence: Some(min_confidence),
            min_score: Some(min_score),
            ..Default::default()
        };
        Ok(self.list_anomalies(&filter, limit)?)
    }

    fn count_anomalies_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> anyhow::Result<u64> {
        let filter = AnomalyFilter {
            detected_from: Some(start),
            detected_to: Some(end),
            anomalous_only: true,
            ..Default::default()
        };
        Ok(self.count_anomalies(&filter)?)
    }

    fn count_unprocessed_anomalies(&self, since: DateTime<Utc>) -> anyhow::Result<u64> {
        let filter = AnomalyFilter {
            detected_from: Some(since),
            anomalous_only: true,
            unprocessed_only: true,
            ..Default::default()
        };
        Ok(self.count_anomalies(&filter)?)
    }
}
