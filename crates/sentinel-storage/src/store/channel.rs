use chrono::{DateTime, Utc};
use rusqlite::params;
use sentinel_common::types::{ChannelType, NotificationChannel};
use sentinel_notify::dispatcher::ChannelOutcome;
use serde_json::Value;

use super::{from_ms, json_col, opt_from_ms, parse_col, to_ms, AlertStore, Where};
use crate::error::{is_foreign_key_violation, Result, StorageError};
use crate::{ChannelFilter, ChannelTypeStats};

const CHANNEL_COLUMNS: &str = "id, rule_id, name, channel_type, enabled, config, success_count, \
    failure_count, last_success_at, last_failure_at, created_at, updated_at";

fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<NotificationChannel> {
    let success: i64 = row.get(6)?;
    let failure: i64 = row.get(7)?;
    Ok(NotificationChannel {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        name: row.get(2)?,
        channel_type: parse_col(row, 3)?,
        enabled: row.get::<_, i32>(4)? != 0,
        config: json_col(row, 5)?.unwrap_or(Value::Null),
        success_count: success as u64,
        failure_count: failure as u64,
        last_success_at: opt_from_ms(row.get(8)?),
        last_failure_at: opt_from_ms(row.get(9)?),
        created_at: from_ms(row.get(10)?),
        updated_at: from_ms(row.get(11)?),
    })
}

fn channel_where(filter: &ChannelFilter) -> Where {
    let mut w = Where::default();
    if let Some(channel_type) = filter.channel_type {
        w.eq("channel_type =", channel_type.as_str());
    }
    if let Some(enabled) = filter.enabled {
        w.eq("enabled =", enabled as i32);
    }
    if let Some(rule_id) = &filter.rule_id {
        w.eq("rule_id =", rule_id.clone());
    }
    w
}

impl AlertStore {
    /// Inserts a channel; an unknown `rule_id` yields [`StorageError::ForeignKey`].
    pub fn insert_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let config = serde_json::to_string(&channel.config)?;
        let conn = self.conn();
        let result = conn.execute(
            &format!(
                "INSERT INTO notification_channels ({CHANNEL_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                channel.id,
                channel.rule_id,
                channel.name,
                channel.channel_type.as_str(),
                channel.enabled as i32,
                config,
                channel.success_count as i64,
                channel.failure_count as i64,
                channel.last_success_at.map(to_ms),
                channel.last_failure_at.map(to_ms),
                to_ms(channel.created_at),
                to_ms(channel.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(StorageError::ForeignKey {
                entity: "notification_channel",
                id: channel.id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<NotificationChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], row_to_channel)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_channels(
        &self,
        filter: &ChannelFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationChannel>> {
        let mut w = channel_where(filter);
        let where_sql = w.sql();
        let page = w.page(limit, offset);
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels{where_sql} ORDER BY created_at DESC, id DESC{page}"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(w.params().as_slice(), row_to_channel)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_channels(&self, filter: &ChannelFilter) -> Result<u64> {
        self.count_where("notification_channels", &channel_where(filter))
    }

    pub fn enabled_channels_for_rule(&self, rule_id: &str) -> Result<Vec<NotificationChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels \
             WHERE rule_id = ?1 AND enabled = 1 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![rule_id], row_to_channel)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Rewrites name, type, enabled flag and config. Counters are left alone.
    pub fn update_channel(&self, channel: &NotificationChannel) -> Result<bool> {
        let config = serde_json::to_string(&channel.config)?;
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE notification_channels SET name = ?2, channel_type = ?3, enabled = ?4, \
             config = ?5, updated_at = ?6 WHERE id = ?1",
            params![
                channel.id,
                channel.name,
                channel.channel_type.as_str(),
                channel.enabled as i32,
                config,
                to_ms(channel.updated_at),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn set_channel_enabled(&self, id: &str, enabled: bool, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE notification_channels SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, enabled as i32, to_ms(now)],
        )?;
        Ok(n > 0)
    }

    pub fn delete_channel(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM notification_channels WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Applies one delivery result per channel: a counter bump and a stamp.
    pub fn record_channel_outcomes(&self, outcomes: &[ChannelOutcome], at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let ts = to_ms(at);
        for outcome in outcomes {
            let sql = if outcome.success {
                "UPDATE notification_channels SET success_count = success_count + 1, \
                 last_success_at = ?2, updated_at = ?2 WHERE id = ?1"
            } else {
                "UPDATE notification_channels SET failure_count = failure_count + 1, \
                 last_failure_at = ?2, updated_at = ?2 WHERE id = ?1"
            };
            conn.execute(sql, params![outcome.channel_id, ts])?;
        }
        Ok(())
    }

    /// Totals per channel type, one entry for every type even when empty.
    pub fn channel_type_stats(&self) -> Result<Vec<ChannelTypeStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_type, COUNT(*), COALESCE(SUM(enabled), 0), \
             COALESCE(SUM(success_count), 0), COALESCE(SUM(failure_count), 0) \
             FROM notification_channels GROUP BY channel_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChannelTypeStats {
                channel_type: parse_col(row, 0)?,
                total: row.get::<_, i64>(1)? as u64,
                enabled: row.get::<_, i64>(2)? as u64,
                success_count: row.get::<_, i64>(3)? as u64,
                failure_count: row.get::<_, i64>(4)? as u64,
            })
        })?;
        let found = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ChannelType::ALL
            .iter()
            .map(|kind| {
                found
                    .iter()
                    .find(|s| s.channel_type == *kind)
                    .cloned()
                    .unwrap_or(ChannelTypeStats {
                        channel_type: *kind,
                        total: 0,
                        enabled: 0,
                        success_count: 0,
                        failure_count: 0,
                    })
            })
            .collect())
    }
}
