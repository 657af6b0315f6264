use anyhow::Result;
use rusqlite::{Row, params};
use tracing::{debug, error, info, warn};

use super::types::{LogEntry, LogLevel};
use super::{Store, now_iso, parse_json, parse_ts};

const LOG_COLUMNS: &str = "id, run_id, level, message, event, payload, created_at";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let level: String = row.get(2)?;
    Ok(LogEntry {
        id: row.get(0)?,
        run_id: row.get(1)?,
        level: LogLevel::parse(&level),
        message: row.get(3)?,
        event: row.get(4)?,
        payload: parse_json(row.get(5)?),
        created_at: parse_ts(6, row.get(6)?)?,
    })
}

impl Store {
    pub async fn append_log(
        &self,
        run_id: Option<i64>,
        level: LogLevel,
        message: &str,
        event: Option<&str>,
        payload: Option<serde_json::Value>,
    ) -> Result<LogEntry> {
        let now = now_iso();
        let id = {
            let db = self.conn().await;
            db.execute(
                "INSERT INTO log_entries (run_id, level, message, event, payload, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    level.as_str(),
                    message,
                    event,
                    payload.as_ref().map(|p| p.to_string()),
                    now
                ],
            )?;
            db.last_insert_rowid()
        };
        self.get_log(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("log entry {} vanished after insert", id))
    }

    /// Append-only structured event: persisted row plus a tracing record at
    /// the matching level.
    pub async fn log_event(
        &self,
        run_id: Option<i64>,
        level: LogLevel,
        message: &str,
        event: &str,
        payload: serde_json::Value,
    ) {
        match level {
            LogLevel::Debug => debug!(event, "{}", message),
            LogLevel::Info => info!(event, "{}", message),
            LogLevel::Warning => warn!(event, "{}", message),
            LogLevel::Error => error!(event, "{}", message),
        }
        if let Err(e) = self
            .append_log(run_id, level, message, Some(event), Some(payload))
            .await
        {
            warn!("Failed to persist log event '{}': {}", event, e);
        }
    }

    pub async fn get_log(&self, id: i64) -> Result<Option<LogEntry>> {
        let db = self.conn().await;
        let mut stmt =
            db.prepare(&format!("SELECT {LOG_COLUMNS} FROM log_entries WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id], log_from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Most recent `limit` entries, returned oldest-first.
    pub async fn list_logs(&self, run_id: Option<i64>, limit: usize) -> Result<Vec<LogEntry>> {
        let db = self.conn().await;
        let mut entries = Vec::new();
        match run_id {
            Some(run) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM log_entries WHERE run_id = ?1 \
                     ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![run, limit as i64], log_from_row)?;
                for row in rows {
                    entries.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM log_entries ORDER BY id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit as i64], log_from_row)?;
                for row in rows {
                    entries.push(row?);
                }
            }
        }
        entries.reverse();
        Ok(entries)
    }

    /// Entries with id greater than `after_id`, ascending. Drives the
    /// poll-based log stream.
    pub async fn tail_logs(&self, after_id: i64, run_id: Option<i64>) -> Result<Vec<LogEntry>> {
        let db = self.conn().await;
        let mut entries = Vec::new();
        match run_id {
            Some(run) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM log_entries WHERE id > ?1 AND run_id = ?2 ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![after_id, run], log_from_row)?;
                for row in rows {
                    entries.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM log_entries WHERE id > ?1 ORDER BY id"
                ))?;
                let rows = stmt.query_map([after_id], log_from_row)?;
                for row in rows {
                    entries.push(row?);
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_list_oldest_first() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .append_log(None, LogLevel::Info, "first", None, None)
            .await
            .unwrap();
        store
            .append_log(Some(7), LogLevel::Error, "second", Some("run.failed"), None)
            .await
            .unwrap();

        let all = store.list_logs(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "first");
        assert_eq!(all[1].event.as_deref(), Some("run.failed"));

        let scoped = store.list_logs(Some(7), 10).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn tail_returns_only_newer_entries() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store
            .append_log(None, LogLevel::Info, "a", None, None)
            .await
            .unwrap();
        store
            .append_log(None, LogLevel::Info, "b", None, None)
            .await
            .unwrap();

        let tail = store.tail_logs(first.id, None).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "b");
        assert!(store.tail_logs(tail[0].id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let entry = store
            .append_log(
                None,
                LogLevel::Info,
                "with payload",
                Some("cron.scheduled"),
                Some(serde_json::json!({"site_id": 3, "cron": "*/5 * * * *"})),
            )
            .await
            .unwrap();
        let stored = store.get_log(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.payload.unwrap()["site_id"], 3);
    }

    #[tokio::test]
    async fn unknown_level_defaults_to_info() {
        assert_eq!(LogLevel::parse("verbose"), LogLevel::Info);
    }
}
