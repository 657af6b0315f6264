mod logs;
mod runs;
pub mod settings;
mod sites;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// SQLite-backed store for sites, runs and log entries. All access funnels
/// through one connection behind a mutex; the run-claim statement relies on
/// that plus a conditional UPDATE for at-most-once semantics.
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }
        let db_path = data_dir.join("punchcard.db");
        let db = Connection::open(&db_path)?;
        let store = Self {
            db: Arc::new(Mutex::new(db)),
        };
        store.init_schema().await?;
        info!("Store opened at {:?}", db_path);
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        let store = Self {
            db: Arc::new(Mutex::new(db)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                cookie_domain TEXT,
                vault_identifier TEXT,
                plugin_key TEXT,
                plugin_config TEXT,
                schedule TEXT,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                plugin_key TEXT,
                plugin_config TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER,
                level TEXT NOT NULL DEFAULT 'info',
                message TEXT NOT NULL,
                event TEXT,
                payload TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status, id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_log_entries_run ON log_entries (run_id, id)",
            [],
        )?;
        Ok(())
    }

    pub(crate) async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.db.lock().await
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(idx, r)).transpose()
}

pub(crate) fn json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

pub(crate) fn parse_json(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|r| serde_json::from_str(&r).ok())
}
