use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use super::types::{Run, RunStatus};
use super::{Store, json_text, now_iso, parse_json, parse_opt_ts, parse_ts};

const RUN_COLUMNS: &str =
    "id, site_id, status, started_at, finished_at, error, plugin_key, plugin_config, created_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(2)?;
    Ok(Run {
        id: row.get(0)?,
        site_id: row.get(1)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        started_at: parse_opt_ts(3, row.get(3)?)?,
        finished_at: parse_opt_ts(4, row.get(4)?)?,
        error: row.get(5)?,
        plugin_key: row.get(6)?,
        plugin_config: parse_json(row.get(7)?),
        created_at: parse_ts(8, row.get(8)?)?,
    })
}

impl Store {
    /// Queue a run, carrying plugin overrides resolved at enqueue time.
    pub async fn enqueue_run(
        &self,
        site_id: i64,
        plugin_key: Option<String>,
        plugin_config: Option<serde_json::Value>,
    ) -> Result<Run> {
        let now = now_iso();
        let id = {
            let db = self.conn().await;
            db.execute(
                "INSERT INTO runs (site_id, status, plugin_key, plugin_config, created_at) \
                 VALUES (?1, 'queued', ?2, ?3, ?4)",
                params![site_id, plugin_key, json_text(&plugin_config), now],
            )?;
            db.last_insert_rowid()
        };
        self.get_run(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {} vanished after insert", id))
    }

    /// Queue a run for a site, snapshotting the site's plugin key/config.
    pub async fn enqueue_run_for_site(&self, site_id: i64) -> Result<Run> {
        let site = self.get_site(site_id).await?;
        let (plugin_key, plugin_config) = match site {
            Some(s) => (s.plugin_key, s.plugin_config),
            None => (None, None),
        };
        self.enqueue_run(site_id, plugin_key, plugin_config).await
    }

    /// Claim the oldest queued run, flipping it to `running` in one
    /// conditional UPDATE. Concurrent claimants observe either the row
    /// already running (no match) or no queued rows at all, so a run is
    /// handed out at most once.
    pub async fn claim_next_run(&self) -> Result<Option<Run>> {
        let started = now_iso();
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "UPDATE runs SET status='running', started_at=?1 \
             WHERE id = (SELECT id FROM runs WHERE status='queued' ORDER BY id LIMIT 1) \
             AND status='queued' \
             RETURNING {RUN_COLUMNS}"
        ))?;
        let mut rows = stmt.query_map([started], run_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub async fn finalize_run(
        &self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.conn().await;
        db.execute(
            "UPDATE runs SET status=?1, error=?2, finished_at=?3 WHERE id=?4",
            params![
                status.as_str(),
                error,
                finished_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                id
            ],
        )?;
        Ok(())
    }

    pub async fn get_run(&self, id: i64) -> Result<Option<Run>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id], run_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub async fn list_runs(&self, site_id: Option<i64>, limit: usize) -> Result<Vec<Run>> {
        let db = self.conn().await;
        let mut runs = Vec::new();
        match site_id {
            Some(site) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE site_id = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![site, limit as i64], run_from_row)?;
                for row in rows {
                    runs.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit as i64], run_from_row)?;
                for row in rows {
                    runs.push(row?);
                }
            }
        }
        Ok(runs)
    }

    pub async fn delete_run(&self, id: i64) -> Result<bool> {
        let db = self.conn().await;
        let deleted = db.execute("DELETE FROM runs WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn enqueue_then_claim_oldest_first() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.enqueue_run(1, Some("echo".into()), None).await.unwrap();
        let second = store.enqueue_run(2, None, None).await.unwrap();
        assert_eq!(first.status, RunStatus::Queued);

        let claimed = store.claim_next_run().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, RunStatus::Running);
        assert!(claimed.started_at.is_some());

        let next = store.claim_next_run().await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
        assert!(store.claim_next_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_at_most_once_under_concurrency() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store.enqueue_run(1, None, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next_run().await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn finalize_records_outcome() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.enqueue_run(1, None, None).await.unwrap();
        store.claim_next_run().await.unwrap().unwrap();
        store
            .finalize_run(run.id, RunStatus::Failed, Some("Site not found"), Utc::now())
            .await
            .unwrap();

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("Site not found"));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn list_runs_filters_by_site() {
        let store = Store::open_in_memory().await.unwrap();
        store.enqueue_run(1, None, None).await.unwrap();
        store.enqueue_run(2, None, None).await.unwrap();
        store.enqueue_run(1, None, None).await.unwrap();

        let all = store.list_runs(None, 50).await.unwrap();
        assert_eq!(all.len(), 3);
        let site_one = store.list_runs(Some(1), 50).await.unwrap();
        assert_eq!(site_one.len(), 2);
    }

    #[tokio::test]
    async fn enqueue_for_site_snapshots_plugin_settings() {
        let store = Store::open_in_memory().await.unwrap();
        let site = store
            .create_site(crate::storage::types::NewSite {
                name: "s".into(),
                url: "https://s.example.com".into(),
                enabled: true,
                cookie_domain: None,
                vault_identifier: None,
                plugin_key: Some("http-check".into()),
                plugin_config: Some(serde_json::json!({"method": "GET"})),
                schedule: None,
                notes: None,
            })
            .await
            .unwrap();

        let run = store.enqueue_run_for_site(site.id).await.unwrap();
        assert_eq!(run.plugin_key.as_deref(), Some("http-check"));
        assert_eq!(run.plugin_config.unwrap()["method"], "GET");
    }
}
