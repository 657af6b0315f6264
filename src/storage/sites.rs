use anyhow::Result;
use rusqlite::{Row, params};

use super::types::{NewSite, Site, SitePatch};
use super::{Store, json_text, now_iso, parse_json, parse_ts};

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        cookie_domain: row.get(4)?,
        vault_identifier: row.get(5)?,
        plugin_key: row.get(6)?,
        plugin_config: parse_json(row.get(7)?),
        schedule: row.get(8)?,
        notes: row.get(9)?,
        created_at: parse_ts(10, row.get(10)?)?,
        updated_at: parse_ts(11, row.get(11)?)?,
    })
}

const SITE_COLUMNS: &str = "id, name, url, enabled, cookie_domain, vault_identifier, \
     plugin_key, plugin_config, schedule, notes, created_at, updated_at";

impl Store {
    pub async fn create_site(&self, site: NewSite) -> Result<Site> {
        let now = now_iso();
        let id = {
            let db = self.conn().await;
            db.execute(
                "INSERT INTO sites (name, url, enabled, cookie_domain, vault_identifier, \
                 plugin_key, plugin_config, schedule, notes, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    site.name,
                    site.url,
                    site.enabled as i64,
                    site.cookie_domain,
                    site.vault_identifier,
                    site.plugin_key,
                    json_text(&site.plugin_config),
                    site.schedule,
                    site.notes,
                    now,
                    now,
                ],
            )?;
            db.last_insert_rowid()
        };
        self.get_site(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("site {} vanished after insert", id))
    }

    pub async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id], site_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY id"))?;
        let rows = stmt.query_map([], site_from_row)?;
        let mut sites = Vec::new();
        for row in rows {
            sites.push(row?);
        }
        Ok(sites)
    }

    pub async fn list_enabled_sites(&self) -> Result<Vec<Site>> {
        Ok(self
            .list_sites()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    pub async fn update_site(&self, id: i64, patch: SitePatch) -> Result<Option<Site>> {
        let Some(mut site) = self.get_site(id).await? else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            site.name = name;
        }
        if let Some(url) = patch.url {
            site.url = url;
        }
        if let Some(enabled) = patch.enabled {
            site.enabled = enabled;
        }
        if let Some(cookie_domain) = patch.cookie_domain {
            site.cookie_domain = cookie_domain;
        }
        if let Some(vault_identifier) = patch.vault_identifier {
            site.vault_identifier = vault_identifier;
        }
        if let Some(plugin_key) = patch.plugin_key {
            site.plugin_key = plugin_key;
        }
        if let Some(plugin_config) = patch.plugin_config {
            site.plugin_config = plugin_config;
        }
        if let Some(schedule) = patch.schedule {
            site.schedule = schedule;
        }
        if let Some(notes) = patch.notes {
            site.notes = notes;
        }

        let now = now_iso();
        {
            let db = self.conn().await;
            db.execute(
                "UPDATE sites SET name=?1, url=?2, enabled=?3, cookie_domain=?4, \
                 vault_identifier=?5, plugin_key=?6, plugin_config=?7, schedule=?8, \
                 notes=?9, updated_at=?10 WHERE id=?11",
                params![
                    site.name,
                    site.url,
                    site.enabled as i64,
                    site.cookie_domain,
                    site.vault_identifier,
                    site.plugin_key,
                    json_text(&site.plugin_config),
                    site.schedule,
                    site.notes,
                    now,
                    id,
                ],
            )?;
        }
        self.get_site(id).await
    }

    pub async fn delete_site(&self, id: i64) -> Result<bool> {
        let db = self.conn().await;
        let deleted = db.execute("DELETE FROM sites WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}
