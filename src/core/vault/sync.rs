//! Sync orchestration: pulls decrypted session data through the vault
//! client, diffs each identifier against the local cache fingerprint, and
//! persists only what actually changed.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::{VaultClient, VaultConfig};
use crate::core::config::Config;
use crate::core::session_cache::{SessionCache, content_hash};
use crate::storage::settings::SettingsStore;

pub struct SyncService {
    client: VaultClient,
    cache: Arc<SessionCache>,
    settings: Arc<SettingsStore>,
    config: Arc<Config>,
}

impl SyncService {
    pub fn new(
        client: VaultClient,
        cache: Arc<SessionCache>,
        settings: Arc<SettingsStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            client,
            cache,
            settings,
            config,
        }
    }

    /// Vault credentials from the settings document, falling back to the
    /// environment-derived config per field.
    fn resolve_vault_config(&self) -> VaultConfig {
        let stored = self.settings.load().vault;
        let pick = |from_settings: String, from_env: &str| -> String {
            if from_settings.trim().is_empty() {
                from_env.to_string()
            } else {
                from_settings
            }
        };
        VaultConfig {
            url: pick(stored.url, &self.config.vault_url),
            identifiers: pick(stored.identifier, &self.config.vault_identifiers),
            password: pick(stored.password, &self.config.vault_password),
        }
    }

    /// Run a sync and fold the outcome into the cache. The report is the
    /// client's, augmented per identifier with `hash`/`changed`, plus
    /// `cache_updated` and a safe post-sync cache snapshot.
    pub async fn sync(&self, identifier: Option<&str>) -> Value {
        let vault_config = self.resolve_vault_config();
        let mut report = self.client.sync(&vault_config, identifier).await;
        if !report.ok {
            return serde_json::to_value(&report).unwrap_or_else(|_| Value::Null);
        }

        let mut cache_updated = false;
        for result in report.results.iter_mut().filter(|r| r.ok) {
            let cookie_data = result
                .cookie_data
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            let local_storage = result
                .local_storage_data
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

            let new_hash = content_hash(&cookie_data, &local_storage);
            let previous = self.cache.stored_hash(&result.identifier).await;
            let changed = previous.as_deref() != Some(new_hash.as_str());
            if changed {
                cache_updated = true;
            }

            if let Err(e) = self
                .cache
                .upsert_snapshot(
                    &result.identifier,
                    &cookie_data,
                    &local_storage,
                    &new_hash,
                    changed,
                )
                .await
            {
                warn!("Cache update failed for {}: {}", result.identifier, e);
            }

            result.hash = Some(new_hash);
            result.changed = Some(changed);
        }

        let mut value = serde_json::to_value(&report).unwrap_or_else(|_| Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.insert("cache_updated".to_string(), Value::Bool(cache_updated));
            map.insert("cache".to_string(), self.cache.status().await);
        }
        value
    }

    /// Safe cache summary for the read-only status endpoint.
    pub async fn status(&self) -> Value {
        self.cache.status().await
    }
}
