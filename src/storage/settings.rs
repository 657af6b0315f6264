//! JSON settings document colocated with the database: UI preferences plus
//! vault credentials. Partial and legacy flat documents are merged over
//! defaults rather than rejected.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub level: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub theme: String,
    pub timezone: String,
    pub notifications: NotificationSettings,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            theme: "system".into(),
            timezone: "Asia/Shanghai".into(),
            notifications: NotificationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub url: String,
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub ui: UiSettings,
    pub vault: VaultSettings,
}

/// File-backed settings store. Writes serialize through a mutex so a patch
/// never clobbers a concurrent patch.
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join("settings.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> SettingsDocument {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return SettingsDocument::default(),
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unreadable settings document at {:?}: {}", self.path, e);
                return SettingsDocument::default();
            }
        };

        if value.get("ui").is_some() || value.get("vault").is_some() {
            return serde_json::from_value(value).unwrap_or_default();
        }

        // Legacy flat document: top-level keys feed both sections.
        let ui = serde_json::from_value(value.clone()).unwrap_or_default();
        let vault = serde_json::from_value(value).unwrap_or_default();
        SettingsDocument { ui, vault }
    }

    pub async fn patch_ui(&self, patch: serde_json::Value) -> Result<UiSettings> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        merge_into(&mut doc.ui, patch)?;
        self.write(&doc)?;
        Ok(doc.ui)
    }

    pub async fn patch_vault(&self, patch: serde_json::Value) -> Result<VaultSettings> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        merge_into(&mut doc.vault, patch)?;
        self.write(&doc)?;
        Ok(doc.vault)
    }

    fn write(&self, doc: &SettingsDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(doc)?)?;
        Ok(())
    }
}

fn merge_into<T: Serialize + for<'de> Deserialize<'de>>(
    target: &mut T,
    patch: serde_json::Value,
) -> Result<()> {
    let mut current = serde_json::to_value(&*target)?;
    if let (Some(base), Some(incoming)) = (current.as_object_mut(), patch.as_object()) {
        for (key, value) in incoming {
            if base.contains_key(key) {
                base.insert(key.clone(), value.clone());
            }
        }
    }
    *target = serde_json::from_value(current)?;
    Ok(())
}
