//! Site automation plugins: a capability set of optional pre-hook, required
//! run, optional post-hook. Built-ins and stored-source custom plugins are
//! two implementations of the same trait, resolved through one registry.

pub mod builtin;
pub mod custom;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct PluginResult {
    pub ok: bool,
    pub message: String,
    pub data: serde_json::Map<String, Value>,
}

impl PluginResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

/// Everything a plugin invocation may see. Built per run, discarded after.
#[derive(Debug, Clone, Serialize)]
pub struct PluginContext {
    pub run_id: i64,
    pub site_id: i64,
    pub site_name: String,
    pub site_url: String,
    pub cookie_domain: Option<String>,
    pub vault_identifier: Option<String>,
    pub config: Value,
    pub cookies: Vec<Value>,
    pub local_storage: Value,
    pub started_at: DateTime<Utc>,
    pub notes: Option<String>,
}

fn default_field_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub config_schema: Vec<ConfigField>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

#[async_trait]
pub trait SitePlugin: Send + Sync {
    fn descriptor(&self) -> PluginDescriptor;

    async fn before_run(&self, _context: &PluginContext) -> Option<PluginResult> {
        None
    }

    async fn run(&self, context: &PluginContext) -> PluginResult;

    async fn after_run(
        &self,
        _context: &PluginContext,
        _result: &PluginResult,
    ) -> Option<PluginResult> {
        None
    }
}

/// Process-scoped registry keyed by plugin key; last registration wins.
/// Reload rebuilds the whole map and swaps it in atomically so readers never
/// observe a half-populated registry.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn SitePlugin>>>,
    builtin_factory: Box<dyn Fn() -> Vec<Arc<dyn SitePlugin>> + Send + Sync>,
    custom_dirs: Vec<PathBuf>,
}

impl PluginRegistry {
    pub fn new(
        builtin_factory: Box<dyn Fn() -> Vec<Arc<dyn SitePlugin>> + Send + Sync>,
        custom_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            builtin_factory,
            custom_dirs,
        }
    }

    pub async fn register(&self, plugin: Arc<dyn SitePlugin>) {
        let key = plugin.descriptor().key;
        info!("Registering plugin: {}", key);
        self.plugins.write().await.insert(key, plugin);
    }

    pub async fn get(&self, key: &str) -> Option<Arc<dyn SitePlugin>> {
        if key.is_empty() {
            return None;
        }
        self.plugins.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<PluginDescriptor> {
        let mut descriptors: Vec<PluginDescriptor> = self
            .plugins
            .read()
            .await
            .values()
            .map(|p| p.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }

    /// Rebuild from built-ins plus every persisted custom descriptor, then
    /// swap the new map in.
    pub async fn reload(&self) -> usize {
        let mut fresh: HashMap<String, Arc<dyn SitePlugin>> = HashMap::new();
        for plugin in (self.builtin_factory)() {
            fresh.insert(plugin.descriptor().key, plugin);
        }
        for spec in custom::load_custom_specs(&self.custom_dirs) {
            let plugin = Arc::new(custom::CustomPlugin::new(spec));
            fresh.insert(plugin.descriptor().key, plugin as Arc<dyn SitePlugin>);
        }
        let count = fresh.len();
        *self.plugins.write().await = fresh;
        info!("Plugin registry reloaded with {} plugins", count);
        count
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> PluginContext {
    PluginContext {
        run_id: 1,
        site_id: 1,
        site_name: "Example".into(),
        site_url: "https://example.com".into(),
        cookie_domain: Some("example.com".into()),
        vault_identifier: None,
        config: serde_json::json!({}),
        cookies: Vec::new(),
        local_storage: serde_json::json!({}),
        started_at: Utc::now(),
        notes: None,
    }
}
