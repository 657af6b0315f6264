//! Custom plugins persisted as JSON descriptors with an embedded Rhai
//! script. Scripts run in a restricted engine with an operation cap, so a
//! runaway or hostile script degrades into a failed run instead of taking
//! the process down.

use rhai::{AST, Dynamic, Engine, EvalAltResult, Map, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{ConfigField, PluginContext, PluginDescriptor, PluginResult, SitePlugin};

const MAX_SCRIPT_OPERATIONS: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPluginSpec {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "super::default_version")]
    pub version: String,
    #[serde(default = "super::default_category")]
    pub category: String,
    #[serde(default)]
    pub config_schema: Vec<ConfigField>,
    pub source: String,
}

/// A stored-source plugin. The script must define `run(context)`; it may
/// return a map (`ok`, `message`, optional `data`), a string, or a bool.
pub struct CustomPlugin {
    spec: CustomPluginSpec,
    engine: Engine,
    compiled: Result<AST, String>,
}

impl CustomPlugin {
    pub fn new(spec: CustomPluginSpec) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_SCRIPT_OPERATIONS);
        engine.register_fn("ok", |message: &str| {
            let mut map = Map::new();
            map.insert("ok".into(), Dynamic::from(true));
            map.insert("message".into(), Dynamic::from(message.to_string()));
            map
        });
        engine.register_fn("fail", |message: &str| {
            let mut map = Map::new();
            map.insert("ok".into(), Dynamic::from(false));
            map.insert("message".into(), Dynamic::from(message.to_string()));
            map
        });

        let compiled = engine
            .compile(&spec.source)
            .map_err(|e| format!("Plugin error: {e}"));
        Self {
            spec,
            engine,
            compiled,
        }
    }

    fn interpret(&self, value: Dynamic) -> PluginResult {
        let json: Value = match rhai::serde::from_dynamic(&value) {
            Ok(v) => v,
            Err(e) => return PluginResult::failure(format!("Plugin error: {e}")),
        };
        match json {
            Value::Object(map) => {
                let ok = map.get("ok").and_then(Value::as_bool).unwrap_or(true);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(if ok { "Completed" } else { "Failed" })
                    .to_string();
                let data = map
                    .get("data")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                PluginResult { ok, message, data }
            }
            Value::String(message) => PluginResult::success(message),
            Value::Bool(ok) => {
                if ok {
                    PluginResult::success("Completed")
                } else {
                    PluginResult::failure("Failed")
                }
            }
            other => PluginResult::success(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl SitePlugin for CustomPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            key: self.spec.key.clone(),
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            version: self.spec.version.clone(),
            category: self.spec.category.clone(),
            config_schema: self.spec.config_schema.clone(),
        }
    }

    async fn run(&self, context: &PluginContext) -> PluginResult {
        let ast = match &self.compiled {
            Ok(ast) => ast,
            Err(message) => return PluginResult::failure(message.clone()),
        };
        let arg = match rhai::serde::to_dynamic(context) {
            Ok(d) => d,
            Err(e) => return PluginResult::failure(format!("Plugin error: {e}")),
        };
        let mut scope = Scope::new();
        match self
            .engine
            .call_fn::<Dynamic>(&mut scope, ast, "run", (arg,))
        {
            Ok(value) => self.interpret(value),
            Err(e) => match *e {
                EvalAltResult::ErrorFunctionNotFound(ref name, _) if name.starts_with("run") => {
                    PluginResult::failure("run() not defined in plugin code")
                }
                other => PluginResult::failure(format!("Plugin error: {other}")),
            },
        }
    }
}

/// Load every `*.json` descriptor under the given directories. Unreadable
/// or malformed files are skipped with a warning rather than failing the
/// whole reload.
pub fn load_custom_specs(dirs: &[PathBuf]) -> Vec<CustomPluginSpec> {
    let mut specs = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            match read_spec(&path) {
                Ok(spec) => specs.push(spec),
                Err(e) => warn!("Skipping custom plugin {}: {}", path.display(), e),
            }
        }
    }
    specs
}

fn read_spec(path: &Path) -> anyhow::Result<CustomPluginSpec> {
    let raw = std::fs::read_to_string(path)?;
    let spec: CustomPluginSpec = serde_json::from_str(&raw)?;
    if spec.key.trim().is_empty() {
        anyhow::bail!("descriptor has an empty key");
    }
    Ok(spec)
}

/// Persist a descriptor as `<key>.json` under the primary custom plugin
/// directory, creating it if needed.
pub fn save_custom_spec(dir: &Path, spec: &CustomPluginSpec) -> anyhow::Result<PathBuf> {
    if spec.key.trim().is_empty() {
        anyhow::bail!("Plugin key must not be empty");
    }
    if !spec
        .key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("Plugin key may only contain letters, digits, '-' and '_'");
    }
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", spec.key));
    std::fs::write(&path, serde_json::to_string_pretty(spec)?)?;
    Ok(path)
}

pub fn delete_custom_spec(dir: &Path, key: &str) -> anyhow::Result<bool> {
    let path = dir.join(format!("{key}.json"));
    if path.exists() {
        std::fs::remove_file(&path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
