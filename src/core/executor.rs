//! Run execution: claim the oldest queued run, resolve its site and
//! plugin, refresh session data from the vault when configured, then
//! drive the plugin lifecycle. The scheduler tick claims one run per
//! beat; a paced fallback worker covers scheduler-off deployments.
//! Every phase leaves a structured log event on the run.

use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::session_cache::{SessionCache, match_domain, normalize_domain};
use crate::core::vault::sync::SyncService;
use crate::plugins::{PluginContext, PluginRegistry, PluginResult};
use crate::storage::Store;
use crate::storage::types::{LogLevel, Run, RunStatus, Site};

pub struct RunExecutor {
    store: Arc<Store>,
    registry: Arc<PluginRegistry>,
    sync: Arc<SyncService>,
    cache: Arc<SessionCache>,
}

struct LifecycleOutcome {
    before: Option<PluginResult>,
    run: Option<PluginResult>,
    after: Option<PluginResult>,
}

impl LifecycleOutcome {
    /// The run-deciding result: a failing pre-hook short-circuits, a
    /// post-hook result overrides, otherwise the run result stands.
    fn verdict(&self) -> PluginResult {
        if let Some(before) = &self.before {
            if !before.ok {
                return before.clone();
            }
        }
        if let Some(after) = &self.after {
            return after.clone();
        }
        match &self.run {
            Some(result) => result.clone(),
            None => PluginResult::failure("Plugin produced no result"),
        }
    }
}

impl RunExecutor {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<PluginRegistry>,
        sync: Arc<SyncService>,
        cache: Arc<SessionCache>,
    ) -> Self {
        Self {
            store,
            registry,
            sync,
            cache,
        }
    }

    /// Claim and execute the oldest queued run. Returns the finalized run,
    /// or `None` when the queue is empty.
    pub async fn execute_next(&self) -> Result<Option<Run>> {
        let Some(run) = self.store.claim_next_run().await? else {
            return Ok(None);
        };
        let finalized = self.execute(run).await?;
        Ok(Some(finalized))
    }

    /// Poll the queue forever, one claim per interval. Used when the
    /// scheduler is disabled; otherwise the scheduler tick drives
    /// execution. Errors are logged and the loop keeps going.
    pub async fn run_worker(self: Arc<Self>, interval: Duration) {
        loop {
            match self.execute_next().await {
                Ok(Some(run)) => {
                    debug!(run_id = run.id, status = run.status.as_str(), "Run finished");
                }
                Ok(None) => {}
                Err(e) => warn!("Run worker error: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn execute(&self, run: Run) -> Result<Run> {
        let run_id = run.id;

        let Some(site) = self.store.get_site(run.site_id).await? else {
            return self.fail(run_id, "Site not found").await;
        };

        let requested_key = run
            .plugin_key
            .clone()
            .or_else(|| site.plugin_key.clone())
            .filter(|key| !key.is_empty());
        let plugin = match requested_key.as_deref() {
            Some(key) => self.registry.get(key).await,
            None => None,
        };
        // A blank key and a key no registered plugin answers to are the
        // same condition from the run's point of view.
        let Some(plugin) = plugin else {
            self.store
                .log_event(
                    Some(run_id),
                    LogLevel::Warning,
                    &format!("Site '{}' has no plugin configured", site.name),
                    "run.unconfigured",
                    json!({ "site_id": site.id, "plugin_key": requested_key }),
                )
                .await;
            return self.fail(run_id, "No plugin configured").await;
        };
        let plugin_key = plugin.descriptor().key;

        self.store
            .log_event(
                Some(run_id),
                LogLevel::Info,
                &format!("Run started for site '{}' with plugin '{}'", site.name, plugin_key),
                "plugin.started",
                json!({ "site_id": site.id, "plugin": plugin_key }),
            )
            .await;

        let (cookies, local_storage, cookie_domain) = self.session_data(&run, &site).await;

        let context = PluginContext {
            run_id,
            site_id: site.id,
            site_name: site.name.clone(),
            site_url: site.url.clone(),
            cookie_domain,
            vault_identifier: site.vault_identifier.clone(),
            config: run
                .plugin_config
                .clone()
                .or_else(|| site.plugin_config.clone())
                .unwrap_or_else(|| json!({})),
            cookies,
            local_storage,
            started_at: run.started_at.unwrap_or_else(Utc::now),
            notes: site.notes.clone(),
        };

        let task_context = context.clone();
        let handle = tokio::spawn(async move {
            let mut outcome = LifecycleOutcome {
                before: None,
                run: None,
                after: None,
            };
            if let Some(gate) = plugin.before_run(&task_context).await {
                let blocked = !gate.ok;
                outcome.before = Some(gate);
                if blocked {
                    return outcome;
                }
            }
            let result = plugin.run(&task_context).await;
            outcome.after = plugin.after_run(&task_context, &result).await;
            outcome.run = Some(result);
            outcome
        });

        let verdict = match handle.await {
            Ok(outcome) => {
                self.log_phases(run_id, &outcome).await;
                outcome.verdict()
            }
            Err(e) => PluginResult::failure(format!("Plugin crashed: {e}")),
        };

        if verdict.ok {
            self.store
                .log_event(
                    Some(run_id),
                    LogLevel::Info,
                    &verdict.message,
                    "run.finished",
                    json!({ "data": Value::Object(verdict.data.clone()) }),
                )
                .await;
            self.store
                .finalize_run(run_id, RunStatus::Success, None, Utc::now())
                .await?;
        } else {
            self.store
                .log_event(
                    Some(run_id),
                    LogLevel::Error,
                    &verdict.message,
                    "run.failed",
                    json!({ "data": Value::Object(verdict.data.clone()) }),
                )
                .await;
            self.store
                .finalize_run(run_id, RunStatus::Failed, Some(&verdict.message), Utc::now())
                .await?;
        }

        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {} vanished during execution", run_id))
    }

    /// Refresh the vault (best effort) and pull the cookies and local
    /// storage matching this site's domain out of the cache.
    async fn session_data(&self, run: &Run, site: &Site) -> (Vec<Value>, Value, Option<String>) {
        let Some(identifier) = site
            .vault_identifier
            .as_deref()
            .filter(|id| !id.is_empty())
        else {
            return (Vec::new(), json!({}), site.cookie_domain.clone());
        };

        let report = self.sync.sync(Some(identifier)).await;
        if report.get("ok").and_then(Value::as_bool) != Some(true) {
            let message = report
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Vault sync failed");
            self.store
                .log_event(
                    Some(run.id),
                    LogLevel::Warning,
                    message,
                    "vault.sync_failed",
                    json!({ "identifier": identifier }),
                )
                .await;
        }

        let domain = match &site.cookie_domain {
            Some(domain) if !domain.is_empty() => Some(normalize_domain(domain)),
            _ => {
                let known = self.cache.known_domains(identifier).await;
                match_domain(&site.url, &known)
            }
        };

        match domain {
            Some(domain) => {
                let cookies = self.cache.domain_cookies(identifier, &domain).await;
                let local_storage = self.cache.domain_local_storage(identifier, &domain).await;
                (cookies, local_storage, Some(domain))
            }
            None => (Vec::new(), json!({}), None),
        }
    }

    async fn log_phases(&self, run_id: i64, outcome: &LifecycleOutcome) {
        for (event, result) in [
            ("plugin.before", &outcome.before),
            ("plugin.run", &outcome.run),
            ("plugin.after", &outcome.after),
        ] {
            if let Some(result) = result {
                let level = if result.ok {
                    LogLevel::Debug
                } else {
                    LogLevel::Warning
                };
                self.store
                    .log_event(
                        Some(run_id),
                        level,
                        &result.message,
                        event,
                        json!({ "ok": result.ok, "data": Value::Object(result.data.clone()) }),
                    )
                    .await;
            }
        }
    }

    async fn fail(&self, run_id: i64, message: &str) -> Result<Run> {
        self.store
            .log_event(
                Some(run_id),
                LogLevel::Error,
                message,
                "run.failed",
                Value::Null,
            )
            .await;
        self.store
            .finalize_run(run_id, RunStatus::Failed, Some(message), Utc::now())
            .await?;
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {} vanished during execution", run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::vault::VaultClient;
    use crate::plugins::{PluginDescriptor, SitePlugin};
    use crate::storage::settings::SettingsStore;
    use crate::storage::types::NewSite;
    use async_trait::async_trait;

    struct FixedPlugin {
        key: &'static str,
        result: fn() -> PluginResult,
    }

    #[async_trait]
    impl SitePlugin for FixedPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor {
                key: self.key.into(),
                name: self.key.into(),
                description: String::new(),
                version: "1.0".into(),
                category: "general".into(),
                config_schema: Vec::new(),
            }
        }

        async fn run(&self, _context: &PluginContext) -> PluginResult {
            (self.result)()
        }
    }

    struct PanicPlugin;

    #[async_trait]
    impl SitePlugin for PanicPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor {
                key: "boom".into(),
                name: "Boom".into(),
                description: String::new(),
                version: "1.0".into(),
                category: "general".into(),
                config_schema: Vec::new(),
            }
        }

        async fn run(&self, _context: &PluginContext) -> PluginResult {
            panic!("scripted explosion");
        }
    }

    async fn executor_with(dir: &std::path::Path, plugins: Vec<Arc<dyn SitePlugin>>) -> (RunExecutor, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let registry = Arc::new(PluginRegistry::new(Box::new(Vec::new), Vec::new()));
        for plugin in plugins {
            registry.register(plugin).await;
        }
        let cache = Arc::new(SessionCache::new(dir));
        let settings = Arc::new(SettingsStore::new(dir));
        let config = Arc::new(Config::for_tests(dir));
        let client = VaultClient::new(Duration::from_secs(2), true).unwrap();
        let sync = Arc::new(SyncService::new(client, cache.clone(), settings, config));
        (
            RunExecutor::new(store.clone(), registry, sync, cache),
            store,
        )
    }

    fn site(name: &str, plugin_key: Option<&str>) -> NewSite {
        NewSite {
            name: name.into(),
            url: format!("https://{name}.example.com"),
            enabled: true,
            cookie_domain: None,
            vault_identifier: None,
            plugin_key: plugin_key.map(String::from),
            plugin_config: None,
            schedule: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn empty_queue_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _store) = executor_with(dir.path(), Vec::new()).await;
        assert!(executor.execute_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn successful_run_is_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) = executor_with(
            dir.path(),
            vec![Arc::new(FixedPlugin {
                key: "echo",
                result: || PluginResult::success("done"),
            })],
        )
        .await;
        let created = store.create_site(site("a", Some("echo"))).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.error.is_none());
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn missing_site_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) = executor_with(dir.path(), Vec::new()).await;
        store.enqueue_run(999, None, None).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("Site not found"));
    }

    #[tokio::test]
    async fn missing_plugin_key_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) = executor_with(dir.path(), Vec::new()).await;
        let created = store.create_site(site("bare", None)).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("No plugin configured"));
    }

    #[tokio::test]
    async fn unknown_plugin_key_fails_like_a_missing_one() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) = executor_with(dir.path(), Vec::new()).await;
        let created = store.create_site(site("s", Some("ghost"))).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("No plugin configured"));

        let logs = store.list_logs(Some(run.id), 50).await.unwrap();
        let warning = logs
            .iter()
            .find(|l| l.event.as_deref() == Some("run.unconfigured"))
            .unwrap();
        assert_eq!(warning.level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn plugin_panic_becomes_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) =
            executor_with(dir.path(), vec![Arc::new(PanicPlugin)]).await;
        let created = store.create_site(site("boomy", Some("boom"))).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().starts_with("Plugin crashed:"));
    }

    #[tokio::test]
    async fn failed_plugin_result_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, store) = executor_with(
            dir.path(),
            vec![Arc::new(FixedPlugin {
                key: "nope",
                result: || PluginResult::failure("credentials rejected"),
            })],
        )
        .await;
        let created = store.create_site(site("n", Some("nope"))).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        let run = executor.execute_next().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("credentials rejected"));

        let logs = store.list_logs(Some(run.id), 50).await.unwrap();
        assert!(logs.iter().any(|l| l.event.as_deref() == Some("run.failed")));
    }
}
