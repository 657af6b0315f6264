mod core;
mod interfaces;
mod logging;
mod plugins;
mod storage;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::config::Config;
use crate::core::executor::RunExecutor;
use crate::core::scheduler::Scheduler;
use crate::core::session_cache::SessionCache;
use crate::core::vault::VaultClient;
use crate::core::vault::sync::SyncService;
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::plugins::PluginRegistry;
use crate::storage::Store;
use crate::storage::settings::SettingsStore;

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(e) = run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(Config::from_env());
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(Store::open(&config.data_dir).await?);
    let settings = Arc::new(SettingsStore::new(&config.data_dir));
    let cache = Arc::new(SessionCache::new(&config.data_dir));

    let client = VaultClient::new(config.request_timeout, config.verify_tls)?;
    let sync = Arc::new(SyncService::new(
        client,
        cache.clone(),
        settings.clone(),
        config.clone(),
    ));

    let registry = {
        let timeout = config.request_timeout;
        let verify_tls = config.verify_tls;
        let body_encoding = config.body_encoding;
        Arc::new(PluginRegistry::new(
            Box::new(move || plugins::builtin::builtins(timeout, verify_tls, body_encoding)),
            config.custom_plugin_dirs(),
        ))
    };
    let plugin_count = registry.reload().await;
    info!("Loaded {} plugins", plugin_count);

    let executor = Arc::new(RunExecutor::new(
        store.clone(),
        registry.clone(),
        sync.clone(),
        cache,
    ));
    let mut worker = None;
    let scheduler = if config.scheduler_enabled {
        let scheduler = Arc::new(Scheduler::new(store.clone(), executor.clone()).await?);
        scheduler.start().await?;
        Some(scheduler)
    } else {
        info!("Scheduler disabled, starting fallback run worker");
        worker = Some(tokio::spawn(
            executor.clone().run_worker(Duration::from_secs(10)),
        ));
        None
    };

    let server = ApiServer::new(ApiServerConfig {
        store,
        registry,
        sync,
        executor,
        scheduler,
        settings,
        config,
    });
    server.serve().await?;

    if let Some(worker) = worker {
        worker.abort();
    }
    info!("Goodbye");
    Ok(())
}
