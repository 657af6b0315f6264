pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::core::config::Config;
use crate::core::executor::RunExecutor;
use crate::core::scheduler::Scheduler;
use crate::core::vault::sync::SyncService;
use crate::plugins::PluginRegistry;
use crate::storage::Store;
use crate::storage::settings::SettingsStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<Store>,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) sync: Arc<SyncService>,
    pub(crate) executor: Arc<RunExecutor>,
    pub(crate) scheduler: Option<Arc<Scheduler>>,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) config: Arc<Config>,
}

pub struct ApiServerConfig {
    pub store: Arc<Store>,
    pub registry: Arc<PluginRegistry>,
    pub sync: Arc<SyncService>,
    pub executor: Arc<RunExecutor>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub settings: Arc<SettingsStore>,
    pub config: Arc<Config>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                store: config.store,
                registry: config.registry,
                sync: config.sync,
                executor: config.executor,
                scheduler: config.scheduler,
                settings: config.settings,
                config: config.config,
            },
        }
    }

    /// Bind and serve until the process is asked to stop.
    pub async fn serve(self) -> Result<()> {
        let host = self.state.config.api_host.clone();
        let port = self.state.config.api_port;
        let app = router::build_api_router(self.state);

        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API listening on http://{}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
