use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{config, jobs, logs, plugins, runs, session, sites};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/plugins/custom", post(plugins::save_custom_plugin))
        .route(
            "/plugins/custom/{key}",
            axum::routing::delete(plugins::delete_custom_plugin),
        )
        .route("/settings/vault", patch(config::patch_vault_settings))
        .route("/runs/process", post(runs::process_next_run))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    let api = Router::new()
        .route("/health", get(config::health))
        .route("/sites", get(sites::list_sites).post(sites::create_site))
        .route(
            "/sites/{id}",
            get(sites::get_site)
                .patch(sites::update_site)
                .delete(sites::delete_site),
        )
        .route("/sites/{id}/run", post(runs::enqueue_site_run))
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run).delete(runs::delete_run))
        .route("/logs", get(logs::list_logs))
        .route("/logs/stream", get(logs::stream_logs))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/validate", post(jobs::validate_cron_endpoint))
        .route("/session/status", get(session::session_status))
        .route("/session/sync", post(session::sync_session))
        .route("/plugins", get(plugins::list_plugins))
        .route("/plugins/reload", post(plugins::reload_plugins))
        .route("/config", get(config::get_config))
        .route("/settings", get(config::get_settings))
        .route("/settings/ui", patch(config::patch_ui_settings))
        .merge(admin_routes);

    let cors = build_localhost_cors(state.config.api_port);

    Router::new()
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ))
        .layer(cors)
        .with_state(state)
}
