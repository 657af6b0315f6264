use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;
use crate::plugins::custom::{self, CustomPluginSpec};

pub async fn list_plugins(State(state): State<AppState>) -> Json<serde_json::Value> {
    let descriptors = state.registry.list().await;
    Json(serde_json::json!({ "success": true, "plugins": descriptors }))
}

pub async fn reload_plugins(State(state): State<AppState>) -> Json<serde_json::Value> {
    let count = state.registry.reload().await;
    Json(serde_json::json!({ "success": true, "count": count }))
}

/// Persist a custom plugin descriptor and fold it into the live registry.
pub async fn save_custom_plugin(
    State(state): State<AppState>,
    Json(spec): Json<CustomPluginSpec>,
) -> Json<serde_json::Value> {
    let dir = state.config.data_dir.join("plugins");
    match custom::save_custom_spec(&dir, &spec) {
        Ok(path) => {
            let count = state.registry.reload().await;
            Json(serde_json::json!({
                "success": true,
                "path": path.display().to_string(),
                "count": count
            }))
        }
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_custom_plugin(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let dir = state.config.data_dir.join("plugins");
    match custom::delete_custom_spec(&dir, &key) {
        Ok(true) => {
            let count = state.registry.reload().await;
            Json(serde_json::json!({ "success": true, "count": count }))
        }
        Ok(false) => Json(serde_json::json!({ "success": false, "error": "Plugin not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
