use axum::{Json, extract::State};

use super::super::AppState;

pub async fn health(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Environment-derived config with secrets masked.
pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "config": state.config.masked() }))
}

/// The settings document, with the stored vault password reduced to a
/// presence flag.
pub async fn get_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    let document = state.settings.load();
    Json(serde_json::json!({
        "success": true,
        "settings": {
            "ui": document.ui,
            "vault": {
                "url": document.vault.url,
                "identifier": document.vault.identifier,
                "password_set": !document.vault.password.is_empty()
            }
        }
    }))
}

pub async fn patch_ui_settings(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    match state.settings.patch_ui(patch).await {
        Ok(ui) => Json(serde_json::json!({ "success": true, "ui": ui })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn patch_vault_settings(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    match state.settings.patch_vault(patch).await {
        Ok(vault) => Json(serde_json::json!({
            "success": true,
            "vault": {
                "url": vault.url,
                "identifier": vault.identifier,
                "password_set": !vault.password.is_empty()
            }
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
