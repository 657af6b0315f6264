use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;
use crate::storage::types::{NewSite, SitePatch};

pub async fn list_sites(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.store.list_sites().await {
        Ok(sites) => Json(serde_json::json!({ "success": true, "sites": sites })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn create_site(
    State(state): State<AppState>,
    Json(payload): Json<NewSite>,
) -> Json<serde_json::Value> {
    if payload.name.trim().is_empty() || payload.url.trim().is_empty() {
        return Json(serde_json::json!({
            "success": false,
            "error": "name and url are required"
        }));
    }
    if let Some(schedule) = payload.schedule.as_deref() {
        if let Err(e) = crate::core::scheduler::validate_cron(schedule) {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Invalid cron expression: {e}")
            }));
        }
    }
    match state.store.create_site(payload).await {
        Ok(site) => Json(serde_json::json!({ "success": true, "site": site })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_site(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_site(id).await {
        Ok(Some(site)) => Json(serde_json::json!({ "success": true, "site": site })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Site not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn update_site(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(patch): Json<SitePatch>,
) -> Json<serde_json::Value> {
    if let Some(Some(schedule)) = patch.schedule.as_ref() {
        if let Err(e) = crate::core::scheduler::validate_cron(schedule) {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Invalid cron expression: {e}")
            }));
        }
    }
    match state.store.update_site(id, patch).await {
        Ok(Some(site)) => Json(serde_json::json!({ "success": true, "site": site })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Site not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_site(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.delete_site(id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })),
        Ok(false) => Json(serde_json::json!({ "success": false, "error": "Site not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
