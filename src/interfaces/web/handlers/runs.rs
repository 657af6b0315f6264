use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;

#[derive(Deserialize)]
pub struct RunListQuery {
    pub site_id: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn list_runs(
    Query(query): Query<RunListQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.store.list_runs(query.site_id, limit).await {
        Ok(runs) => Json(serde_json::json!({ "success": true, "runs": runs })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_run(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_run(id).await {
        Ok(Some(run)) => Json(serde_json::json!({ "success": true, "run": run })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Run not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn delete_run(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.delete_run(id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })),
        Ok(false) => Json(serde_json::json!({ "success": false, "error": "Run not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

/// Queue a run for a site. The worker picks it up on its next poll.
pub async fn enqueue_site_run(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_site(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Json(serde_json::json!({ "success": false, "error": "Site not found" }));
        }
        Err(e) => {
            return Json(serde_json::json!({ "success": false, "error": e.to_string() }));
        }
    }
    match state.store.enqueue_run_for_site(id).await {
        Ok(run) => Json(serde_json::json!({ "success": true, "run": run })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

/// Admin escape hatch: execute the oldest queued run inline instead of
/// waiting for the worker.
pub async fn process_next_run(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.executor.execute_next().await {
        Ok(Some(run)) => Json(serde_json::json!({ "success": true, "run": run })),
        Ok(None) => Json(serde_json::json!({ "success": true, "run": null, "message": "Queue is empty" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
