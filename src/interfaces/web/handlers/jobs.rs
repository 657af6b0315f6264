use axum::{Json, extract::State};
use serde::Deserialize;

use super::super::AppState;
use crate::core::scheduler;

pub async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let expressions = scheduler::active_expressions(&state.store)
        .await
        .unwrap_or_default();
    let Some(sched) = state.scheduler.as_ref() else {
        return Json(serde_json::json!({
            "success": true,
            "scheduler_enabled": false,
            "expressions": expressions,
            "jobs": []
        }));
    };
    let jobs = sched.list_jobs().await;
    Json(serde_json::json!({
        "success": true,
        "scheduler_enabled": true,
        "expressions": expressions,
        "jobs": jobs
    }))
}

#[derive(Deserialize)]
pub struct ValidateCronRequest {
    pub cron: String,
}

pub async fn validate_cron_endpoint(
    State(_state): State<AppState>,
    Json(payload): Json<ValidateCronRequest>,
) -> Json<serde_json::Value> {
    match scheduler::validate_cron(payload.cron.trim()) {
        Ok(next) => {
            let next: Vec<String> = next.iter().map(|t| t.to_rfc3339()).collect();
            Json(serde_json::json!({ "success": true, "valid": true, "next": next }))
        }
        Err(e) => Json(serde_json::json!({ "success": true, "valid": false, "error": e })),
    }
}
