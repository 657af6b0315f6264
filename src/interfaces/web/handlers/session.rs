use axum::{Json, extract::State};
use serde::Deserialize;

use super::super::AppState;

/// Safe cache summary: counts and hashes only, never cookie values.
pub async fn session_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.sync.status().await)
}

#[derive(Deserialize, Default)]
pub struct SyncRequest {
    #[serde(default)]
    pub identifier: Option<String>,
}

pub async fn sync_session(
    State(state): State<AppState>,
    payload: Option<Json<SyncRequest>>,
) -> Json<serde_json::Value> {
    let identifier = payload
        .as_ref()
        .and_then(|p| p.identifier.as_deref())
        .filter(|id| !id.is_empty());
    Json(state.sync.sync(identifier).await)
}
