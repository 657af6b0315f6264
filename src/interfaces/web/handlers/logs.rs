use axum::{
    Json,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::super::AppState;

#[derive(Deserialize)]
pub struct LogListQuery {
    pub run_id: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn list_logs(
    Query(query): Query<LogListQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(100).min(1000);
    match state.store.list_logs(query.run_id, limit).await {
        Ok(logs) => Json(serde_json::json!({ "success": true, "logs": logs })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct LogStreamQuery {
    pub run_id: Option<i64>,
    pub after_id: Option<i64>,
}

/// Tail the log table as server-sent events. The stream polls for rows
/// beyond the last delivered id; keep-alives cover the quiet stretches.
pub async fn stream_logs(
    Query(query): Query<LogStreamQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(64);
    let store = state.store.clone();
    let run_id = query.run_id;
    let mut cursor = query.after_id.unwrap_or(0);

    tokio::spawn(async move {
        loop {
            match store.tail_logs(cursor, run_id).await {
                Ok(entries) => {
                    for entry in entries {
                        cursor = cursor.max(entry.id);
                        let event = match serde_json::to_string(&entry) {
                            Ok(body) => Event::default().data(body),
                            Err(_) => continue,
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            debug!("Log stream client disconnected");
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!("Log tail query failed: {}", e);
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
