use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

fn presented_token(req: &Request<Body>, header: &str) -> Option<String> {
    if let Some(value) = req.headers().get(header) {
        if let Ok(raw) = value.to_str() {
            return Some(raw.to_string());
        }
    }
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// API token gate. An empty configured token leaves the API open, which is
/// the local-development default.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.config.api_token.as_str();
    if expected.is_empty() {
        return next.run(req).await;
    }

    let query_token = req.uri().query().and_then(|q| {
        q.split('&').find_map(|pair| {
            pair.strip_prefix("api_token=")
                .map(|v| v.to_string())
        })
    });
    let presented = presented_token(&req, "x-api-token").or(query_token);

    match presented {
        Some(token) if token == expected => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "success": false, "error": "Invalid API token" })),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "Missing API token. Send X-API-Token, Bearer auth, or api_token query parameter."
            })),
        )
            .into_response(),
    }
}

/// Admin gate for mutating vault credentials and plugin code. Unlike the
/// API token, an unconfigured admin token closes these routes entirely.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.config.admin_token.as_str();
    if expected.is_empty() {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "success": false, "error": "Admin token not configured" })),
        )
            .into_response();
    }

    match presented_token(&req, "x-admin-token") {
        Some(token) if token == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "success": false, "error": "Invalid admin token" })),
        )
            .into_response(),
    }
}
