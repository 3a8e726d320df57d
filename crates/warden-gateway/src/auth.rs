use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use warden_core::config::AuthMode;
use warden_core::WardenError;

use crate::app::AppState;

/// Reject requests without the configured bearer token.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if check_auth(&state, &headers) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "unauthorized request");
    let err = WardenError::AuthFailed("set 'Authorization: Bearer <your-token>' header".into());
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": err.code(),
            "message": err.to_string(),
        })),
    )
        .into_response()
}

/// Returns true if the request is authorised.
fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.gateway.auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let expected = match &state.config.gateway.auth.token {
                Some(t) => t.as_str(),
                // Token mode configured but no token value — deny.
                None => return false,
            };
            extract_bearer(headers)
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
