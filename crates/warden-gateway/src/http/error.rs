//! Mapping of domain errors onto HTTP responses.
//!
//! Every failure body has the same shape:
//! `{ "error": CODE, "message": text, "durable_change_applied": bool }`.
//! The flag lets operators tell a half-applied cancel apart from a request
//! that changed nothing.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, error};
use warden_catalog::CatalogError;
use warden_scheduler::SchedulerError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub durable_change_applied: bool,
}

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP status for an error code shared by the catalog and scheduler crates.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" | "MISSING_PARAMETER" | "INVALID_SCHEDULE" => StatusCode::BAD_REQUEST,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "CONFLICT" | "INVALID_STATE" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let code = e.code();
        Self {
            status: status_for(code),
            code,
            message: e.to_string(),
            durable_change_applied: e.durable_change_applied(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        let code = e.code();
        Self {
            status: status_for(code),
            code,
            message: e.to_string(),
            durable_change_applied: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, durable = self.durable_change_applied, "{}", self.message);
        } else {
            debug!(code = self.code, "{}", self.message);
        }
        (
            self.status,
            Json(json!({
                "error": self.code,
                "message": self.message,
                "durable_change_applied": self.durable_change_applied,
            })),
        )
            .into_response()
    }
}
