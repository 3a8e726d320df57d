use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use warden_scheduler::types::{LiveScheduleList, LiveScheduleStatus};

use super::error::ApiResult;
use crate::app::AppState;

/// GET /live-schedules — every non-internal entry in the live store.
pub async fn list_live(State(state): State<Arc<AppState>>) -> ApiResult<Json<LiveScheduleList>> {
    Ok(Json(state.reconciler.list_live().await?))
}

/// GET /live-schedules/{*key} — one entry, by full key or bare name.
pub async fn live_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<LiveScheduleStatus>> {
    Ok(Json(state.reconciler.live_status(&key).await?))
}
