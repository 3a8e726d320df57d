//! Ad-hoc request audit — `/requests`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use warden_core::types::Page;
use warden_scheduler::TaskRequest;

use super::error::ApiResult;
use super::{ActorQuery, PagePath, SearchQuery};
use crate::app::AppState;

/// GET /requests — requests inside the retention window, newest first.
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<TaskRequest>>> {
    Ok(Json(state.engine.adhoc().requests().list_recent()?))
}

pub async fn page_requests(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
) -> ApiResult<Json<Page<TaskRequest>>> {
    Ok(Json(
        state.engine.adhoc().requests().page_recent(None, page.into())?,
    ))
}

pub async fn search_requests(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
    Query(search): Query<SearchQuery>,
) -> ApiResult<Json<Page<TaskRequest>>> {
    Ok(Json(
        state
            .engine
            .adhoc()
            .requests()
            .page_recent(search.q.as_deref(), page.into())?,
    ))
}

/// PUT /tasks/{task}/requests/{request_id}/cancel — flag, then revoke.
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path((task, request_id)): Path<(String, String)>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<TaskRequest>> {
    Ok(Json(
        state
            .engine
            .cancel_adhoc(&task, &request_id, actor.actor.as_deref())
            .await?,
    ))
}
