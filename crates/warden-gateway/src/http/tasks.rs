//! Task definitions — `/tasks`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;
use warden_catalog::{NewTask, Task, TaskPatch};
use warden_core::types::Page;

use super::error::ApiResult;
use super::{ActorQuery, PagePath, SearchQuery};
use crate::app::AppState;

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.catalog.create_task(&body)?;
    info!(task_name = %task.task_name, executor = %task.executor, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.catalog.list_tasks()?))
}

pub async fn page_tasks(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
) -> ApiResult<Json<Page<Task>>> {
    Ok(Json(state.catalog.page_tasks(None, page.into())?))
}

/// GET /tasks/search/{page}/{limit}?q= — matches the user-facing task name.
pub async fn search_tasks(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
    Query(search): Query<SearchQuery>,
) -> ApiResult<Json<Page<Task>>> {
    Ok(Json(state.catalog.page_tasks(search.q.as_deref(), page.into())?))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.catalog.get_task(&task)?))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.catalog.update_task(&task, &patch)?))
}

/// PUT /tasks/{task}/cancel — existing schedules are left to their own cancel.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<Task>> {
    state.catalog.cancel_task(&task, actor.actor.as_deref())?;
    info!(task_name = %task, "task cancelled");
    Ok(Json(state.catalog.get_task(&task)?))
}
