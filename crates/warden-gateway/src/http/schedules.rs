//! Schedule lifecycle — `/schedules` and `/tasks/{task}/schedules`.
//!
//! Creation accepts every schedule type; `IMMEDIATE` answers with the ad-hoc
//! request record instead of a schedule id.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use warden_core::types::Page;
use warden_scheduler::{CreateOutcome, Schedule, SchedulePatch, ScheduleRequest, ScheduleView};

use super::error::ApiResult;
use super::{ActorQuery, PagePath, SearchQuery};
use crate::app::AppState;

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<CreateOutcome>)> {
    let outcome = state.engine.create(body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(state.engine.schedules()?))
}

pub async fn page_schedules(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
) -> ApiResult<Json<Page<Schedule>>> {
    Ok(Json(state.engine.page_schedules(None, page.into())?))
}

/// GET /schedules/search/{page}/{limit}?q= — matches the task name.
pub async fn search_schedules(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
    Query(search): Query<SearchQuery>,
) -> ApiResult<Json<Page<Schedule>>> {
    Ok(Json(
        state.engine.page_schedules(search.q.as_deref(), page.into())?,
    ))
}

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.engine.schedule(&schedule_id)?))
}

/// GET /schedules/{schedule_id}/status — durable record, live status and
/// whether the two agree.
pub async fn schedule_status(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> ApiResult<Json<ScheduleView>> {
    Ok(Json(state.reconciler.schedule_view(&schedule_id).await?))
}

pub async fn task_schedules(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(state.engine.schedules_for_task(&task)?))
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path((task, live_name)): Path<(String, String)>,
    Json(patch): Json<SchedulePatch>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.engine.update(&task, &live_name, patch).await?))
}

pub async fn cancel_schedule(
    State(state): State<Arc<AppState>>,
    Path((task, live_name)): Path<(String, String)>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(
        state
            .engine
            .cancel(&task, &live_name, actor.actor.as_deref())
            .await?,
    ))
}

pub async fn reschedule_schedule(
    State(state): State<Arc<AppState>>,
    Path((task, live_name)): Path<(String, String)>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(
        state
            .engine
            .reschedule(&task, &live_name, actor.actor.as_deref())
            .await?,
    ))
}
