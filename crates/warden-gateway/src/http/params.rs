use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use warden_catalog::{AddParameters, ParameterPatch, TaskParameter};
use warden_core::types::Page;

use super::error::ApiResult;
use super::PagePath;
use crate::app::AppState;

/// POST /tasks/{task}/params — bulk add; all or nothing.
pub async fn add_params(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    Json(body): Json<AddParameters>,
) -> ApiResult<(StatusCode, Json<Vec<TaskParameter>>)> {
    let added = state.catalog.add_parameters(&task, &body)?;
    Ok((StatusCode::CREATED, Json(added)))
}

pub async fn list_params(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
) -> ApiResult<Json<Vec<TaskParameter>>> {
    Ok(Json(state.catalog.list_parameters(&task)?))
}

pub async fn page_params(
    State(state): State<Arc<AppState>>,
    Path((task, page, limit)): Path<(String, u32, u32)>,
) -> ApiResult<Json<Page<TaskParameter>>> {
    let req = PagePath { page, limit }.into();
    Ok(Json(state.catalog.page_parameters(&task, req)?))
}

pub async fn update_param(
    State(state): State<Arc<AppState>>,
    Path((task, param_id)): Path<(String, i64)>,
    Json(patch): Json<ParameterPatch>,
) -> ApiResult<Json<TaskParameter>> {
    Ok(Json(state.catalog.update_parameter(&task, param_id, &patch)?))
}

pub async fn delete_param(
    State(state): State<Arc<AppState>>,
    Path((task, param_id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    state.catalog.delete_parameter(&task, param_id)?;
    Ok(Json(json!({ "deleted": param_id })))
}
