//! Execution method catalog — `/execution-methods`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use warden_catalog::{ExecutionMethod, ExecutionMethodPatch, NewExecutionMethod};
use warden_core::types::Page;

use super::error::ApiResult;
use super::{PagePath, SearchQuery};
use crate::app::AppState;

pub async fn create_method(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewExecutionMethod>,
) -> ApiResult<(StatusCode, Json<ExecutionMethod>)> {
    let method = state.catalog.create_method(&body)?;
    info!(key = %method.internal_execution_method, "execution method created");
    Ok((StatusCode::CREATED, Json(method)))
}

pub async fn list_methods(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ExecutionMethod>>> {
    Ok(Json(state.catalog.list_methods()?))
}

pub async fn page_methods(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
) -> ApiResult<Json<Page<ExecutionMethod>>> {
    Ok(Json(state.catalog.page_methods(None, page.into())?))
}

pub async fn search_methods(
    State(state): State<Arc<AppState>>,
    Path(page): Path<PagePath>,
    Query(search): Query<SearchQuery>,
) -> ApiResult<Json<Page<ExecutionMethod>>> {
    Ok(Json(
        state.catalog.page_methods(search.q.as_deref(), page.into())?,
    ))
}

pub async fn get_method(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<ExecutionMethod>> {
    Ok(Json(state.catalog.get_method(&key)?))
}

pub async fn update_method(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(patch): Json<ExecutionMethodPatch>,
) -> ApiResult<Json<ExecutionMethod>> {
    Ok(Json(state.catalog.update_method(&key, &patch)?))
}

pub async fn delete_method(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    state.catalog.delete_method(&key)?;
    info!(%key, "execution method deleted");
    Ok(Json(json!({ "deleted": key })))
}
