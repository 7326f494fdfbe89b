use super::{json_body, parse_id, query_params, AppState};
use crate::aggregate;
use crate::auth::AuthenticatedUser;
use crate::errors::{AppError, AppResult};
use crate::filters::{self, Page};
use crate::models::{Task, TaskListParams, TaskPayload};
use crate::validation;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    query: Result<Query<TaskListParams>, QueryRejection>,
) -> AppResult<Response> {
    let params = query_params(query);
    tracing::info!(
        user = %caller.username,
        tag = ?params.tag,
        view = ?params.view,
        date = ?params.date,
        progress_by_day = ?params.progress_by_day,
        "listing tasks"
    );

    let tz = state.time_zone;
    let now = Utc::now();

    if params.progress_by_day.as_deref() == Some("1") {
        let filter = filters::task_progress_filter(&params, tz, now);
        let tasks = state.with_db(move |db| db.find_tasks(&filter, tz)).await?;
        let progress = aggregate::completion_ratio_by_day(&tasks, tz)
            .map_err(|err| AppError::Internal(format!("task progress aggregation failed: {}", err)))?;
        return Ok(Json(progress).into_response());
    }

    let filter = filters::task_filter(&params, tz, now);
    let page = Page::from_params(params.limit.as_deref(), params.offset.as_deref());
    let tasks = state.with_db(move |db| db.find_tasks(&filter, tz)).await?;
    Ok(Json(page.apply(tasks)).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let new_task = validation::validate_new_task(json_body(payload)?)?;
    let task = state.with_db(move |db| db.create_task(&new_task)).await?;
    tracing::info!(user = %caller.username, task_id = task.id, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn retrieve(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Task>> {
    let task_id = parse_id(&id)?;
    state
        .with_db(move |db| db.get_task(task_id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
}

pub async fn replace(
    state: State<AppState>,
    caller: Extension<AuthenticatedUser>,
    id: Path<String>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> AppResult<Json<Task>> {
    update(state, caller, id, payload, false).await
}

pub async fn partial_update(
    state: State<AppState>,
    caller: Extension<AuthenticatedUser>,
    id: Path<String>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> AppResult<Json<Task>> {
    update(state, caller, id, payload, true).await
}

async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
    partial: bool,
) -> AppResult<Json<Task>> {
    let task_id = parse_id(&id)?;
    let payload = json_body(payload)?;
    let task = state
        .with_db(move |db| {
            let current = db
                .get_task(task_id)?
                .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))?;
            let changes = validation::validate_task_changes(&current, payload, partial)?;
            db.update_task(task_id, &changes)?
                .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
        })
        .await?;
    tracing::info!(user = %caller.username, task_id, partial, "task updated");
    Ok(Json(task))
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Task>> {
    let task_id = parse_id(&id)?;
    let task = state
        .with_db(move |db| db.complete_task(task_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))?;
    tracing::info!(user = %caller.username, task_id, "task completed");
    Ok(Json(task))
}
