use super::{json_body, parse_id, query_params, AppState};
use crate::aggregate;
use crate::auth::AuthenticatedUser;
use crate::errors::{AppError, AppResult};
use crate::filters::{self, Page};
use crate::models::{DayTotal, Finance, FinanceListParams, FinancePayload};
use crate::validation;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    query: Result<Query<FinanceListParams>, QueryRejection>,
) -> AppResult<Json<Vec<Finance>>> {
    let params = query_params(query);
    tracing::info!(user = %caller.username, tag = ?params.tag, date = ?params.date, "listing finances");

    let tz = state.time_zone;
    let filter = filters::finance_filter(&params, tz, Utc::now());
    let page = Page::from_params(params.limit.as_deref(), params.offset.as_deref());
    let finances = state.with_db(move |db| db.find_finances(&filter, tz)).await?;
    Ok(Json(page.apply(finances)))
}

pub async fn by_day(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    query: Result<Query<FinanceListParams>, QueryRejection>,
) -> AppResult<Json<Vec<DayTotal>>> {
    let params = query_params(query);
    tracing::info!(
        user = %caller.username,
        start = ?params.start,
        end = ?params.end,
        "summing finances by day"
    );

    let tz = state.time_zone;
    let filter = filters::finance_by_day_filter(&params, tz, Utc::now());
    let finances = state.with_db(move |db| db.find_finances(&filter, tz)).await?;
    let totals = aggregate::value_sum_by_day(&finances, tz)
        .map_err(|err| AppError::Internal(format!("finance by-day aggregation failed: {}", err)))?;
    Ok(Json(totals))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    payload: Result<Json<FinancePayload>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Finance>)> {
    let new_finance = validation::validate_new_finance(json_body(payload)?)?;
    let finance = state.with_db(move |db| db.create_finance(&new_finance)).await?;
    tracing::info!(user = %caller.username, finance_id = finance.id, "finance entry created");
    Ok((StatusCode::CREATED, Json(finance)))
}

pub async fn retrieve(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Finance>> {
    let finance_id = parse_id(&id)?;
    state
        .with_db(move |db| db.get_finance(finance_id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("finance {}", finance_id)))
}

pub async fn replace(
    state: State<AppState>,
    caller: Extension<AuthenticatedUser>,
    id: Path<String>,
    payload: Result<Json<FinancePayload>, JsonRejection>,
) -> AppResult<Json<Finance>> {
    update(state, caller, id, payload, false).await
}

pub async fn partial_update(
    state: State<AppState>,
    caller: Extension<AuthenticatedUser>,
    id: Path<String>,
    payload: Result<Json<FinancePayload>, JsonRejection>,
) -> AppResult<Json<Finance>> {
    update(state, caller, id, payload, true).await
}

async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    payload: Result<Json<FinancePayload>, JsonRejection>,
    partial: bool,
) -> AppResult<Json<Finance>> {
    let finance_id = parse_id(&id)?;
    let changes = validation::validate_finance_changes(json_body(payload)?, partial)?;
    let finance = state
        .with_db(move |db| db.update_finance(finance_id, &changes))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("finance {}", finance_id)))?;
    tracing::info!(user = %caller.username, finance_id, partial, "finance entry updated");
    Ok(Json(finance))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let finance_id = parse_id(&id)?;
    if !state.with_db(move |db| db.delete_finance(finance_id)).await? {
        return Err(AppError::NotFound(format!("finance {}", finance_id)));
    }
    tracing::info!(user = %caller.username, finance_id, "finance entry deleted");
    Ok(StatusCode::NO_CONTENT)
}
