//! HTTP surface. Handlers parse input, run store calls off the async
//! runtime, and are the only place that logs.

mod finances;
mod tasks;
mod token;

use crate::auth::TokenService;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono_tz::Tz;
use serde_json::json;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub tokens: Arc<TokenService>,
    pub time_zone: Tz,
}

impl AppState {
    pub fn new(db: Database, tokens: TokenService, time_zone: Tz) -> Self {
        Self {
            db: Arc::new(db),
            tokens: Arc::new(tokens),
            time_zone,
        }
    }

    /// Runs a store call on the blocking pool.
    pub(crate) async fn with_db<T, F>(&self, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || call(&db))
            .await
            .map_err(|err| AppError::Internal(format!("store task failed: {}", err)))?
    }
}

pub fn router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    let protected = Router::new()
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/tasks/{id}",
            get(tasks::retrieve).put(tasks::replace).patch(tasks::partial_update),
        )
        .route("/tasks/{id}/complete", post(tasks::complete))
        .route("/finances", get(finances::list).post(finances::create))
        .route("/finances/by_day", get(finances::by_day))
        .route(
            "/finances/{id}",
            get(finances::retrieve)
                .put(finances::replace)
                .patch(finances::partial_update)
                .delete(finances::destroy),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access_token));

    Router::new()
        .route("/token", post(token::obtain))
        .route("/token/refresh", post(token::refresh))
        .route("/health", get(health))
        .merge(protected)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Rejects requests without a valid `Authorization: Bearer` access token
/// for an existing user, and hands the caller to handlers as an extension.
async fn require_access_token(State(state): State<AppState>, mut request: Request, next: Next) -> AppResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Authentication credentials were not provided.".to_string()))?;

    let caller = state.tokens.authenticate(token).map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        AppError::Unauthorized("Given token not valid for any token type".to_string())
    })?;

    let user_id = caller.user_id;
    if state.with_db(move |db| db.get_user(user_id)).await?.is_none() {
        tracing::debug!(user_id, "bearer token names a missing user");
        return Err(AppError::Unauthorized("User not found".to_string()));
    }

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::field("non_field_errors", rejection.body_text()))
}

/// An unparseable query string filters nothing.
pub(crate) fn query_params<T: Default>(query: Result<Query<T>, QueryRejection>) -> T {
    match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "ignoring malformed query string");
            T::default()
        }
    }
}

/// Ids are integers; anything else cannot name a record.
pub(crate) fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("no record with id {}", raw)))
}
