use super::{json_body, AppState};
use crate::auth;
use crate::errors::AppResult;
use crate::models::{AccessToken, TokenObtainRequest, TokenPair, TokenRefreshRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

pub async fn obtain(
    State(state): State<AppState>,
    payload: Result<Json<TokenObtainRequest>, JsonRejection>,
) -> AppResult<Json<TokenPair>> {
    let request = json_body(payload)?;
    let username = request.username.clone();
    let tokens = Arc::clone(&state.tokens);
    let result = state
        .with_db(move |db| auth::obtain_pair(db, &tokens, &request))
        .await;
    match &result {
        Ok(_) => tracing::info!(user = %username, "issued token pair"),
        Err(err) => tracing::warn!(user = %username, error = %err, "token request refused"),
    }
    result.map(Json)
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<TokenRefreshRequest>, JsonRejection>,
) -> AppResult<Json<AccessToken>> {
    let request = json_body(payload)?;
    state.tokens.refresh(&request.refresh).map(Json)
}
