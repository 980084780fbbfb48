use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::Value;

use crate::auth::require_user;
use crate::error::AppResult;
use crate::ownership::ensure_app_user;
use crate::state::AppState;

/// Resolve the caller and upsert their `app_users` row.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let record = ensure_app_user(&state, &user).await?;
    Ok(Json(record))
}
