use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;

use super::AppState;

/// Handler for registering a new identity; the returned id goes in `x-user-id`
pub async fn register(State(state): State<AppState>) -> AppResult<(StatusCode, Json<Value>)> {
    let user_id = Uuid::new_v4();
    state.engine.register_user(user_id).await?;
    tracing::info!(user_id = %user_id, "User registered");
    Ok((StatusCode::CREATED, Json(json!({ "id": user_id }))))
}
