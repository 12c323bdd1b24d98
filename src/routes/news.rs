use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{ContentItem, NewContent, Recommendations},
};

use super::{
    auth::{OptionalUser, RequiredUser},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub source: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SaveQuery {
    pub saved: Option<bool>,
}

/// Missing and zero pages both mean the first page
fn page_number(page: Option<usize>) -> usize {
    page.unwrap_or(1).max(1)
}

/// Handler for listing the newest items of one source
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ContentItem>>> {
    let source = query.source.unwrap_or_default();
    let items = state
        .engine
        .list_by_source(&source, page_number(query.page))
        .await?;
    Ok(Json(items))
}

pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewContent>,
) -> AppResult<(StatusCode, Json<ContentItem>)> {
    let item = state.engine.create_content(new).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Handler for the caller's personalised feed
pub async fn recommendations(
    State(state): State<AppState>,
    RequiredUser(user_id): RequiredUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let body = match state
        .engine
        .get_recommendations(user_id, page_number(query.page))
        .await?
    {
        Recommendations::Items(items) => json!({ "items": items }),
        Recommendations::Empty => json!({
            "empty": true,
            "msg": "No recommendations yet. Read a few stories to get started."
        }),
    };
    Ok(Json(body))
}

pub async fn trending(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<ContentItem>>> {
    let items = state.engine.trending(page_number(query.page)).await?;
    Ok(Json(items))
}

pub async fn refresh(
    State(state): State<AppState>,
    RequiredUser(user_id): RequiredUser,
) -> AppResult<(StatusCode, Json<Value>)> {
    state.engine.refresh(user_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "refreshed" }))))
}

/// Handler for opening an item; counts as a view
pub async fn show(
    State(state): State<AppState>,
    OptionalUser(user_id): OptionalUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ContentItem>> {
    let item = state.engine.record_view(user_id, id).await?;
    Ok(Json(item))
}

pub async fn hide(
    State(state): State<AppState>,
    RequiredUser(_user_id): RequiredUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.engine.hide(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn save(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SaveQuery>,
) -> AppResult<Json<ContentItem>> {
    let item = state
        .engine
        .record_save(id, query.saved.unwrap_or(true))
        .await?;
    Ok(Json(item))
}

pub async fn ignore(
    State(state): State<AppState>,
    RequiredUser(user_id): RequiredUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.engine.record_ignore(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number_clamps_to_first_page() {
        assert_eq!(page_number(None), 1);
        assert_eq!(page_number(Some(0)), 1);
        assert_eq!(page_number(Some(3)), 3);
    }
}
