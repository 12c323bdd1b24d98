use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{make_request_span, request_id_middleware};

pub mod auth;
pub mod news;
pub mod state;
pub mod users;

pub use auth::{AuthRequirement, OptionalUser, RequiredUser, USER_ID_HEADER};
pub use state::AppState;

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(users::register))
        .route("/news", get(news::list).post(news::create))
        .route("/news/recommendations", get(news::recommendations))
        .route("/news/trending", get(news::trending))
        .route("/news/refresh", post(news::refresh))
        .route("/news/:id", get(news::show).delete(news::hide))
        .route("/news/:id/save", post(news::save))
        .route("/news/:id/ignore", post(news::ignore))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
