use super::{handlers, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Creates the Axum router with all the application routes.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ingest/text", post(handlers::ingest_text_handler))
        .route("/search/vector", post(handlers::vector_search_handler))
        .route("/ws/chat/{workspace_id}", get(handlers::ws_chat_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
