use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use studyrag::{IngestError, SearchError, StoreError};
use tracing::error;

/// A custom error type for the server application.
///
/// Encapsulates the library errors that can surface from a handler and maps
/// them to HTTP responses.
pub enum AppError {
    Ingest(IngestError),
    Search(SearchError),
    Store(StoreError),
    Internal(anyhow::Error),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::Ingest(err)
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        AppError::Search(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_message) = match self {
            AppError::Ingest(err) => {
                error!("IngestError: {err:?}");
                match &err {
                    IngestError::Chunk(e) => (StatusCode::BAD_REQUEST, e.to_string()),
                    IngestError::Embedding { .. } => (StatusCode::BAD_GATEWAY, err.to_string()),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Ingestion failed.".to_string(),
                    ),
                }
            }
            AppError::Search(err) => {
                error!("SearchError: {err:?}");
                match err {
                    SearchError::Embedding(e) => (
                        StatusCode::BAD_GATEWAY,
                        format!("Embedding generation failed: {e}"),
                    ),
                    SearchError::Store(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Search failed.".to_string(),
                    ),
                }
            }
            AppError::Store(err) => {
                error!("StoreError: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A storage error occurred.".to_string(),
                )
            }
            AppError::Internal(err) => {
                error!("Internal server error: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status_code, body).into_response()
    }
}
