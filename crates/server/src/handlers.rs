//! # HTTP and WebSocket Handlers

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::Response,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use studyrag::protocol::Notification;
use studyrag::session::{ChatSession, Flow};
use studyrag::{ingest, search};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Connections with no inbound frame for this long are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Outbound frames queue here while a turn streams faster than the socket
/// drains.
const OUTBOUND_BUFFER: usize = 64;

/// The root handler.
pub async fn root() -> &'static str {
    "studyrag server is running."
}

/// The health check handler.
pub async fn health_check() -> &'static str {
    "OK"
}

/// The request body for the `/ingest/text` endpoint.
#[derive(Deserialize)]
pub struct IngestTextRequest {
    pub workspace_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// The response body for the `/ingest/text` endpoint.
#[derive(Serialize)]
pub struct IngestTextResponse {
    pub message: String,
    pub document_id: String,
    pub title: String,
    pub ingested_chunks: usize,
}

/// The handler for the `/ingest/text` endpoint.
///
/// Chunks, embeds, and stores raw text as a new document.
pub async fn ingest_text_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<IngestTextRequest>,
) -> Result<Json<IngestTextResponse>, AppError> {
    info!(
        workspace_id = %payload.workspace_id,
        chars = payload.content.chars().count(),
        "Received text ingest request"
    );

    let document = ingest::ingest_document(
        &app_state.store,
        app_state.embedder.as_ref(),
        &payload.workspace_id,
        &payload.user_id,
        &payload.content,
        payload.title.as_deref(),
        ingest::ChunkingOptions {
            max_size: app_state.config.chunk_size,
            overlap: app_state.config.chunk_overlap,
        },
    )
    .await?;

    Ok(Json(IngestTextResponse {
        message: "Ingestion successful".to_string(),
        ingested_chunks: document.chunk_ids.len(),
        document_id: document.id,
        title: document.title,
    }))
}

/// The request body for the `/search/vector` endpoint.
#[derive(Deserialize)]
pub struct VectorSearchRequest {
    pub workspace_id: String,
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One retrieved chunk with its citation metadata.
#[derive(Serialize)]
pub struct VectorSearchResult {
    pub content: String,
    pub similarity: f32,
    pub chunk_index: i64,
    pub from_line: i64,
    pub to_line: i64,
    pub document_id: String,
    pub document_title: String,
}

/// The handler for the `/search/vector` endpoint.
pub async fn vector_search_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<VectorSearchRequest>,
) -> Result<Json<Vec<VectorSearchResult>>, AppError> {
    info!(workspace_id = %payload.workspace_id, "Received vector search request");

    let matches = search::search_chunks(
        &app_state.store,
        app_state.embedder.as_ref(),
        &payload.query,
        &payload.workspace_id,
        payload.limit.unwrap_or(app_state.config.retrieval_top_k),
        app_state.config.retrieval_min_similarity,
    )
    .await?;

    let results = matches
        .into_iter()
        .map(|m| VectorSearchResult {
            content: m.chunk.content,
            similarity: m.similarity,
            chunk_index: m.chunk.index,
            from_line: m.chunk.from_line,
            to_line: m.chunk.to_line,
            document_id: m.document.id,
            document_title: m.document.title,
        })
        .collect();

    Ok(Json(results))
}

/// The handler for the `/ws/chat/{workspace_id}` endpoint.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    Path(workspace_id): Path<String>,
    State(app_state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, workspace_id))
}

/// Drives one websocket connection.
///
/// The socket is split: a writer task drains the session's notification
/// channel into JSON text frames while this task pumps inbound frames into
/// the session. Dropping the session closes the channel and ends the writer.
async fn handle_socket(socket: WebSocket, app_state: AppState, workspace_id: String) {
    debug!(%workspace_id, "WebSocket connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Notification>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(notification) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&notification) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize notification");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut session = ChatSession::new(
        app_state.store.clone(),
        app_state.access_db.clone(),
        app_state.embedder.clone(),
        app_state.completion.clone(),
        outbound_tx,
        workspace_id.clone(),
        app_state.retrieval_options(),
    );

    if session.open().await == Flow::Continue {
        loop {
            let frame = match timeout(IDLE_TIMEOUT, ws_rx.next()).await {
                Err(_) => {
                    debug!(%workspace_id, "Closing idle WebSocket connection");
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => {
                    if session.handle_raw(text.as_str()).await == Flow::Close {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                // Pings are answered by axum; binary frames are ignored.
                _ => {}
            }
        }
    }

    drop(session);
    let _ = writer.await;
    debug!(%workspace_id, "WebSocket connection closed");
}
