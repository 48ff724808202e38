//! # Document Ingestion Pipeline
//!
//! Orchestrates chunking, embedding, and persistence: either a
//! fully-chunked, fully-embedded document exists afterwards, or none of it
//! does. The whole sequence runs inside one transaction; a failed embedding
//! call or insert rolls everything back and the error names the failing
//! chunk index.

use crate::chunker::{self, ChunkError};
use crate::errors::ProviderError;
use crate::providers::Embedder;
use crate::store::{vector_to_blob, SqliteStore};
use crate::types::Document;
use thiserror::Error;
use tracing::info;
use turso::params;
use uuid::Uuid;

/// `from_line`/`to_line` are an approximation tied to assumed chunk density:
/// chunk `i` is recorded as covering lines `[i * LINE_WINDOW, (i+1) * LINE_WINDOW)`.
pub const LINE_WINDOW: i64 = 1000;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Store error: {0}")]
    Store(#[from] crate::errors::StoreError),
    #[error("Failed to embed chunk {index} of document {document_id}: {source}")]
    Embedding {
        index: usize,
        document_id: String,
        source: ProviderError,
    },
    #[error("Document {0} was not readable after ingestion")]
    DocumentVanished(String),
}

/// Chunking parameters for one ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub max_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_size: chunker::DEFAULT_CHUNK_SIZE,
            overlap: chunker::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Ingests raw text as a new document in `workspace_id`.
///
/// Chunk `index` is assigned by position in the original text, never by
/// embedding completion order. The document's content itself is not stored;
/// only the derived chunks are persisted.
pub async fn ingest_document(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    workspace_id: &str,
    user_id: &str,
    content: &str,
    title: Option<&str>,
    options: ChunkingOptions,
) -> Result<Document, IngestError> {
    let segments = chunker::split(content, options.max_size, options.overlap)?;

    let document_id = Uuid::new_v4().to_string();
    let title = title
        .map(str::to_string)
        .unwrap_or_else(|| document_id.clone());

    let conn = store.db.connect().map_err(crate::errors::StoreError::from)?;
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let result = async {
        conn.execute(
            "INSERT INTO documents (id, workspace_id, user_id, title) VALUES (?, ?, ?, ?)",
            params![
                document_id.clone(),
                workspace_id.to_string(),
                user_id.to_string(),
                title.clone()
            ],
        )
        .await?;

        let mut chunk_ids = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            let embedding =
                embedder
                    .embed(segment)
                    .await
                    .map_err(|source| IngestError::Embedding {
                        index,
                        document_id: document_id.clone(),
                        source,
                    })?;

            let chunk_id = Uuid::new_v4().to_string();
            let position = index as i64;
            conn.execute(
                "INSERT INTO chunks (id, document_id, workspace_id, user_id, content,
                                     embedding, embedder, from_line, to_line, idx)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    chunk_id.clone(),
                    document_id.clone(),
                    workspace_id.to_string(),
                    user_id.to_string(),
                    segment.clone(),
                    vector_to_blob(&embedding.vector),
                    embedding.model,
                    position * LINE_WINDOW,
                    (position + 1) * LINE_WINDOW,
                    position
                ],
            )
            .await?;
            chunk_ids.push(chunk_id);
        }

        let chunk_ids_json = serde_json::to_string(&chunk_ids)
            .map_err(|e| crate::errors::StoreError::DataIntegrity(e.to_string()))?;
        conn.execute(
            "UPDATE documents SET chunk_ids = ? WHERE id = ?",
            params![chunk_ids_json, document_id.clone()],
        )
        .await?;

        Ok::<usize, IngestError>(chunk_ids.len())
    }
    .await;

    match result {
        Ok(chunk_count) => {
            conn.execute("COMMIT", ()).await?;
            info!(document_id = %document_id, chunk_count, "Ingested document");
            let document = store
                .get_document(&document_id)
                .await?
                .ok_or_else(|| IngestError::DocumentVanished(document_id.clone()))?;
            Ok(document)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", ()).await;
            Err(e)
        }
    }
}
