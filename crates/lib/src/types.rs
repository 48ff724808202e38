//! Domain entities shared across the pipeline.
//!
//! All entities are hard-deleted; there are no tombstones. Chunks are
//! write-once: they are created during document ingestion and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace owns documents and chats. Its visibility gates read access
/// to all child entities transitively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

/// The answer to "may this user read anything under this workspace?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceVisibility {
    Public { owner_id: String },
    Private { owner_id: String },
}

impl WorkspaceVisibility {
    /// Whether `user_id` may read the workspace's child entities.
    pub fn readable_by(&self, user_id: &str) -> bool {
        match self {
            WorkspaceVisibility::Public { .. } => true,
            WorkspaceVisibility::Private { owner_id } => owner_id == user_id,
        }
    }
}

/// A document belongs to exactly one workspace. Content is not stored after
/// chunking; only the derived chunks are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub title: String,
    pub saving_path: Option<String>,
    pub summary: Option<String>,
    pub chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A bounded-size slice of a document's text, the unit of retrieval.
///
/// `embedder` records the model that produced the vector; mixing models in
/// one workspace breaks ranking comparability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub embedder: String,
    pub from_line: i64,
    pub to_line: i64,
    pub index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a chat transcript. `index` is a gap-free increasing
/// sequence scoped to the chat, used for ordering, not a primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub index: i64,
    pub created_at: DateTime<Utc>,
}

/// A quiz collection. Public collections are readable by anyone; only the
/// creating user may mutate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizCollection {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub quiz_collection_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub false_answers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One retrieval hit: a chunk joined with its parent document for citation
/// metadata, plus its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub chunk: Chunk,
    pub document: Document,
    pub similarity: f32,
}
