//! # Storage Provider
//!
//! A turso-backed store for workspaces, documents, chunks, chats, messages,
//! and quizzes. It holds a `Database` instance, which manages a connection
//! pool; cloning shares the same underlying database, so one store can be
//! handed to every session concurrently.
//!
//! Multi-row writes that must be atomic (`append_turn`, `delete_document`,
//! and the ingestion pipeline in `crate::ingest`) run as explicit
//! `BEGIN TRANSACTION` / `COMMIT` blocks on a single connection.

use crate::errors::StoreError;
use crate::types::{
    Chat, Chunk, Document, Message, Question, QuizCollection, Role, Workspace,
    WorkspaceVisibility,
};
use chrono::{DateTime, Utc};
use std::fmt::{self, Debug};
use tracing::debug;
use turso::{params, Connection, Database, Row, Value as TursoValue};
use uuid::Uuid;

pub mod sql;

/// The persistence collaborator for the whole pipeline.
#[derive(Clone)]
pub struct SqliteStore {
    /// The turso database instance. Cloneable and thread-safe.
    pub db: Database,
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Serializes a vector as a little-endian f32 blob for storage.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// The inverse of [`vector_to_blob`]. Trailing partial words are dropped.
pub fn vector_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .map_err(|e| StoreError::DataIntegrity(format!("Failed to parse date '{value}': {e}")))
}

fn optional_text(row: &Row, index: usize) -> Result<Option<String>, StoreError> {
    match row.get_value(index)? {
        TursoValue::Text(s) => Ok(Some(s)),
        TursoValue::Null => Ok(None),
        other => Err(StoreError::DataIntegrity(format!(
            "Expected text or null at column {index}, got {other:?}"
        ))),
    }
}

fn json_string_list(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::DataIntegrity(format!("Malformed JSON list '{raw}': {e}")))
}

// --- Row parsing ---
//
// The free functions take a column offset so joined selects can reuse them.

fn workspace_from_row(row: &Row) -> Result<Workspace, StoreError> {
    let public: i64 = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Workspace {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        public: public != 0,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn document_from_row(row: &Row, base: usize) -> Result<Document, StoreError> {
    let chunk_ids_raw: String = row.get(base + 6)?;
    let created_at: String = row.get(base + 7)?;
    Ok(Document {
        id: row.get(base)?,
        workspace_id: row.get(base + 1)?,
        user_id: row.get(base + 2)?,
        title: row.get(base + 3)?,
        saving_path: optional_text(row, base + 4)?,
        summary: optional_text(row, base + 5)?,
        chunk_ids: json_string_list(&chunk_ids_raw)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn chunk_from_row(row: &Row, base: usize) -> Result<Chunk, StoreError> {
    let embedding = match row.get_value(base + 5)? {
        TursoValue::Blob(blob) => vector_from_blob(&blob),
        other => {
            return Err(StoreError::DataIntegrity(format!(
                "Expected embedding blob, got {other:?}"
            )))
        }
    };
    Ok(Chunk {
        id: row.get(base)?,
        document_id: row.get(base + 1)?,
        workspace_id: row.get(base + 2)?,
        user_id: row.get(base + 3)?,
        content: row.get(base + 4)?,
        embedding,
        embedder: row.get(base + 6)?,
        from_line: row.get(base + 7)?,
        to_line: row.get(base + 8)?,
        index: row.get(base + 9)?,
    })
}

fn chat_from_row(row: &Row) -> Result<Chat, StoreError> {
    let created_at: String = row.get(4)?;
    Ok(Chat {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
    let role_raw: String = row.get(3)?;
    let role = match role_raw.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            return Err(StoreError::DataIntegrity(format!(
                "Unknown message role '{other}'"
            )))
        }
    };
    let created_at: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        role,
        content: row.get(4)?,
        index: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn quiz_from_row(row: &Row) -> Result<QuizCollection, StoreError> {
    let public: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(QuizCollection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: optional_text(row, 3)?,
        public: public != 0,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn question_from_row(row: &Row) -> Result<Question, StoreError> {
    let false_answers_raw: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(Question {
        id: row.get(0)?,
        quiz_collection_id: row.get(1)?,
        user_id: row.get(2)?,
        question: row.get(3)?,
        answer: row.get(4)?,
        false_answers: json_string_list(&false_answers_raw)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Partial update for a quiz collection; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct QuizPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub public: Option<bool>,
}

/// Partial update for a question; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct QuestionPatch {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub false_answers: Option<Vec<String>>,
}

impl SqliteStore {
    /// Creates a new store from a file path or `":memory:"`.
    ///
    /// To share an in-memory database across components (e.g. in tests),
    /// create one store and `.clone()` it.
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        let db = turso::Builder::new_local(db_path).build().await?;
        // WAL mode for better concurrency on file-backed databases; a no-op
        // for in-memory ones.
        let conn = db.connect()?;
        conn.query("PRAGMA journal_mode=WAL;", ()).await?;
        Ok(Self { db })
    }

    /// Wraps an already-built database (shared with the access crate).
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Ensures all application tables and indexes exist. Idempotent.
    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        for statement in sql::ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ()).await?;
        }
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Ok(self.db.connect()?)
    }

    // --- Workspaces ---

    pub async fn create_workspace(
        &self,
        user_id: &str,
        name: &str,
        public: bool,
    ) -> Result<Workspace, StoreError> {
        let conn = self.connect()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO workspaces (id, user_id, name, public) VALUES (?, ?, ?, ?)",
            params![
                id.clone(),
                user_id.to_string(),
                name.to_string(),
                public as i64
            ],
        )
        .await?;
        self.get_workspace(&id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("workspace"))
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_WORKSPACE),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(workspace_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// The visibility gate for everything under a workspace.
    pub async fn workspace_visibility(
        &self,
        id: &str,
    ) -> Result<Option<WorkspaceVisibility>, StoreError> {
        let workspace = self.get_workspace(id).await?;
        Ok(workspace.map(|w| {
            if w.public {
                WorkspaceVisibility::Public { owner_id: w.user_id }
            } else {
                WorkspaceVisibility::Private { owner_id: w.user_id }
            }
        }))
    }

    // --- Documents ---

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_DOCUMENT),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(document_from_row(&row, 0)?)),
            None => Ok(None),
        }
    }

    pub async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "{} WHERE workspace_id = ? ORDER BY created_at",
                    sql::SELECT_DOCUMENT
                ),
                params![workspace_id.to_string()],
            )
            .await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(document_from_row(&row, 0)?);
        }
        Ok(documents)
    }

    /// Deletes a document and its chunks atomically.
    ///
    /// Orphaned chunks would keep surfacing in similarity search with a
    /// dangling citation, so the cascade is mandatory here.
    pub async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            conn.execute(
                "DELETE FROM chunks WHERE document_id = ?",
                params![id.to_string()],
            )
            .await?;
            conn.execute(
                "DELETE FROM documents WHERE id = ?",
                params![id.to_string()],
            )
            .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        match result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                debug!(document_id = %id, "Deleted document and its chunks");
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    // --- Chunks ---

    /// Every chunk in a workspace joined with its parent document, for the
    /// retriever. Write-once rows, so no pagination is attempted.
    pub async fn chunks_with_documents(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<(Chunk, Document)>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                sql::SELECT_CHUNKS_WITH_DOCUMENTS,
                params![workspace_id.to_string()],
            )
            .await?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let chunk = chunk_from_row(&row, 0)?;
            let document = document_from_row(&row, 10)?;
            results.push((chunk, document));
        }
        Ok(results)
    }

    // --- Chats ---

    pub async fn create_chat(
        &self,
        user_id: &str,
        workspace_id: &str,
        title: &str,
    ) -> Result<Chat, StoreError> {
        let conn = self.connect()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO chats (id, workspace_id, user_id, title) VALUES (?, ?, ?, ?)",
            params![
                id.clone(),
                workspace_id.to_string(),
                user_id.to_string(),
                title.to_string()
            ],
        )
        .await?;
        self.get_chat(&id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("chat"))
    }

    pub async fn get_chat(&self, id: &str) -> Result<Option<Chat>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_CHAT),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(chat_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn rename_chat(&self, id: &str, title: &str) -> Result<Option<Chat>, StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE chats SET title = ? WHERE id = ?",
            params![title.to_string(), id.to_string()],
        )
        .await?;
        self.get_chat(id).await
    }

    // --- Messages ---

    /// The full transcript of a chat in ascending `index` order.
    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE chat_id = ? ORDER BY idx ASC", sql::SELECT_MESSAGE),
                params![chat_id.to_string()],
            )
            .await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(message_from_row(&row)?);
        }
        Ok(messages)
    }

    /// Persists a user message and an empty assistant placeholder with
    /// consecutive indexes, atomically.
    ///
    /// The count-then-insert runs inside one transaction so two turns on the
    /// same chat can never race on the index sequence. The placeholder is
    /// created eagerly so a crash mid-stream leaves a row with empty content
    /// rather than no row.
    pub async fn append_turn(
        &self,
        chat_id: &str,
        user_id: &str,
        user_content: &str,
    ) -> Result<(Message, Message), StoreError> {
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = self
            .append_turn_inner(&conn, chat_id, user_id, user_content)
            .await;
        match result {
            Ok(pair) => {
                conn.execute("COMMIT", ()).await?;
                Ok(pair)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn append_turn_inner(
        &self,
        conn: &Connection,
        chat_id: &str,
        user_id: &str,
        user_content: &str,
    ) -> Result<(Message, Message), StoreError> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?",
                params![chat_id.to_string()],
            )
            .await?;
        let next_index: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let user_message_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, chat_id, user_id, role, content, idx)
             VALUES (?, ?, ?, 'user', ?, ?)",
            params![
                user_message_id.clone(),
                chat_id.to_string(),
                user_id.to_string(),
                user_content.to_string(),
                next_index
            ],
        )
        .await?;

        let assistant_message_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, chat_id, user_id, role, content, idx)
             VALUES (?, ?, ?, 'assistant', '', ?)",
            params![
                assistant_message_id.clone(),
                chat_id.to_string(),
                user_id.to_string(),
                next_index + 1
            ],
        )
        .await?;

        let user_message = self
            .get_message_on(conn, &user_message_id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("user message"))?;
        let assistant_message = self
            .get_message_on(conn, &assistant_message_id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("assistant message"))?;
        Ok((user_message, assistant_message))
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.connect()?;
        self.get_message_on(&conn, id).await
    }

    async fn get_message_on(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_MESSAGE),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(message_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Replaces a message's content in place. Used to finalize the eager
    /// assistant placeholder once streaming completes.
    pub async fn finalize_message(&self, id: &str, content: &str) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE messages SET content = ? WHERE id = ?",
            params![content.to_string(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    // --- Quiz collections ---

    pub async fn create_quiz(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        public: bool,
    ) -> Result<QuizCollection, StoreError> {
        let conn = self.connect()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO quiz_collections (id, user_id, name, description, public)
             VALUES (?, ?, ?, ?, ?)",
            params![
                id.clone(),
                user_id.to_string(),
                name.to_string(),
                description.map(str::to_string),
                public as i64
            ],
        )
        .await?;
        self.get_quiz(&id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("quiz collection"))
    }

    pub async fn get_quiz(&self, id: &str) -> Result<Option<QuizCollection>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_QUIZ),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(quiz_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_quizzes_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<QuizCollection>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE user_id = ? ORDER BY created_at", sql::SELECT_QUIZ),
                params![user_id.to_string()],
            )
            .await?;
        let mut quizzes = Vec::new();
        while let Some(row) = rows.next().await? {
            quizzes.push(quiz_from_row(&row)?);
        }
        Ok(quizzes)
    }

    /// Fetch-merge-update so partial patches don't need dynamic SQL.
    pub async fn update_quiz(
        &self,
        id: &str,
        patch: QuizPatch,
    ) -> Result<Option<QuizCollection>, StoreError> {
        let Some(existing) = self.get_quiz(id).await? else {
            return Ok(None);
        };
        let name = patch.name.unwrap_or(existing.name);
        let description = patch.description.or(existing.description);
        let public = patch.public.unwrap_or(existing.public);

        let conn = self.connect()?;
        conn.execute(
            "UPDATE quiz_collections SET name = ?, description = ?, public = ? WHERE id = ?",
            params![name, description, public as i64, id.to_string()],
        )
        .await?;
        self.get_quiz(id).await
    }

    // --- Questions ---

    pub async fn create_question(
        &self,
        quiz_collection_id: &str,
        user_id: &str,
        question: &str,
        answer: &str,
        false_answers: &[String],
    ) -> Result<Question, StoreError> {
        let conn = self.connect()?;
        let id = Uuid::new_v4().to_string();
        let false_answers_json = serde_json::to_string(false_answers)
            .map_err(|e| StoreError::DataIntegrity(e.to_string()))?;
        conn.execute(
            "INSERT INTO questions (id, quiz_collection_id, user_id, question, answer, false_answers)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id.clone(),
                quiz_collection_id.to_string(),
                user_id.to_string(),
                question.to_string(),
                answer.to_string(),
                false_answers_json
            ],
        )
        .await?;
        self.get_question(&id)
            .await?
            .ok_or(StoreError::InsertReturnedNothing("question"))
    }

    pub async fn get_question(&self, id: &str) -> Result<Option<Question>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("{} WHERE id = ?", sql::SELECT_QUESTION),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(question_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_questions(
        &self,
        quiz_collection_id: &str,
    ) -> Result<Vec<Question>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "{} WHERE quiz_collection_id = ? ORDER BY created_at",
                    sql::SELECT_QUESTION
                ),
                params![quiz_collection_id.to_string()],
            )
            .await?;
        let mut questions = Vec::new();
        while let Some(row) = rows.next().await? {
            questions.push(question_from_row(&row)?);
        }
        Ok(questions)
    }

    pub async fn update_question(
        &self,
        id: &str,
        patch: QuestionPatch,
    ) -> Result<Option<Question>, StoreError> {
        let Some(existing) = self.get_question(id).await? else {
            return Ok(None);
        };
        let question = patch.question.unwrap_or(existing.question);
        let answer = patch.answer.unwrap_or(existing.answer);
        let false_answers = patch.false_answers.unwrap_or(existing.false_answers);
        let false_answers_json = serde_json::to_string(&false_answers)
            .map_err(|e| StoreError::DataIntegrity(e.to_string()))?;

        let conn = self.connect()?;
        conn.execute(
            "UPDATE questions SET question = ?, answer = ?, false_answers = ? WHERE id = ?",
            params![question, answer, false_answers_json, id.to_string()],
        )
        .await?;
        self.get_question(id).await
    }
}
