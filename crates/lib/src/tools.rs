//! # Tool Registry
//!
//! The named, schema-declared functions the conversation model may invoke
//! mid-response. A registry is built per session with the workspace, chat,
//! and user identity injected explicitly.
//!
//! Expected business failures (not found, forbidden) are returned as
//! structured `{status, type: "error", ...}` payloads that flow back to the
//! model as tool output, so the model can narrate the failure; Rust errors
//! are reserved for unexpected store/provider failures. Authorization is
//! re-checked on every call, never cached: the registry lives for the whole
//! session and the underlying rows may change between calls.

use crate::errors::StoreError;
use crate::protocol::{payload, Notification};
use crate::providers::{Embedder, ToolSpec};
use crate::search::{self, SearchError};
use crate::store::{QuestionPatch, QuizPatch, SqliteStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Search error: {0}")]
    Search(#[from] SearchError),
}

/// Retrieval parameters injected by the deployment configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub k: usize,
    pub min_similarity: Option<f32>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: search::DEFAULT_TOP_K,
            min_similarity: None,
        }
    }
}

/// The per-session tool registry. All context is explicit fields, not
/// ambient closures.
pub struct ToolRegistry {
    store: SqliteStore,
    embedder: Arc<dyn Embedder>,
    outbound: mpsc::Sender<Notification>,
    workspace_id: String,
    chat_id: String,
    user_id: String,
    retrieval: RetrievalOptions,
}

// --- Argument shapes (camelCase on the wire, like the rest of the protocol) ---

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct ChatIdArgs {
    #[serde(rename = "chatId")]
    chat_id: String,
}

#[derive(Deserialize)]
struct DocumentIdArgs {
    #[serde(rename = "documentId")]
    document_id: String,
}

#[derive(Deserialize)]
struct TitleArgs {
    title: String,
}

#[derive(Deserialize)]
struct AddQuizArgs {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: Option<bool>,
}

#[derive(Deserialize)]
struct EditQuizArgs {
    #[serde(rename = "quizId")]
    quiz_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: Option<bool>,
}

#[derive(Deserialize)]
struct QuizIdArgs {
    #[serde(rename = "quizId")]
    quiz_id: String,
}

#[derive(Deserialize)]
struct AddQuestionArgs {
    #[serde(rename = "quizId")]
    quiz_id: String,
    question: String,
    answer: String,
    #[serde(default, rename = "falseAnswers")]
    false_answers: Vec<String>,
}

#[derive(Deserialize)]
struct EditQuestionArgs {
    #[serde(rename = "questionId")]
    question_id: String,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default, rename = "falseAnswers")]
    false_answers: Option<Vec<String>>,
}

// --- Payload helpers ---

fn ok(message: &str, data: Value) -> Value {
    json!({ "status": 200, "type": "success", "success": true, "message": message, "data": data })
}

fn err(status: u16, message: &str) -> Value {
    json!({ "status": status, "type": "error", "success": false, "message": message })
}

fn not_found(what: &str) -> Value {
    err(404, &format!("{what} not found"))
}

fn unauthorized() -> Value {
    err(401, "Unauthorized Access: Token is invalid")
}

fn forbidden() -> Value {
    err(403, "Forbidden: you do not own this resource")
}

fn bad_arguments(e: &serde_json::Error) -> Value {
    err(400, &format!("Invalid tool arguments: {e}"))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

impl ToolRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn Embedder>,
        outbound: mpsc::Sender<Notification>,
        workspace_id: String,
        chat_id: String,
        user_id: String,
        retrieval: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            outbound,
            workspace_id,
            chat_id,
            user_id,
            retrieval,
        }
    }

    /// Tool declarations passed to the completion provider.
    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "search_in_knowledge_base".to_string(),
                description: "Search the workspace documents for passages relevant to a query."
                    .to_string(),
                parameters: object_schema(
                    json!({ "query": { "type": "string" } }),
                    &["query"],
                ),
            },
            ToolSpec {
                name: "list_knowledge_base".to_string(),
                description: "List the documents in the workspace.".to_string(),
                parameters: object_schema(json!({}), &[]),
            },
            ToolSpec {
                name: "get_workspace_info".to_string(),
                description: "Get information about the current workspace.".to_string(),
                parameters: object_schema(json!({}), &[]),
            },
            ToolSpec {
                name: "get_chat_info".to_string(),
                description: "Get information about a chat by id.".to_string(),
                parameters: object_schema(
                    json!({ "chatId": { "type": "string" } }),
                    &["chatId"],
                ),
            },
            ToolSpec {
                name: "get_current_chat_info".to_string(),
                description: "Get information about the current chat.".to_string(),
                parameters: object_schema(json!({}), &[]),
            },
            ToolSpec {
                name: "get_document_info".to_string(),
                description: "Get information about a document by id.".to_string(),
                parameters: object_schema(
                    json!({ "documentId": { "type": "string" } }),
                    &["documentId"],
                ),
            },
            ToolSpec {
                name: "change_chat_name".to_string(),
                description: "Rename the current chat.".to_string(),
                parameters: object_schema(json!({ "title": { "type": "string" } }), &["title"]),
            },
            ToolSpec {
                name: "list_user_quizzes".to_string(),
                description: "List the quiz collections owned by the current user.".to_string(),
                parameters: object_schema(json!({}), &[]),
            },
            ToolSpec {
                name: "add_quiz".to_string(),
                description: "Create a new quiz collection for the current user.".to_string(),
                parameters: object_schema(
                    json!({
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "public": { "type": "boolean" }
                    }),
                    &["name"],
                ),
            },
            ToolSpec {
                name: "edit_user_quiz".to_string(),
                description: "Update a quiz collection owned by the current user.".to_string(),
                parameters: object_schema(
                    json!({
                        "quizId": { "type": "string" },
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "public": { "type": "boolean" }
                    }),
                    &["quizId"],
                ),
            },
            ToolSpec {
                name: "list_quiz_question".to_string(),
                description: "List the questions of a quiz collection the current user may read."
                    .to_string(),
                parameters: object_schema(
                    json!({ "quizId": { "type": "string" } }),
                    &["quizId"],
                ),
            },
            ToolSpec {
                name: "add_quiz_question".to_string(),
                description: "Add a question to a quiz collection owned by the current user."
                    .to_string(),
                parameters: object_schema(
                    json!({
                        "quizId": { "type": "string" },
                        "question": { "type": "string" },
                        "answer": { "type": "string" },
                        "falseAnswers": { "type": "array", "items": { "type": "string" } }
                    }),
                    &["quizId", "question", "answer"],
                ),
            },
            ToolSpec {
                name: "edit_quiz_question".to_string(),
                description: "Update a question in a quiz collection owned by the current user."
                    .to_string(),
                parameters: object_schema(
                    json!({
                        "questionId": { "type": "string" },
                        "question": { "type": "string" },
                        "answer": { "type": "string" },
                        "falseAnswers": { "type": "array", "items": { "type": "string" } }
                    }),
                    &["questionId"],
                ),
            },
        ]
    }

    /// Invokes a tool by name with raw JSON arguments.
    ///
    /// Returns the structured payload to feed back to the model; `Err` is
    /// only for unexpected infrastructure failures.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<Value, ToolError> {
        debug!(tool = name, "Invoking tool");
        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return Ok(bad_arguments(&e)),
        };

        match name {
            "search_in_knowledge_base" => self.search_in_knowledge_base(args).await,
            "list_knowledge_base" => self.list_knowledge_base().await,
            "get_workspace_info" => self.get_workspace_info().await,
            "get_chat_info" => self.get_chat_info(args).await,
            "get_current_chat_info" => self.get_current_chat_info().await,
            "get_document_info" => self.get_document_info(args).await,
            "change_chat_name" => self.change_chat_name(args).await,
            "list_user_quizzes" => self.list_user_quizzes().await,
            "add_quiz" => self.add_quiz(args).await,
            "edit_user_quiz" => self.edit_user_quiz(args).await,
            "list_quiz_question" => self.list_quiz_question(args).await,
            "add_quiz_question" => self.add_quiz_question(args).await,
            "edit_quiz_question" => self.edit_quiz_question(args).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Whether the session user may view the given workspace.
    async fn may_view_workspace(&self, workspace_id: &str) -> Result<Option<bool>, ToolError> {
        let Some(visibility) = self.store.workspace_visibility(workspace_id).await? else {
            return Ok(None);
        };
        Ok(Some(visibility.readable_by(&self.user_id)))
    }

    async fn search_in_knowledge_base(&self, args: Value) -> Result<Value, ToolError> {
        let args: QueryArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        // Workspace visibility was already checked when the session opened
        // the turn; the search itself needs no extra auth.
        let matches = search::search_chunks(
            &self.store,
            self.embedder.as_ref(),
            &args.query,
            &self.workspace_id,
            self.retrieval.k,
            self.retrieval.min_similarity,
        )
        .await?;

        let results: Vec<Value> = matches
            .iter()
            .map(|m| {
                json!({
                    "content": m.chunk.content,
                    "similarity": m.similarity,
                    "chunkIndex": m.chunk.index,
                    "fromLine": m.chunk.from_line,
                    "toLine": m.chunk.to_line,
                    "document": { "id": m.document.id, "title": m.document.title },
                })
            })
            .collect();
        Ok(ok("Search completed", json!({ "results": results })))
    }

    async fn list_knowledge_base(&self) -> Result<Value, ToolError> {
        let documents = self.store.list_documents(&self.workspace_id).await?;
        Ok(ok("Documents fetched", json!({ "documents": documents })))
    }

    async fn get_workspace_info(&self) -> Result<Value, ToolError> {
        match self.store.get_workspace(&self.workspace_id).await? {
            Some(workspace) => Ok(ok("Workspace found", json!({ "workspace": workspace }))),
            None => Ok(not_found("Workspace")),
        }
    }

    async fn get_chat_info(&self, args: Value) -> Result<Value, ToolError> {
        let args: ChatIdArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(chat) = self.store.get_chat(&args.chat_id).await? else {
            return Ok(not_found("Chat"));
        };
        match self.may_view_workspace(&chat.workspace_id).await? {
            None => Ok(not_found("Workspace")),
            Some(false) => Ok(unauthorized()),
            Some(true) => {
                let workspace = self.store.get_workspace(&chat.workspace_id).await?;
                Ok(ok(
                    "Chat found",
                    json!({ "chat": chat, "workspace": workspace }),
                ))
            }
        }
    }

    async fn get_current_chat_info(&self) -> Result<Value, ToolError> {
        match self.store.get_chat(&self.chat_id).await? {
            Some(chat) => Ok(ok("Chat found", json!({ "chat": chat }))),
            None => Ok(not_found("Chat")),
        }
    }

    async fn get_document_info(&self, args: Value) -> Result<Value, ToolError> {
        let args: DocumentIdArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(document) = self.store.get_document(&args.document_id).await? else {
            return Ok(not_found("Document"));
        };
        match self.may_view_workspace(&document.workspace_id).await? {
            None => Ok(not_found("Workspace")),
            Some(false) => Ok(unauthorized()),
            Some(true) => Ok(ok("Document found", json!({ "document": document }))),
        }
    }

    /// The one tool with a side effect beyond its return value: it pushes a
    /// `CHAT_INFO_UPDATE` notification to the client so the UI can rename
    /// the chat immediately.
    async fn change_chat_name(&self, args: Value) -> Result<Value, ToolError> {
        let args: TitleArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(chat) = self.store.get_chat(&self.chat_id).await? else {
            return Ok(not_found("Chat"));
        };
        if chat.user_id != self.user_id {
            return Ok(forbidden());
        }
        let Some(updated) = self.store.rename_chat(&self.chat_id, &args.title).await? else {
            return Ok(not_found("Chat"));
        };

        // The client may already be gone; the rename stands regardless.
        let _ = self
            .outbound
            .send(Notification::success(
                200,
                "Chat updated",
                Some(payload::chat_info_update(&updated)),
            ))
            .await;

        Ok(ok("Chat renamed", json!({ "chat": updated })))
    }

    async fn list_user_quizzes(&self) -> Result<Value, ToolError> {
        let quizzes = self.store.list_quizzes_by_user(&self.user_id).await?;
        Ok(ok("Quizzes fetched", json!({ "quizzes": quizzes })))
    }

    async fn add_quiz(&self, args: Value) -> Result<Value, ToolError> {
        let args: AddQuizArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let quiz = self
            .store
            .create_quiz(
                &self.user_id,
                &args.name,
                args.description.as_deref(),
                args.public.unwrap_or(false),
            )
            .await?;
        Ok(ok("Quiz created", json!({ "quiz": quiz })))
    }

    async fn edit_user_quiz(&self, args: Value) -> Result<Value, ToolError> {
        let args: EditQuizArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(quiz) = self.store.get_quiz(&args.quiz_id).await? else {
            return Ok(not_found("Quiz"));
        };
        if quiz.user_id != self.user_id {
            return Ok(forbidden());
        }
        let updated = self
            .store
            .update_quiz(
                &args.quiz_id,
                QuizPatch {
                    name: args.name,
                    description: args.description,
                    public: args.public,
                },
            )
            .await?;
        match updated {
            Some(quiz) => Ok(ok("Quiz updated", json!({ "quiz": quiz }))),
            None => Ok(not_found("Quiz")),
        }
    }

    async fn list_quiz_question(&self, args: Value) -> Result<Value, ToolError> {
        let args: QuizIdArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(quiz) = self.store.get_quiz(&args.quiz_id).await? else {
            return Ok(not_found("Quiz"));
        };
        // Public quizzes are readable by anyone; private ones only by the
        // owner. Mutations stay owner-only either way.
        if !quiz.public && quiz.user_id != self.user_id {
            return Ok(forbidden());
        }
        let questions = self.store.list_questions(&args.quiz_id).await?;
        Ok(ok("Questions fetched", json!({ "questions": questions })))
    }

    async fn add_quiz_question(&self, args: Value) -> Result<Value, ToolError> {
        let args: AddQuestionArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(quiz) = self.store.get_quiz(&args.quiz_id).await? else {
            return Ok(not_found("Quiz"));
        };
        if quiz.user_id != self.user_id {
            return Ok(forbidden());
        }
        let question = self
            .store
            .create_question(
                &args.quiz_id,
                &self.user_id,
                &args.question,
                &args.answer,
                &args.false_answers,
            )
            .await?;
        Ok(ok("Question created", json!({ "question": question })))
    }

    async fn edit_quiz_question(&self, args: Value) -> Result<Value, ToolError> {
        let args: EditQuestionArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Ok(bad_arguments(&e)),
        };
        let Some(question) = self.store.get_question(&args.question_id).await? else {
            return Ok(not_found("Question"));
        };
        if question.user_id != self.user_id {
            return Ok(forbidden());
        }
        let updated = self
            .store
            .update_question(
                &args.question_id,
                QuestionPatch {
                    question: args.question,
                    answer: args.answer,
                    false_answers: args.false_answers,
                },
            )
            .await?;
        match updated {
            Some(question) => Ok(ok("Question updated", json!({ "question": question }))),
            None => Ok(not_found("Question")),
        }
    }
}
