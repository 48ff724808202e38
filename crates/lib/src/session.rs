//! # Chat Session State Machine
//!
//! One `ChatSession` per live connection. The session is transport-agnostic:
//! raw text frames go in through [`ChatSession::handle_raw`], and
//! [`Notification`] envelopes come out through an mpsc sender the transport
//! drains. The lifecycle is strict: the first frame must authenticate, and
//! protocol violations close the connection after a single error envelope.
//!
//! A disconnect mid-turn does not abort the turn. The turn runs to
//! completion and persists its result; only the next outbound send notices
//! the client is gone.

use crate::agent::{self, AgentError, AgentEvent};
use crate::errors::StoreError;
use crate::protocol::{payload, ClientMessage, Notification};
use crate::providers::{ChatMessage, CompletionProvider, Embedder};
use crate::store::SqliteStore;
use crate::tools::{RetrievalOptions, ToolRegistry};
use crate::types::Role;
use std::sync::Arc;
use studyrag_access::User;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use turso::Database;

const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Error, Debug)]
enum TurnError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Whether the transport should keep reading frames after a handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Authenticating,
    Idle,
    Closed,
}

/// The per-connection session driving authentication and chat turns.
pub struct ChatSession {
    store: SqliteStore,
    access_db: Database,
    embedder: Arc<dyn Embedder>,
    completion: Arc<dyn CompletionProvider>,
    outbound: mpsc::Sender<Notification>,
    workspace_id: String,
    retrieval: RetrievalOptions,
    state: State,
    user: Option<User>,
}

impl ChatSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        access_db: Database,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionProvider>,
        outbound: mpsc::Sender<Notification>,
        workspace_id: String,
        retrieval: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            access_db,
            embedder,
            completion,
            outbound,
            workspace_id,
            retrieval,
            state: State::Authenticating,
            user: None,
        }
    }

    /// Validates the connection target before any frame is read.
    ///
    /// A connection to a nonexistent workspace gets one 404 envelope and is
    /// closed; authentication is not even attempted.
    pub async fn open(&mut self) -> Flow {
        match self.store.get_workspace(&self.workspace_id).await {
            Ok(Some(_)) => Flow::Continue,
            Ok(None) => {
                self.close_with(Notification::error(404, "Workspace not found"))
                    .await
            }
            Err(e) => {
                error!(error = %e, "Failed to look up workspace on connect");
                self.close_with(Notification::error(500, "Internal server error"))
                    .await
            }
        }
    }

    /// Handles one raw inbound frame.
    pub async fn handle_raw(&mut self, raw: &str) -> Flow {
        if self.state == State::Closed {
            return Flow::Close;
        }

        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed client frame");
                return self
                    .close_with(Notification::error(400, "Malformed message"))
                    .await;
            }
        };

        match message {
            ClientMessage::Auth { token } => self.handle_auth(&token).await,
            ClientMessage::Chat { message, chat_id } => {
                if self.state != State::Idle {
                    return self
                        .close_with(Notification::error(
                            401,
                            "Unauthorized Access: Token is invalid",
                        ))
                        .await;
                }
                self.handle_chat(&message, chat_id.as_deref()).await
            }
        }
    }

    async fn handle_auth(&mut self, token: &str) -> Flow {
        match studyrag_access::resolve_session(&self.access_db, token).await {
            Ok(Some((user, _session))) => {
                info!(user_id = %user.id, workspace_id = %self.workspace_id, "Session authenticated");
                let notification =
                    Notification::success(200, "Authenticated", Some(payload::auth(&user)));
                self.user = Some(user);
                self.state = State::Idle;
                self.notify(notification).await
            }
            Ok(None) => {
                self.close_with(Notification::error(
                    401,
                    "Unauthorized Access: Token is invalid",
                ))
                .await
            }
            Err(e) => {
                error!(error = %e, "Session resolution failed");
                self.close_with(Notification::error(500, "Internal server error"))
                    .await
            }
        }
    }

    async fn handle_chat(&mut self, message: &str, chat_id: Option<&str>) -> Flow {
        let user = match &self.user {
            Some(user) => user.clone(),
            None => {
                return self
                    .close_with(Notification::error(
                        401,
                        "Unauthorized Access: Token is invalid",
                    ))
                    .await
            }
        };

        // Visibility is re-checked per turn, not cached from AUTH time.
        match self.store.workspace_visibility(&self.workspace_id).await {
            Ok(Some(visibility)) if visibility.readable_by(&user.id) => {}
            Ok(Some(_)) => {
                return self
                    .close_with(Notification::error(
                        401,
                        "Unauthorized Access: Token is invalid",
                    ))
                    .await
            }
            Ok(None) => {
                return self
                    .close_with(Notification::error(404, "Workspace not found"))
                    .await
            }
            Err(e) => {
                error!(error = %e, "Workspace visibility check failed");
                return self
                    .close_with(Notification::error(500, "Internal server error"))
                    .await;
            }
        }

        match self.run_chat_turn(&user, message, chat_id).await {
            Ok(flow) => flow,
            Err(e) => {
                error!(error = %e, "Chat turn failed");
                // The user message (if it got that far) stays persisted; one
                // error envelope is attempted and the session stays usable.
                self.notify(Notification::error(500, "Failed to generate a response"))
                    .await
            }
        }
    }

    async fn run_chat_turn(
        &mut self,
        user: &User,
        user_content: &str,
        chat_id: Option<&str>,
    ) -> Result<Flow, TurnError> {
        let chat = match chat_id {
            Some(id) => {
                let Some(chat) = self.store.get_chat(id).await? else {
                    return Ok(self
                        .notify(Notification::error(404, "Chat not found"))
                        .await);
                };
                if chat.workspace_id != self.workspace_id {
                    return Ok(self
                        .notify(Notification::error(404, "Chat not found"))
                        .await);
                }
                // The loaded chat is re-announced so the client always sees
                // the chat info before the turn streams.
                if self
                    .notify(Notification::success(
                        200,
                        "Chat loaded",
                        Some(payload::chat_info(&chat)),
                    ))
                    .await
                    == Flow::Close
                {
                    return Ok(Flow::Close);
                }
                chat
            }
            None => {
                let chat = self
                    .store
                    .create_chat(&user.id, &self.workspace_id, DEFAULT_CHAT_TITLE)
                    .await?;
                if self
                    .notify(Notification::success(
                        201,
                        "Chat created",
                        Some(payload::chat_info(&chat)),
                    ))
                    .await
                    == Flow::Close
                {
                    return Ok(Flow::Close);
                }
                chat
            }
        };

        let history = self.store.list_messages(&chat.id).await?;
        let mut model_input = Vec::with_capacity(history.len() + 2);
        model_input.push(ChatMessage::system(agent::INSTRUCTIONS));
        for entry in &history {
            match entry.role {
                Role::User => model_input.push(ChatMessage::user(entry.content.clone())),
                // Placeholder rows from interrupted turns carry no signal.
                Role::Assistant if entry.content.is_empty() => {}
                Role::Assistant => {
                    model_input.push(ChatMessage::assistant(entry.content.clone()))
                }
            }
        }
        model_input.push(ChatMessage::user(user_content.to_string()));

        let (user_message, assistant_placeholder) = self
            .store
            .append_turn(&chat.id, &user.id, user_content)
            .await?;
        let _ = self
            .notify(Notification::success(
                200,
                "Message received",
                Some(payload::user_message(&user_message)),
            ))
            .await;

        let registry = ToolRegistry::new(
            self.store.clone(),
            self.embedder.clone(),
            self.outbound.clone(),
            self.workspace_id.clone(),
            chat.id.clone(),
            user.id.clone(),
            self.retrieval,
        );

        let (events_tx, mut events_rx) = mpsc::channel::<AgentEvent>(64);
        let outbound = self.outbound.clone();
        let forward = async move {
            while let Some(event) = events_rx.recv().await {
                let notification = match event {
                    AgentEvent::TextDelta(delta) => Notification::success(
                        200,
                        "Streaming",
                        Some(payload::message_delta(&delta)),
                    ),
                    AgentEvent::ToolCall { name, arguments } => Notification::success(
                        200,
                        "Tool call",
                        Some(payload::tool_call(&name, &arguments)),
                    ),
                    AgentEvent::ToolResult { name, output } => Notification::success(
                        200,
                        "Tool result",
                        Some(payload::tool_result(&name, &output)),
                    ),
                };
                if outbound.send(notification).await.is_err() {
                    // Client gone; keep draining so the turn can finish.
                    while events_rx.recv().await.is_some() {}
                    break;
                }
            }
        };
        let turn = async {
            let result =
                agent::run_turn(self.completion.as_ref(), &registry, model_input, &events_tx)
                    .await;
            drop(events_tx);
            result
        };
        let (turn_result, ()) = tokio::join!(turn, forward);
        let final_text = turn_result?;

        self.store
            .finalize_message(&assistant_placeholder.id, &final_text)
            .await?;
        let final_message = self
            .store
            .get_message(&assistant_placeholder.id)
            .await?
            .unwrap_or_else(|| {
                let mut message = assistant_placeholder.clone();
                message.content = final_text.clone();
                message
            });

        Ok(self
            .notify(Notification::success(
                200,
                "Completed",
                Some(payload::final_message(&final_message)),
            ))
            .await)
    }

    /// Sends one envelope; a send failure means the transport hung up.
    async fn notify(&mut self, notification: Notification) -> Flow {
        if self.outbound.send(notification).await.is_err() {
            self.state = State::Closed;
            return Flow::Close;
        }
        Flow::Continue
    }

    async fn close_with(&mut self, notification: Notification) -> Flow {
        let _ = self.outbound.send(notification).await;
        self.state = State::Closed;
        Flow::Close
    }
}
