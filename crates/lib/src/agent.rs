//! # Conversation Turn Loop
//!
//! Drives one user turn to completion: stream a completion pass, forward
//! text deltas as they arrive, and when the model requests tools, execute
//! them and feed the outputs back for another pass. The loop ends on the
//! first pass that requests no tools; the accumulated text across all
//! passes is the assistant's final message.

use crate::errors::ProviderError;
use crate::providers::{
    AssistantFunctionCall, AssistantToolCall, ChatMessage, ChatRequest, CompletionEvent,
    CompletionProvider, ToolCallRequest,
};
use crate::tools::{ToolError, ToolRegistry};
use futures::StreamExt;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upper bound on completion passes within one turn. A model that keeps
/// requesting tools past this is looping; the turn is aborted.
pub const MAX_PASSES: usize = 10;

/// The system instructions prepended to every turn's model input.
pub const INSTRUCTIONS: &str = "\
You are a study assistant grounded in the documents of the current workspace.

Rules:
- When the user asks about the material, first call search_in_knowledge_base \
and answer from the returned passages. Do not invent content that is not in \
the documents.
- If a search returns nothing useful, say so instead of guessing.
- Use list_knowledge_base, get_workspace_info, get_document_info, \
get_chat_info and get_current_chat_info to answer questions about the \
workspace itself.
- When the chat still has its default name and the topic has become clear, \
rename it with change_chat_name to a short descriptive title.
- The quiz tools (list_user_quizzes, add_quiz, edit_user_quiz, \
list_quiz_question, add_quiz_question, edit_quiz_question) manage the user's \
own quiz collections. Base new questions on the workspace documents.
- Answer in the language the user writes in. Keep answers concise.";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Completion provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("Turn aborted after {MAX_PASSES} tool passes without a final answer")]
    PassLimitExceeded,
}

/// Turn progress forwarded to the caller as it happens. The final text is
/// the `run_turn` return value, not an event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    TextDelta(String),
    ToolCall { name: String, arguments: String },
    ToolResult { name: String, output: Value },
}

/// Runs one turn against the model until it produces a final answer.
///
/// `messages` must already contain the system instructions, the prior
/// history, and the new user message. Event send failures are ignored so a
/// disconnected consumer does not abort the turn.
pub async fn run_turn(
    provider: &dyn CompletionProvider,
    registry: &ToolRegistry,
    mut messages: Vec<ChatMessage>,
    events_tx: &mpsc::Sender<AgentEvent>,
) -> Result<String, AgentError> {
    let tools = registry.specs();
    let mut final_text = String::new();

    for pass in 0..MAX_PASSES {
        let mut stream = provider
            .stream_chat(ChatRequest {
                messages: messages.clone(),
                tools: tools.clone(),
            })
            .await?;

        let mut requested: Vec<ToolCallRequest> = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                CompletionEvent::TextDelta(delta) => {
                    final_text.push_str(&delta);
                    let _ = events_tx.send(AgentEvent::TextDelta(delta)).await;
                }
                CompletionEvent::ToolCall(request) => requested.push(request),
                CompletionEvent::Done { finish_reason } => {
                    debug!(pass, ?finish_reason, "Completion pass finished");
                }
            }
        }

        if requested.is_empty() {
            info!(passes = pass + 1, "Turn completed");
            return Ok(final_text);
        }

        messages.push(ChatMessage::assistant_tool_calls(
            requested
                .iter()
                .map(|r| AssistantToolCall {
                    id: r.id.clone(),
                    kind: "function".to_string(),
                    function: AssistantFunctionCall {
                        name: r.name.clone(),
                        arguments: r.arguments.clone(),
                    },
                })
                .collect(),
        ));

        for request in requested {
            let _ = events_tx
                .send(AgentEvent::ToolCall {
                    name: request.name.clone(),
                    arguments: request.arguments.clone(),
                })
                .await;

            // An unknown tool name goes back to the model as structured tool
            // output; only store/provider failures abort the turn.
            let output = match registry.invoke(&request.name, &request.arguments).await {
                Ok(output) => output,
                Err(ToolError::UnknownTool(name)) => {
                    warn!(tool = %name, "Model requested an unknown tool");
                    json!({
                        "status": 404,
                        "type": "error",
                        "success": false,
                        "message": format!("Unknown tool: {name}"),
                    })
                }
                Err(e) => return Err(e.into()),
            };

            let _ = events_tx
                .send(AgentEvent::ToolResult {
                    name: request.name.clone(),
                    output: output.clone(),
                })
                .await;

            messages.push(ChatMessage::tool_result(request.id, output.to_string()));
        }
    }

    Err(AgentError::PassLimitExceeded)
}
