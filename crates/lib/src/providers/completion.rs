//! # Completion Stream Client
//!
//! Streams a model's incremental response from an OpenAI-compatible
//! chat-completions endpoint. The provider-specific SSE event zoo is
//! normalised at this boundary to a small closed set: `TextDelta`,
//! `ToolCall`, and `Done`. Reasoning and step-boundary events are dropped
//! here and never reach the core.

use crate::errors::ProviderError;
use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::{Stream, StreamExt};
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::pin::Pin;
use tracing::{debug, warn};

/// One turn of model input, in the OpenAI chat shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// An assistant turn that requested tool invocations.
    pub fn assistant_tool_calls(calls: Vec<AssistantToolCall>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// A tool output turn answering the call with id `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// A completed tool call as echoed back in an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: AssistantFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// The declaration of one invocable tool: name, description, and a JSON
/// schema for its arguments.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A fully accumulated tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

/// The closed event set forwarded to the conversation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Done { finish_reason: Option<String> },
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionEvent, ProviderError>> + Send>>;

/// The input to one completion pass: system instructions and turn history
/// are already folded into `messages`.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// A trait for the completion-stream collaborator.
#[async_trait]
pub trait CompletionProvider: Send + Sync + Debug + DynClone {
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError>;
}

dyn_clone::clone_trait_object!(CompletionProvider);

// --- SSE chunk payload structures ---

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Tool-call fragments accumulated across deltas, keyed by the tool call's
/// own `index` field within the delta.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// A `CompletionProvider` backed by an OpenAI-compatible streaming API.
#[derive(Clone, Debug)]
pub struct OpenAiCompletion {
    client: ReqwestClient,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompletion {
    pub fn new(
        api_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            api_url,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| json!({ "type": "function", "function": t }))
                .collect();
            body["tools"] = Value::Array(tools);
        }

        debug!(model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "--> Opening completion stream");

        let mut request_builder = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let response = request_builder
            .send()
            .await
            .map_err(ProviderError::Request)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(error_text));
        }

        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            pump_sse(response, tx).await;
        });

        Ok(Box::pin(rx))
    }
}

/// Reads the SSE body line by line, forwarding normalised events.
///
/// Send failures mean the consumer hung up; the pump just stops.
async fn pump_sse(
    response: reqwest::Response,
    tx: UnboundedSender<Result<CompletionEvent, ProviderError>>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut pending_calls: BTreeMap<u32, PartialToolCall> = BTreeMap::new();
    let mut finish_reason: Option<String> = None;
    let mut done_sent = false;

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.unbounded_send(Err(ProviderError::Stream(e.to_string())));
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk_bytes));

        // Drain complete lines; a partial line stays buffered for the next
        // network chunk.
        while let Some(newline_at) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline_at).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };

            if payload == "[DONE]" {
                flush_done(&tx, &mut pending_calls, finish_reason.take());
                done_sent = true;
                continue;
            }

            let parsed: StreamChunk = match serde_json::from_str(payload) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable completion stream chunk");
                    continue;
                }
            };

            let Some(choice) = parsed.choices.into_iter().next() else {
                continue;
            };
            if let Some(reason) = choice.finish_reason {
                finish_reason = Some(reason);
            }
            if let Some(text) = choice.delta.content {
                if !text.is_empty()
                    && tx
                        .unbounded_send(Ok(CompletionEvent::TextDelta(text)))
                        .is_err()
                {
                    return;
                }
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let partial = pending_calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    partial.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        partial.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }

    // The body ended without a [DONE] marker; still terminate the event
    // stream so the consumer does not hang.
    if !done_sent {
        flush_done(&tx, &mut pending_calls, finish_reason);
    }
}

fn flush_done(
    tx: &UnboundedSender<Result<CompletionEvent, ProviderError>>,
    pending_calls: &mut BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
) {
    for (_, call) in std::mem::take(pending_calls) {
        let _ = tx.unbounded_send(Ok(CompletionEvent::ToolCall(ToolCallRequest {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        })));
    }
    let _ = tx.unbounded_send(Ok(CompletionEvent::Done { finish_reason }));
}
