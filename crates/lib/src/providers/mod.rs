//! External AI collaborators: the embedding service and the streaming
//! chat-completion service. Both are traits so tests can script them.

pub mod completion;
pub mod embedding;

pub use completion::{
    AssistantFunctionCall, AssistantToolCall, ChatMessage, ChatRequest, CompletionEvent,
    CompletionProvider, CompletionStream, OpenAiCompletion, ToolCallRequest, ToolSpec,
};
pub use embedding::{Embedder, Embedding, HttpEmbedder};
