//! # Document-Grounded Study Assistant
//!
//! This crate implements the core of a workspace-scoped study assistant:
//! document ingestion (chunking plus embedding), similarity retrieval over
//! the embedded chunks, and a stateful streaming conversation loop in which
//! the model can call tools against the workspace.

pub mod agent;
pub mod chunker;
pub mod errors;
pub mod ingest;
pub mod protocol;
pub mod providers;
pub mod search;
pub mod session;
pub mod store;
pub mod tools;
pub mod types;

pub use agent::{AgentError, AgentEvent, INSTRUCTIONS};
pub use errors::{ProviderError, StoreError};
pub use ingest::{ingest_document, ChunkingOptions, IngestError};
pub use protocol::{ClientMessage, Notification, NotificationKind};
pub use providers::{
    ChatMessage, CompletionProvider, Embedder, Embedding, HttpEmbedder, OpenAiCompletion,
};
pub use search::{search_chunks, SearchError, DEFAULT_TOP_K};
pub use session::{ChatSession, Flow};
pub use store::SqliteStore;
pub use tools::{RetrievalOptions, ToolError, ToolRegistry};
pub use types::{Chat, Chunk, ChunkMatch, Document, Message, Role, Workspace};
