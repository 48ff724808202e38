//! Shared test fixtures: an in-memory store and scriptable provider doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use studyrag::errors::ProviderError;
use studyrag::providers::{
    ChatRequest, CompletionEvent, CompletionProvider, CompletionStream, Embedder, Embedding,
};
use studyrag::store::SqliteStore;

static TRACING: Once = Once::new();

/// Initializes a compact tracing subscriber once for the whole test binary.
pub fn setup_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .try_init();
    });
}

/// An in-memory store with both the domain and access schemas applied.
pub async fn memory_store() -> SqliteStore {
    let store = SqliteStore::new(":memory:")
        .await
        .expect("failed to open in-memory store");
    store
        .initialize_schema()
        .await
        .expect("failed to initialize schema");
    studyrag_access::initialize_schema(&store.db)
        .await
        .expect("failed to initialize access schema");
    store
}

/// A deterministic embedder: known texts map to fixed vectors, everything
/// else gets the default vector.
#[derive(Clone, Debug)]
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    default: Vec<f32>,
}

impl MockEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            default,
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let vector = self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Ok(Embedding {
            vector,
            model: "mock-embedder".to_string(),
        })
    }
}

/// A completion provider that plays back scripted event passes in order and
/// records every request it receives.
#[derive(Clone, Debug)]
pub struct MockCompletion {
    passes: Arc<Mutex<VecDeque<Vec<CompletionEvent>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockCompletion {
    pub fn new(passes: Vec<Vec<CompletionEvent>>) -> Self {
        Self {
            passes: Arc::new(Mutex::new(passes.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every `ChatRequest` received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .passes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("no scripted completion pass left".to_string()))?;
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

/// Splits `deltas` into a scripted pass ending in `Done`.
pub fn text_pass(deltas: &[&str]) -> Vec<CompletionEvent> {
    let mut events: Vec<CompletionEvent> = deltas
        .iter()
        .map(|d| CompletionEvent::TextDelta(d.to_string()))
        .collect();
    events.push(CompletionEvent::Done {
        finish_reason: Some("stop".to_string()),
    });
    events
}
