//! # Embedding Client
//!
//! Converts text into a fixed-dimension vector by calling an external,
//! OpenAI-compatible embeddings API. The call is not retried: callers must
//! treat a network failure as fatal to the enclosing ingestion step or
//! search.

use crate::errors::ProviderError;
use async_trait::async_trait;
use dyn_clone::DynClone;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// A vector together with the id of the model that produced it.
///
/// The dimension is fixed per deployment; the chunk store records the model
/// so mixed-model workspaces can be detected rather than silently mis-ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

/// A trait for the embedding collaborator.
#[async_trait]
pub trait Embedder: Send + Sync + Debug + DynClone {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;
}

dyn_clone::clone_trait_object!(Embedder);

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Either the OpenAI-compatible envelope or the bare `{"embedding": [...]}`
/// shape a minimal embedder sidecar returns.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum EmbeddingResponse {
    OpenAi {
        data: Vec<EmbeddingData>,
        #[serde(default)]
        model: Option<String>,
    },
    Bare {
        embedding: Vec<f32>,
    },
}

/// An `Embedder` backed by an HTTP embeddings endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmbedder {
    client: ReqwestClient,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
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
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let request_body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        debug!(model = %self.model, chars = text.chars().count(), "--> Sending request to embeddings API");

        let mut request_builder = self.client.post(&self.api_url).json(&request_body);
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

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(ProviderError::Deserialization)?;

        match parsed {
            EmbeddingResponse::OpenAi { data, model } => data
                .into_iter()
                .next()
                .map(|d| Embedding {
                    vector: d.embedding,
                    model: model.unwrap_or_else(|| self.model.clone()),
                })
                .ok_or_else(|| {
                    ProviderError::Api("Embeddings API returned no embeddings".to_string())
                }),
            EmbeddingResponse::Bare { embedding } => Ok(Embedding {
                vector: embedding,
                model: self.model.clone(),
            }),
        }
    }
}
