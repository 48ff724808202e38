//! Shared application state built once at startup.

use crate::config::Config;
use std::sync::Arc;
use studyrag::providers::{CompletionProvider, Embedder, HttpEmbedder, OpenAiCompletion};
use studyrag::store::SqliteStore;
use studyrag::tools::RetrievalOptions;
use turso::Database;

/// The state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: SqliteStore,
    /// The same database; the access tables live alongside the domain
    /// tables.
    pub access_db: Database,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionProvider>,
}

impl AppState {
    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            k: self.config.retrieval_top_k,
            min_similarity: self.config.retrieval_min_similarity,
        }
    }
}

/// Builds the shared application state from the configuration.
///
/// Opens the database, runs the idempotent schema setup for both the domain
/// and access tables, and wires the HTTP providers.
pub async fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let store = SqliteStore::new(&config.db_url).await?;
    store.initialize_schema().await?;

    let access_db = store.db.clone();
    studyrag_access::initialize_schema(&access_db).await?;

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        config.embeddings_api_url.clone(),
        config.embeddings_model.clone(),
        config.embeddings_api_key.clone(),
    )?);
    let completion: Arc<dyn CompletionProvider> = Arc::new(OpenAiCompletion::new(
        config.completion_api_url.clone(),
        config.completion_model.clone(),
        config.completion_api_key.clone(),
    )?);

    Ok(AppState {
        config,
        store,
        access_db,
        embedder,
        completion,
    })
}
