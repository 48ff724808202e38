//! # Application Configuration
//!
//! Flat environment-variable configuration for the server binary. `.env`
//! files are loaded by the entry point via `dotenvy` before this runs.

use std::env;
use studyrag::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use studyrag::search::DEFAULT_TOP_K;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is missing.
    Missing(&'static str),
    /// An environment variable is set but cannot be parsed.
    Invalid(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "Missing required environment variable: {name}")
            }
            ConfigError::Invalid(name, value) => {
                write!(f, "Invalid value for {name}: {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// The runtime configuration of the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// The port to listen on. `PORT`, default 9090.
    pub port: u16,
    /// The path to the SQLite database file. `DB_URL`.
    pub db_url: String,
    /// OpenAI-compatible embeddings endpoint. `EMBEDDINGS_API_URL`.
    pub embeddings_api_url: String,
    /// Embedding model identifier. `EMBEDDINGS_MODEL`.
    pub embeddings_model: String,
    /// Optional bearer key for the embeddings endpoint. `EMBEDDINGS_API_KEY`.
    pub embeddings_api_key: Option<String>,
    /// OpenAI-compatible streaming chat-completions endpoint.
    /// `COMPLETION_API_URL`.
    pub completion_api_url: String,
    /// Completion model identifier. `COMPLETION_MODEL`.
    pub completion_model: String,
    /// Optional bearer key for the completion endpoint. `COMPLETION_API_KEY`.
    pub completion_api_key: Option<String>,
    /// Maximum chunk size in characters. `CHUNK_SIZE`, default 6000.
    pub chunk_size: usize,
    /// Chunk overlap in characters. `CHUNK_OVERLAP`, default 1000.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per search. `RETRIEVAL_TOP_K`, default 4.
    pub retrieval_top_k: usize,
    /// Optional similarity floor for retrieval. `RETRIEVAL_MIN_SIMILARITY`,
    /// unset by default.
    pub retrieval_min_similarity: Option<f32>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid(name, value)),
        None => Ok(default),
    }
}

/// Loads the configuration from the environment.
pub fn get_config() -> Result<Config, ConfigError> {
    Ok(Config {
        port: parsed_or("PORT", 9090)?,
        db_url: optional("DB_URL").unwrap_or_else(|| "db/studyrag.db".to_string()),
        embeddings_api_url: required("EMBEDDINGS_API_URL")?,
        embeddings_model: required("EMBEDDINGS_MODEL")?,
        embeddings_api_key: optional("EMBEDDINGS_API_KEY"),
        completion_api_url: required("COMPLETION_API_URL")?,
        completion_model: required("COMPLETION_MODEL")?,
        completion_api_key: optional("COMPLETION_API_KEY"),
        chunk_size: parsed_or("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
        chunk_overlap: parsed_or("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        retrieval_top_k: parsed_or("RETRIEVAL_TOP_K", DEFAULT_TOP_K)?,
        retrieval_min_similarity: match optional("RETRIEVAL_MIN_SIMILARITY") {
            Some(value) => Some(
                value
                    .parse()
                    .map_err(|_| ConfigError::Invalid("RETRIEVAL_MIN_SIMILARITY", value))?,
            ),
            None => None,
        },
    })
}
