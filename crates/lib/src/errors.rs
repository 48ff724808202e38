use thiserror::Error;

/// Errors from the external AI collaborators (embedding and completion APIs).
///
/// None of these are retried anywhere in the pipeline: an upstream failure
/// aborts the enclosing ingestion transaction or conversation turn.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to build Reqwest client: {0}")]
    ReqwestClientBuild(reqwest::Error),
    #[error("Failed to send request to AI API: {0}")]
    Request(reqwest::Error),
    #[error("Failed to deserialize AI API response: {0}")]
    Deserialization(reqwest::Error),
    #[error("AI API returned an error: {0}")]
    Api(String),
    #[error("Completion stream error: {0}")]
    Stream(String),
}

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Row for {0} was not returned after insert")]
    InsertReturnedNothing(&'static str),
}
