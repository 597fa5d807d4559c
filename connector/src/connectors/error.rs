use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Task dispatch failed: {0}")]
    TaskFailed(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::HttpError(err.to_string())
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::SerializationError(err.to_string())
    }
}

impl From<ingest_models::ModelError> for ConnectorError {
    fn from(err: ingest_models::ModelError) -> Self {
        ConnectorError::SerializationError(err.to_string())
    }
}
