use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
    #[error("GEMINI_API_KEY environment variable is required")]
    MissingCredential,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("invalid task in {path}: {reason}")]
    InvalidTask { path: PathBuf, reason: String },
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}
