use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Corrupt timer state for '{key}': {reason}")]
    CorruptState { key: String, reason: String },
    #[error("Remote sync error: {0}")]
    Remote(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
