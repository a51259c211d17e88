use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunLensError {
    #[error("Alert store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunLensError>;
