/// Error types for the message cache
///
/// Cache operations themselves never fail: lookups return `None` and malformed
/// payloads are normalized with defaults. These errors only cover the outer
/// surfaces (configuration, history preload, the replay binary).
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preload error: {0}")]
    Preload(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
