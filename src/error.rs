use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that can occur in the admission gate
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid limit: {0}")]
    Misconfiguration(String),

    #[error("Counter store error: {0}")]
    Store(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
