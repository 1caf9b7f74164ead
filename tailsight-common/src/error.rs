use thiserror::Error;

/// Common error type for TailSight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using TailSight's Error.
pub type Result<T> = std::result::Result<T, Error>;
