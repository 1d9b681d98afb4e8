//! Error types for depcache.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    // Origin errors
    #[error("Origin error: {0}")]
    Origin(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid rule pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
