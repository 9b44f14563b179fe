//! Error types for the index client

use thiserror::Error;

/// Errors that can occur while talking to the index store
#[derive(Debug, Error)]
pub enum IndexError {
    /// Connection, timeout or body transfer failure
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The base URL or a derived endpoint is not usable
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),

    /// The store answered with an unexpected status code
    #[error("Index store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A request body could not be encoded
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The store answered with a body we could not interpret
    #[error("Unexpected response: {0}")]
    Response(String),
}

impl From<url::ParseError> for IndexError {
    fn from(err: url::ParseError) -> Self {
        IndexError::InvalidUrl(err.to_string())
    }
}
