//! Error types for mpdex-core.
//!
//! Upstream I/O failures are transient and absorbed by the supervisors; what
//! reaches callers is either "the retry after recovery failed too"
//! ([`SupervisorError::RetryFailed`]) or a computation error on malformed
//! upstream data ([`DeltaError`]), which is never retried.

use event_hub::HubError;
use index_client::IndexError;
use mpd_client::MpdError;

/// A failure talking to an upstream. Always considered transient.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("MPD error: {0}")]
    Mpd(#[from] MpdError),

    #[error("Index store error: {0}")]
    Index(#[from] IndexError),

    /// Any other reason the upstream cannot be used right now
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by supervised calls.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The operation failed, the connection was recovered, and the single
    /// retry failed as well
    #[error("{upstream}: operation failed again after recovery: {source}")]
    RetryFailed {
        upstream: String,
        #[source]
        source: UpstreamError,
    },

    /// The supervisor's signalling subscription was closed
    #[error("Supervisor signalling failed: {0}")]
    Hub(#[from] HubError),
}

/// Malformed numeric data in a status or position record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("Missing field in upstream record: {0}")]
    MissingField(&'static str),

    #[error("Invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Errors from one playlist tracking cycle.
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Playlist delta computation failed: {0}")]
    Delta(#[from] DeltaError),
}

/// Errors from enqueueing writes.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The batcher task is gone
    #[error("Bulk batcher is no longer running")]
    Closed,

    #[error("Failed to serialize document {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from applying one library change.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Invalid configuration provided.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid supervisor configuration: {0}")]
    Supervisor(String),

    #[error("Invalid batcher configuration: {0}")]
    Batcher(String),
}
