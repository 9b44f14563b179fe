//! Error types for the event hub.

/// Errors surfaced by the event hub and its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The subscription was closed, either explicitly or because the hub
    /// dropped it after its queue overflowed.
    #[error("Subscription closed")]
    SubscriptionClosed,

    /// A name outside the closed topic vocabulary.
    #[error("Unknown event topic: {0}")]
    UnknownTopic(String),
}

/// Convenience type alias for Results using HubError.
pub type Result<T> = std::result::Result<T, HubError>;
