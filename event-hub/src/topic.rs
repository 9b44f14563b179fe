//! The closed, process-wide event vocabulary.
//!
//! Internal lifecycle names (`api_down`, `api_ready`, ...) live next to the
//! subsystem names MPD reports from `idle`, so a single filter set can mix
//! both kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// An MPD subsystem, as reported by the `idle` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subsystem {
    Database,
    Update,
    StoredPlaylist,
    Playlist,
    Player,
    Mixer,
    Output,
    Options,
    Partition,
    Sticker,
    Subscription,
    Message,
    Neighbor,
    Mount,
}

impl Subsystem {
    /// Every subsystem, in protocol documentation order.
    pub const ALL: [Subsystem; 14] = [
        Subsystem::Database,
        Subsystem::Update,
        Subsystem::StoredPlaylist,
        Subsystem::Playlist,
        Subsystem::Player,
        Subsystem::Mixer,
        Subsystem::Output,
        Subsystem::Options,
        Subsystem::Partition,
        Subsystem::Sticker,
        Subsystem::Subscription,
        Subsystem::Message,
        Subsystem::Neighbor,
        Subsystem::Mount,
    ];

    /// The name MPD uses on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Database => "database",
            Subsystem::Update => "update",
            Subsystem::StoredPlaylist => "stored_playlist",
            Subsystem::Playlist => "playlist",
            Subsystem::Player => "player",
            Subsystem::Mixer => "mixer",
            Subsystem::Output => "output",
            Subsystem::Options => "options",
            Subsystem::Partition => "partition",
            Subsystem::Sticker => "sticker",
            Subsystem::Subscription => "subscription",
            Subsystem::Message => "message",
            Subsystem::Neighbor => "neighbor",
            Subsystem::Mount => "mount",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subsystem::ALL
            .iter()
            .copied()
            .find(|subsystem| subsystem.as_str() == s)
            .ok_or_else(|| HubError::UnknownTopic(s.to_string()))
    }
}

/// The name an [`Event`](crate::Event) is published under.
///
/// Subscribers filter on topics; two topics are the same event name exactly
/// when they compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// An upstream connection was lost or an operation on it failed.
    ApiDown,
    /// An upstream connection passed its health probe and is usable.
    ApiReady,
    /// Pending index writes are waiting for a flush.
    IndexUpdate,
    /// The index store failed its pre-flush guard.
    IndexDown,
    /// A playlist change was classified; the payload carries the delta.
    PlaylistDelta,
    /// A native MPD subsystem change.
    Subsystem(Subsystem),
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ApiDown => "api_down",
            Topic::ApiReady => "api_ready",
            Topic::IndexUpdate => "index_update",
            Topic::IndexDown => "index_down",
            Topic::PlaylistDelta => "playlist_delta",
            Topic::Subsystem(subsystem) => subsystem.as_str(),
        }
    }
}

impl From<Subsystem> for Topic {
    fn from(subsystem: Subsystem) -> Self {
        Topic::Subsystem(subsystem)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_down" => Ok(Topic::ApiDown),
            "api_ready" => Ok(Topic::ApiReady),
            "index_update" => Ok(Topic::IndexUpdate),
            "index_down" => Ok(Topic::IndexDown),
            "playlist_delta" => Ok(Topic::PlaylistDelta),
            other => other.parse().map(Topic::Subsystem),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}
