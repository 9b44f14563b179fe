//! Playlist change classification.
//!
//! MPD does not report playlist diffs. It reports a version and a length,
//! and can list the positions that changed since an older version. From
//! those, [`compute_delta`] derives the smallest range a consumer has to
//! refresh, and [`PlaylistTracker`] runs it on every `playlist` event.

use event_hub::{Event, EventHub, Subscription, Subsystem, Topic};
use mpd_client::Attrs;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{DeltaError, PlaylistError};
use crate::supervisor::Supervisor;
use crate::upstream::{PlaylistSource, Upstream};

/// Version and length of the playlist at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistSnapshot {
    pub version: u32,
    pub length: u32,
}

impl PlaylistSnapshot {
    pub fn new(version: u32, length: u32) -> Self {
        Self { version, length }
    }

    /// Read the `playlist` and `playlistlength` fields of a status response.
    pub fn from_status(status: &Attrs) -> Result<Self, DeltaError> {
        Ok(Self {
            version: parse_field(status, "playlist")?,
            length: parse_field(status, "playlistlength")?,
        })
    }
}

fn parse_field(attrs: &Attrs, field: &'static str) -> Result<u32, DeltaError> {
    let value = attrs.get(field).ok_or(DeltaError::MissingField(field))?;
    parse_number(field, value)
}

fn parse_number(field: &'static str, value: &str) -> Result<u32, DeltaError> {
    value.trim().parse().map_err(|_| DeltaError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Trailing entries dropped from the playlist alongside a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub prev_length: u32,
    pub removed_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Add,
    Remove,
    Move,
}

/// The range of playlist positions a consumer has to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaylistDelta {
    /// `count` entries were inserted starting at `start`.
    Add { start: u32, count: u32 },
    /// Positions `start..start + count` changed. When the playlist also
    /// shrank, `truncation` says how many trailing entries are gone.
    Move {
        start: u32,
        count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncation: Option<Truncation>,
    },
    /// Entries were removed from the end and nothing survived to anchor a
    /// range on; everything from `new_length` on is gone.
    Trim { new_length: u32 },
}

impl PlaylistDelta {
    pub fn kind(&self) -> DeltaKind {
        match self {
            PlaylistDelta::Add { .. } => DeltaKind::Add,
            PlaylistDelta::Move { .. } => DeltaKind::Move,
            PlaylistDelta::Trim { .. } => DeltaKind::Remove,
        }
    }

    pub fn start(&self) -> u32 {
        match *self {
            PlaylistDelta::Add { start, .. } | PlaylistDelta::Move { start, .. } => start,
            PlaylistDelta::Trim { new_length } => new_length,
        }
    }

    /// Number of affected positions, or `-1` for an open-ended trim.
    pub fn count(&self) -> i64 {
        match *self {
            PlaylistDelta::Add { count, .. } | PlaylistDelta::Move { count, .. } => i64::from(count),
            PlaylistDelta::Trim { .. } => -1,
        }
    }

    pub fn truncation(&self) -> Option<Truncation> {
        match *self {
            PlaylistDelta::Move { truncation, .. } => truncation,
            _ => None,
        }
    }
}

/// Classify the change from `prev` to `curr`.
///
/// `changes` are the records returned by a changed-positions query for
/// `prev.version`, in the order MPD sent them; each must carry `cpos`.
/// Returns `Ok(None)` when nothing reportable happened.
pub fn compute_delta(
    prev: PlaylistSnapshot,
    curr: PlaylistSnapshot,
    changes: &[Attrs],
) -> Result<Option<PlaylistDelta>, DeltaError> {
    let positions = changes
        .iter()
        .map(|record| parse_field(record, "cpos"))
        .collect::<Result<Vec<u32>, DeltaError>>()?;

    // An insert also shows up as changed positions, so it is checked first.
    if curr.length > prev.length {
        let start = positions.first().copied().unwrap_or(prev.length);
        return Ok(Some(PlaylistDelta::Add {
            start,
            count: curr.length - prev.length,
        }));
    }

    let bounds = positions
        .iter()
        .copied()
        .fold(None, |range: Option<(u32, u32)>, position| match range {
            Some((low, high)) => Some((low.min(position), high.max(position))),
            None => Some((position, position)),
        });

    match bounds {
        Some((first, last)) => {
            let truncation = (curr.length < prev.length).then(|| Truncation {
                prev_length: prev.length,
                removed_count: prev.length - curr.length,
            });
            Ok(Some(PlaylistDelta::Move {
                start: first,
                count: last - first + 1,
                truncation,
            }))
        }
        None if curr.length < prev.length => Ok(Some(PlaylistDelta::Trim {
            new_length: curr.length,
        })),
        None => Ok(None),
    }
}

/// Follows the playlist and publishes a `playlist_delta` event per change.
pub struct PlaylistTracker<U: Upstream> {
    supervisor: Supervisor<U>,
    hub: EventHub,
    snapshot: Mutex<PlaylistSnapshot>,
}

impl<U> PlaylistTracker<U>
where
    U: Upstream,
    U::Connection: PlaylistSource,
{
    /// `hub` is where deltas are published and `playlist` events arrive.
    pub fn new(supervisor: Supervisor<U>, hub: EventHub) -> Self {
        Self {
            supervisor,
            hub,
            snapshot: Mutex::new(PlaylistSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> PlaylistSnapshot {
        *self.snapshot.lock()
    }

    /// Record the current playlist state as the baseline for the next delta.
    pub async fn prime(&self) -> Result<PlaylistSnapshot, PlaylistError> {
        let snapshot = self.fetch_snapshot().await?;
        *self.snapshot.lock() = snapshot;
        tracing::info!(
            "Playlist baseline: version {}, {} entries",
            snapshot.version,
            snapshot.length
        );
        Ok(snapshot)
    }

    /// Handle one `playlist` notification.
    ///
    /// The baseline moves to the new snapshot even when the delta cannot be
    /// computed, so one malformed response is not reported again and again.
    pub async fn on_playlist_changed(&self) -> Result<Option<PlaylistDelta>, PlaylistError> {
        let curr = self.fetch_snapshot().await?;
        let prev = std::mem::replace(&mut *self.snapshot.lock(), curr);
        if prev == curr {
            return Ok(None);
        }

        let since = prev.version;
        let changes = self
            .supervisor
            .call(|connection| async move { connection.changed_positions(since).await })
            .await?;

        let delta = compute_delta(prev, curr, &changes)?;
        if let Some(delta) = delta {
            tracing::debug!("Playlist {} -> {}: {:?}", prev.version, curr.version, delta);
            match serde_json::to_value(delta) {
                Ok(payload) => {
                    self.hub
                        .publish_event(Event::with_payload(Topic::PlaylistDelta, payload));
                }
                Err(e) => tracing::error!("Failed to encode playlist delta: {}", e),
            }
        }
        Ok(delta)
    }

    /// React to `playlist` events from `subscription` until it closes.
    pub async fn run(&self, mut subscription: Subscription) {
        let topic = Topic::Subsystem(Subsystem::Playlist);
        while subscription.wait_for(topic).await.is_ok() {
            if let Err(e) = self.on_playlist_changed().await {
                tracing::warn!("Skipping playlist change: {}", e);
            }
        }
        tracing::debug!("Playlist tracker stopped");
    }

    /// Subscribe to `playlist` events and run in a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        // Subscribe now rather than inside the task, so an event published
        // before the task is polled is not lost.
        let subscription = self
            .hub
            .subscribe_latest([Topic::Subsystem(Subsystem::Playlist)]);
        tokio::spawn(async move { self.run(subscription).await })
    }

    async fn fetch_snapshot(&self) -> Result<PlaylistSnapshot, PlaylistError> {
        let status = self
            .supervisor
            .call(|connection| async move { connection.status().await })
            .await?;
        Ok(PlaylistSnapshot::from_status(&status)?)
    }
}
