//! Keeps the song index in step with MPD's database.
//!
//! MPD logs a line for every file its database update adds or removes. The
//! binary tails that log and feeds the parsed [`LibraryChange`]s to a
//! [`LibraryIndexer`], which looks up metadata for new files and queues the
//! matching index writes on the bulk batcher.

use mpd_client::Attrs;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batcher::BatcherHandle;
use crate::error::LibraryError;
use crate::supervisor::Supervisor;
use crate::upstream::{MetadataSource, Upstream};

const ADDED_MARKER: &str = "update: added ";
const REMOVED_MARKER: &str = "update: removing ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
}

/// One file added to or removed from the music database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryChange {
    pub kind: ChangeKind,
    pub path: String,
}

impl LibraryChange {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Added,
            path: path.into(),
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            path: path.into(),
        }
    }

    /// Parse one MPD log line. Lines that are not database updates give
    /// `None`.
    ///
    /// ```
    /// use mpdex_core::LibraryChange;
    ///
    /// let line = "Mar 02 21:14 : update: added Kraftwerk/Radioland.flac";
    /// assert_eq!(
    ///     LibraryChange::parse_log_line(line),
    ///     Some(LibraryChange::added("Kraftwerk/Radioland.flac"))
    /// );
    /// ```
    pub fn parse_log_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (kind, path) = if let Some((_, path)) = line.rsplit_once(ADDED_MARKER) {
            (ChangeKind::Added, path)
        } else if let Some((_, path)) = line.rsplit_once(REMOVED_MARKER) {
            (ChangeKind::Removed, path)
        } else {
            return None;
        };

        if path.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            path: path.to_string(),
        })
    }
}

/// The document stored per song, keyed by its path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Song {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

impl Song {
    /// A document with nothing but the path.
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            file: path.into(),
            ..Self::default()
        }
    }

    /// Build from an `lsinfo` record. Tag names are matched without regard
    /// to case, since taggers disagree on it.
    pub fn from_attrs(path: &str, attrs: &Attrs) -> Self {
        let tag = |name: &str| attrs.get_ignore_case(name).map(str::to_string);
        Self {
            file: path.to_string(),
            date: tag("Date"),
            duration: tag("duration").or_else(|| tag("Time")),
            composer: tag("Composer"),
            album: tag("Album"),
            track: tag("Track"),
            title: tag("Title"),
            artist: tag("Artist"),
            genre: tag("Genre"),
        }
    }
}

/// Settings and mappings for the song index.
pub fn song_mapping() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "file": { "type": "keyword" },
                "date": { "type": "date" },
                "duration": { "type": "text" },
                "composer": { "type": "text" },
                "album": { "type": "text" },
                "track": { "type": "text" },
                "title": { "type": "text" },
                "artist": { "type": "text" },
                "genre": { "type": "text" }
            }
        }
    })
}

/// Turns library changes into index writes.
pub struct LibraryIndexer<U: Upstream> {
    mpd: Supervisor<U>,
    batcher: BatcherHandle,
}

impl<U> LibraryIndexer<U>
where
    U: Upstream,
    U::Connection: MetadataSource,
{
    pub fn new(mpd: Supervisor<U>, batcher: BatcherHandle) -> Self {
        Self { mpd, batcher }
    }

    /// Queue the index write for one change.
    pub async fn apply(&self, change: &LibraryChange) -> Result<(), LibraryError> {
        match change.kind {
            ChangeKind::Added => {
                let path = change.path.clone();
                let info = self
                    .mpd
                    .call(|connection| {
                        let path = path.clone();
                        async move { connection.song_info(&path).await }
                    })
                    .await?;

                let song = match info {
                    Some(attrs) => Song::from_attrs(&change.path, &attrs),
                    None => {
                        tracing::debug!("No metadata for {}, indexing path only", change.path);
                        Song::bare(&change.path)
                    }
                };
                tracing::info!("Indexing {}", change.path);
                self.batcher.enqueue_upsert(change.path.as_str(), &song)?;
            }
            ChangeKind::Removed => {
                tracing::info!("Removing {} from index", change.path);
                self.batcher.enqueue_delete(change.path.as_str())?;
            }
        }
        Ok(())
    }

    /// Apply changes until the sender side is dropped or the batcher stops.
    pub async fn run(self, mut changes: mpsc::Receiver<LibraryChange>) {
        while let Some(change) = changes.recv().await {
            match self.apply(&change).await {
                Ok(()) => {}
                Err(LibraryError::Batch(e)) => {
                    tracing::error!("Library indexer stopping: {}", e);
                    return;
                }
                Err(e) => tracing::warn!("Skipping {}: {}", change.path, e),
            }
        }
        tracing::debug!("Library change stream ended");
    }

    pub fn spawn(self, changes: mpsc::Receiver<LibraryChange>) -> JoinHandle<()> {
        tokio::spawn(self.run(changes))
    }
}
