//! # mpdex-core
//!
//! The coordination core of mpdex, a bridge that mirrors an MPD music
//! library into an Elasticsearch-compatible index and reports playlist
//! changes.
//!
//! Each upstream runs under its own [`Supervisor`], which reconnects forever
//! and announces readiness on an [`EventHub`](event_hub::EventHub). The other
//! components never manage connections themselves:
//!
//! - [`BulkBatcher`] coalesces index writes and flushes them in one request.
//! - [`PlaylistTracker`] turns `playlist` notifications into
//!   [`PlaylistDelta`]s via [`compute_delta`].
//! - [`EventWatcher`] republishes MPD's `idle` notifications on the hub.
//! - [`LibraryIndexer`] turns database log lines into index writes.

mod batcher;
mod config;
mod error;
mod library;
pub mod logging;
mod playlist;
mod supervisor;
mod upstream;
mod watcher;

#[cfg(test)]
mod testing;

pub use batcher::{BatcherHandle, BulkBatcher, PendingBatch};
pub use config::{BatcherConfig, SupervisorConfig};
pub use error::{
    BatchError, ConfigError, DeltaError, LibraryError, PlaylistError, SupervisorError,
    UpstreamError,
};
pub use library::{song_mapping, ChangeKind, LibraryChange, LibraryIndexer, Song};
pub use playlist::{
    compute_delta, DeltaKind, PlaylistDelta, PlaylistSnapshot, PlaylistTracker, Truncation,
};
pub use supervisor::{Connected, ConnectionState, Readiness, Supervisor};
pub use upstream::{
    BulkTarget, IdleSource, IndexConnection, IndexUpstream, MetadataSource, MpdUpstream,
    PlaylistSource, Upstream,
};
pub use watcher::EventWatcher;
