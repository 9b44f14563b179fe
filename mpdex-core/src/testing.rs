//! In-memory stand-ins for MPD and the index store, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use index_client::{BulkOperation, BulkSummary};
use mpd_client::Attrs;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::upstream::{BulkTarget, IdleSource, MetadataSource, PlaylistSource, Upstream};

#[derive(Default)]
struct FakeState {
    connect_failures: AtomicUsize,
    ping_failures: AtomicUsize,
    connect_attempts: AtomicUsize,
    established: AtomicU64,
    pings: AtomicUsize,

    index_exists: AtomicBool,
    index_creations: AtomicUsize,
    guard_failures: AtomicUsize,
    bulk_failures: AtomicUsize,
    documents: Mutex<HashMap<String, Value>>,
    bulk_calls: Mutex<Vec<Vec<BulkOperation>>>,

    playlist: Mutex<(u32, u32)>,
    changes: Mutex<Vec<Attrs>>,
    queried_versions: Mutex<Vec<u32>>,

    idle_results: Mutex<VecDeque<Result<Vec<String>, String>>>,
    songs: Mutex<HashMap<String, Attrs>>,
}

/// An upstream whose connections all share one scripted state.
#[derive(Clone)]
pub(crate) struct FakeUpstream {
    name: String,
    state: Arc<FakeState>,
}

impl FakeUpstream {
    pub(crate) fn new(name: &str) -> Self {
        let state = FakeState::default();
        state.index_exists.store(true, Ordering::SeqCst);
        Self {
            name: name.to_string(),
            state: Arc::new(state),
        }
    }

    pub(crate) fn failing_connects(self, count: usize) -> Self {
        self.state.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_pings(self, count: usize) -> Self {
        self.fail_next_pings(count);
        self
    }

    pub(crate) fn fail_next_pings(&self, count: usize) {
        self.state.ping_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    // Index store

    pub(crate) fn without_index(self) -> Self {
        self.state.index_exists.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn fail_next_guards(&self, count: usize) {
        self.state.guard_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_bulks(&self, count: usize) {
        self.state.bulk_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn index_creations(&self) -> usize {
        self.state.index_creations.load(Ordering::SeqCst)
    }

    pub(crate) fn documents(&self) -> HashMap<String, Value> {
        self.state.documents.lock().clone()
    }

    pub(crate) fn bulk_calls(&self) -> Vec<Vec<BulkOperation>> {
        self.state.bulk_calls.lock().clone()
    }

    // MPD

    pub(crate) fn set_playlist(&self, version: u32, length: u32, changed: &[&str]) {
        *self.state.playlist.lock() = (version, length);
        *self.state.changes.lock() = changed
            .iter()
            .enumerate()
            .map(|(id, cpos)| [("cpos", *cpos), ("Id", &id.to_string())].into_iter().collect())
            .collect();
    }

    pub(crate) fn queried_versions(&self) -> Vec<u32> {
        self.state.queried_versions.lock().clone()
    }

    pub(crate) fn push_idle(&self, result: Result<Vec<&str>, &str>) {
        let result = result
            .map(|names| names.into_iter().map(String::from).collect())
            .map_err(String::from);
        self.state.idle_results.lock().push_back(result);
    }

    pub(crate) fn add_song(&self, path: &str, tags: &[(&str, &str)]) {
        let mut attrs: Attrs = [("file", path)].into_iter().collect();
        for (key, value) in tags {
            attrs.push(*key, *value);
        }
        self.state.songs.lock().insert(path.to_string(), attrs);
    }
}

/// Decrement `counter` if positive; true means "this call should fail".
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub(crate) struct FakeConnection {
    generation: u64,
    state: Arc<FakeState>,
}

impl FakeConnection {
    /// Which successful connect produced this connection, starting at 1.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    type Connection = FakeConnection;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<FakeConnection, UpstreamError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.connect_failures) {
            return Err(UpstreamError::Unavailable("connection refused".to_string()));
        }
        let generation = self.state.established.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeConnection {
            generation,
            state: self.state.clone(),
        })
    }

    async fn ping(&self, _connection: &FakeConnection) -> Result<(), UpstreamError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.ping_failures) {
            return Err(UpstreamError::Unavailable("ping timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BulkTarget for FakeConnection {
    async fn ensure_index(&self) -> Result<(), UpstreamError> {
        if take_failure(&self.state.guard_failures) {
            return Err(UpstreamError::Unavailable("index store restarting".to_string()));
        }
        if !self.state.index_exists.swap(true, Ordering::SeqCst) {
            self.state.index_creations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn bulk_write(&self, operations: &[BulkOperation]) -> Result<BulkSummary, UpstreamError> {
        if take_failure(&self.state.bulk_failures) {
            return Err(UpstreamError::Unavailable("bulk request timed out".to_string()));
        }

        self.state.bulk_calls.lock().push(operations.to_vec());
        let mut documents = self.state.documents.lock();
        for operation in operations {
            match operation {
                BulkOperation::Upsert { id, document } => {
                    documents.insert(id.clone(), document.clone());
                }
                BulkOperation::Delete { id } => {
                    documents.remove(id);
                }
            }
        }
        Ok(BulkSummary {
            took_ms: 1,
            succeeded: operations.len(),
            failures: Vec::new(),
        })
    }
}

#[async_trait]
impl PlaylistSource for FakeConnection {
    async fn status(&self) -> Result<Attrs, UpstreamError> {
        let (version, length) = *self.state.playlist.lock();
        let mut attrs = Attrs::new();
        attrs.push("state", "play");
        attrs.push("playlist", version.to_string());
        attrs.push("playlistlength", length.to_string());
        Ok(attrs)
    }

    async fn changed_positions(&self, version: u32) -> Result<Vec<Attrs>, UpstreamError> {
        self.state.queried_versions.lock().push(version);
        Ok(self.state.changes.lock().clone())
    }
}

#[async_trait]
impl IdleSource for FakeConnection {
    async fn idle(&self) -> Result<Vec<String>, UpstreamError> {
        let next = self.state.idle_results.lock().pop_front();
        match next {
            Some(Ok(names)) => Ok(names),
            Some(Err(reason)) => Err(UpstreamError::Unavailable(reason)),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl MetadataSource for FakeConnection {
    async fn song_info(&self, path: &str) -> Result<Option<Attrs>, UpstreamError> {
        Ok(self.state.songs.lock().get(path).cloned())
    }
}
