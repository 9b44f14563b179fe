//! Thin async client for an Elasticsearch-compatible index store
//!
//! One [`IndexClient`] is bound to one index. It exposes the calls mpdex
//! relies on: liveness, get-or-create of the index, NDJSON bulk writes, and
//! document lookup and search for route handlers. There is no retry logic
//! here; callers are expected to run these calls under a supervisor.

mod bulk;
mod client;
mod error;

pub use bulk::{BulkFailure, BulkOperation, BulkSummary};
pub use client::{ClusterInfo, IndexClient, SearchHit, SearchPage};
pub use error::IndexError;
