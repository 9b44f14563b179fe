//! Upstream services and the capabilities their connections provide.
//!
//! A [`Supervisor`](crate::Supervisor) only needs [`Upstream`]: how to open a
//! connection and how to probe it. The components that use a connection ask
//! for narrower capability traits, which lets tests substitute in-memory
//! fakes for MPD and the index store.

use std::sync::Arc;

use async_trait::async_trait;
use index_client::{BulkOperation, BulkSummary, IndexClient};
use mpd_client::{Attrs, MpdAddress, MpdConnection};
use serde_json::Value;

use crate::error::UpstreamError;

/// A service that can be connected to and probed for liveness.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Name used in logs and health reports.
    fn name(&self) -> &str;

    /// Open a raw connection.
    async fn connect(&self) -> Result<Self::Connection, UpstreamError>;

    /// Cheap no-op round trip on an open connection.
    async fn ping(&self, connection: &Self::Connection) -> Result<(), UpstreamError>;
}

/// Queries the playlist tracker runs.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn status(&self) -> Result<Attrs, UpstreamError>;

    /// Position records changed since `version`, each carrying `cpos`.
    async fn changed_positions(&self, version: u32) -> Result<Vec<Attrs>, UpstreamError>;
}

/// The native change-notification long-poll.
#[async_trait]
pub trait IdleSource: Send + Sync {
    async fn idle(&self) -> Result<Vec<String>, UpstreamError>;
}

/// Song metadata lookup by path.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn song_info(&self, path: &str) -> Result<Option<Attrs>, UpstreamError>;
}

/// Where the bulk batcher writes.
#[async_trait]
pub trait BulkTarget: Send + Sync {
    /// Make sure the target index exists, creating it if needed.
    async fn ensure_index(&self) -> Result<(), UpstreamError>;

    async fn bulk_write(&self, operations: &[BulkOperation]) -> Result<BulkSummary, UpstreamError>;
}

/// MPD reached over TCP or a Unix socket.
#[derive(Debug, Clone)]
pub struct MpdUpstream {
    name: String,
    address: MpdAddress,
}

impl MpdUpstream {
    pub fn new(name: impl Into<String>, address: MpdAddress) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    pub fn address(&self) -> &MpdAddress {
        &self.address
    }
}

#[async_trait]
impl Upstream for MpdUpstream {
    type Connection = MpdConnection;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<MpdConnection, UpstreamError> {
        Ok(MpdConnection::connect(&self.address).await?)
    }

    async fn ping(&self, connection: &MpdConnection) -> Result<(), UpstreamError> {
        Ok(connection.ping().await?)
    }
}

#[async_trait]
impl PlaylistSource for MpdConnection {
    async fn status(&self) -> Result<Attrs, UpstreamError> {
        Ok(MpdConnection::status(self).await?)
    }

    async fn changed_positions(&self, version: u32) -> Result<Vec<Attrs>, UpstreamError> {
        Ok(MpdConnection::changed_positions(self, version).await?)
    }
}

#[async_trait]
impl IdleSource for MpdConnection {
    async fn idle(&self) -> Result<Vec<String>, UpstreamError> {
        Ok(MpdConnection::idle(self).await?)
    }
}

#[async_trait]
impl MetadataSource for MpdConnection {
    async fn song_info(&self, path: &str) -> Result<Option<Attrs>, UpstreamError> {
        Ok(self.list_info(path).await?)
    }
}

/// An index on an Elasticsearch-compatible store, with the schema to create
/// it with.
#[derive(Debug, Clone)]
pub struct IndexUpstream {
    name: String,
    base_url: String,
    index: String,
    schema: Arc<Value>,
}

impl IndexUpstream {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        index: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            index: index.into(),
            schema: Arc::new(schema),
        }
    }
}

/// A live index-store client plus the schema for get-or-create.
#[derive(Debug, Clone)]
pub struct IndexConnection {
    client: IndexClient,
    schema: Arc<Value>,
}

impl IndexConnection {
    pub fn new(client: IndexClient, schema: Arc<Value>) -> Self {
        Self { client, schema }
    }

    /// The underlying client, for reads such as search and get.
    pub fn client(&self) -> &IndexClient {
        &self.client
    }
}

#[async_trait]
impl Upstream for IndexUpstream {
    type Connection = IndexConnection;

    fn name(&self) -> &str {
        &self.name
    }

    /// Builds the client and pings once, so an unreachable store counts as a
    /// failed connect rather than a failed probe.
    async fn connect(&self) -> Result<IndexConnection, UpstreamError> {
        let client = IndexClient::new(&self.base_url, self.index.clone())?;
        let info = client.ping().await?;
        tracing::info!(
            "Connected to index store {} (cluster {}, version {})",
            self.base_url,
            info.cluster_name,
            info.version
        );
        Ok(IndexConnection::new(client, self.schema.clone()))
    }

    async fn ping(&self, connection: &IndexConnection) -> Result<(), UpstreamError> {
        connection.client.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl BulkTarget for IndexConnection {
    async fn ensure_index(&self) -> Result<(), UpstreamError> {
        if !self.client.index_exists().await? {
            tracing::warn!("Index {} is missing, creating it", self.client.index());
            self.client.create_index(&self.schema).await?;
        }
        Ok(())
    }

    async fn bulk_write(&self, operations: &[BulkOperation]) -> Result<BulkSummary, UpstreamError> {
        Ok(self.client.bulk(operations).await?)
    }
}
