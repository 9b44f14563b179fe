//! Bulk write batching for the index store.
//!
//! Producers hold a [`BatcherHandle`] and enqueue document upserts and
//! deletes. The [`BulkBatcher`] task owns the pending batch and sends it as
//! one bulk request when it is signalled via `index_update` or when the
//! flush interval elapses, whichever comes first.
//!
//! A failed flush leaves the batch exactly as it was, so nothing enqueued is
//! lost; a later flush resends it, and because every operation is keyed by
//! document id a resend is harmless.

use event_hub::{EventHub, Subscription, Topic};
use index_client::BulkOperation;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BatcherConfig;
use crate::error::{BatchError, SupervisorError};
use crate::supervisor::Supervisor;
use crate::upstream::{BulkTarget, Upstream};

/// Operations accumulated since the last successful flush, in enqueue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBatch {
    operations: Vec<BulkOperation>,
}

impl PendingBatch {
    pub fn push(&mut self, operation: BulkOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn clear(&mut self) {
        self.operations.clear();
    }
}

/// Producer side of the batcher. Cheap to clone.
#[derive(Clone)]
pub struct BatcherHandle {
    operations: mpsc::UnboundedSender<BulkOperation>,
    hub: EventHub,
}

impl BatcherHandle {
    /// Queue `document` to be stored under `id`, replacing any previous
    /// version.
    pub fn enqueue_upsert<T: Serialize + ?Sized>(
        &self,
        id: impl Into<String>,
        document: &T,
    ) -> Result<(), BatchError> {
        let id = id.into();
        let document = serde_json::to_value(document).map_err(|source| BatchError::Serialize {
            id: id.clone(),
            source,
        })?;
        self.enqueue(BulkOperation::Upsert { id, document })
    }

    /// Queue removal of the document stored under `id`.
    pub fn enqueue_delete(&self, id: impl Into<String>) -> Result<(), BatchError> {
        self.enqueue(BulkOperation::Delete { id: id.into() })
    }

    /// Queue `operation` and signal `index_update`. Does no I/O.
    pub fn enqueue(&self, operation: BulkOperation) -> Result<(), BatchError> {
        tracing::trace!("Enqueued bulk operation for {}", operation.id());
        self.operations
            .send(operation)
            .map_err(|_| BatchError::Closed)?;
        self.hub.publish(Topic::IndexUpdate);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushOutcome {
    /// The batch was sent and cleared.
    Flushed(usize),
    /// The bulk request failed on the connection of this generation; the
    /// batch is untouched.
    Failed(u64),
    /// No connection yet; the batch is untouched.
    NotReady,
    /// The pre-flush guard failed on the connection of this generation.
    GuardFailed(u64),
}

/// Owns the pending batch and flushes it to the supervised index store.
pub struct BulkBatcher<U: Upstream> {
    supervisor: Supervisor<U>,
    config: BatcherConfig,
    incoming: mpsc::UnboundedReceiver<BulkOperation>,
    trigger: Subscription,
    pending: PendingBatch,
    producers_gone: bool,
}

impl<U> BulkBatcher<U>
where
    U: Upstream,
    U::Connection: BulkTarget,
{
    /// Create the batcher and its handle. `index_update` is signalled on the
    /// supervisor's hub.
    pub fn new(supervisor: Supervisor<U>, config: BatcherConfig) -> (Self, BatcherHandle) {
        let (sender, incoming) = mpsc::unbounded_channel();
        let hub = supervisor.hub().clone();
        let trigger = hub.subscribe_latest([Topic::IndexUpdate]);

        let batcher = Self {
            supervisor,
            config,
            incoming,
            trigger,
            pending: PendingBatch::default(),
            producers_gone: false,
        };
        let handle = BatcherHandle {
            operations: sender,
            hub,
        };
        (batcher, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub fn pending(&self) -> &PendingBatch {
        &self.pending
    }

    /// Flush loop. Returns once every handle is dropped and the last batch
    /// has been written.
    pub async fn run(mut self) {
        tracing::info!("Bulk batcher started for {}", self.supervisor.name());
        let mut retry_now = false;

        loop {
            if !retry_now {
                self.wait_for_trigger().await;
            }
            retry_now = false;

            self.absorb();
            if self.pending.is_empty() {
                if self.producers_gone {
                    break;
                }
                continue;
            }

            match self.flush().await {
                FlushOutcome::Flushed(_) => {}
                FlushOutcome::NotReady => {
                    self.await_connection(self.supervisor.wait_until_ready()).await;
                    retry_now = true;
                }
                FlushOutcome::Failed(generation) | FlushOutcome::GuardFailed(generation) => {
                    self.await_connection(self.supervisor.wait_for_recovery(generation)).await;
                    retry_now = true;
                }
            }
        }

        tracing::info!("Bulk batcher stopped: all producers dropped");
    }

    async fn await_connection<F, C>(&self, ready: F)
    where
        F: std::future::Future<Output = Result<C, SupervisorError>>,
    {
        if let Err(e) = ready.await {
            tracing::error!("Bulk batcher lost its readiness signal: {}", e);
            tokio::time::sleep(self.config.flush_interval).await;
        }
    }

    async fn wait_for_trigger(&mut self) {
        let signalled = tokio::select! {
            result = self.trigger.wait_for(Topic::IndexUpdate) => {
                if result.is_err() {
                    self.trigger = self.supervisor.hub().subscribe_latest([Topic::IndexUpdate]);
                }
                true
            }
            _ = tokio::time::sleep(self.config.flush_interval) => false,
        };

        if signalled && !self.config.coalesce_delay.is_zero() {
            tokio::time::sleep(self.config.coalesce_delay).await;
        }
    }

    /// Move everything queued on the channel into the pending batch.
    fn absorb(&mut self) -> usize {
        let mut absorbed = 0;
        loop {
            match self.incoming.try_recv() {
                Ok(operation) => {
                    self.pending.push(operation);
                    absorbed += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.producers_gone = true;
                    break;
                }
            }
        }
        absorbed
    }

    /// Guard, then send the whole pending batch in one request.
    async fn flush(&mut self) -> FlushOutcome {
        let Some(connected) = self.supervisor.current() else {
            tracing::debug!("Index store not ready, holding {} operations", self.pending.len());
            return FlushOutcome::NotReady;
        };

        if let Err(e) = connected.connection.ensure_index().await {
            tracing::warn!("Index guard failed, holding {} operations: {}", self.pending.len(), e);
            self.supervisor.hub().publish(Topic::IndexDown);
            self.supervisor.report_failure(connected.generation);
            return FlushOutcome::GuardFailed(connected.generation);
        }

        let count = self.pending.len();
        match connected.connection.bulk_write(self.pending.operations()).await {
            Ok(summary) => {
                for failure in &summary.failures {
                    tracing::warn!(
                        "Index store rejected {} ({}): {}",
                        failure.id,
                        failure.status,
                        failure.reason
                    );
                }
                tracing::debug!("Flushed {} operations in {}ms", count, summary.took_ms);
                self.pending.clear();
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                tracing::error!("Bulk flush of {} operations failed, will retry: {}", count, e);
                self.supervisor.report_failure(connected.generation);
                FlushOutcome::Failed(connected.generation)
            }
        }
    }
}
