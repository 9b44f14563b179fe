//! Translates MPD's `idle` notifications into hub events.

use event_hub::{EventHub, Subsystem, Topic};
use tokio::task::JoinHandle;

use crate::error::SupervisorError;
use crate::supervisor::Supervisor;
use crate::upstream::{IdleSource, Upstream};

/// Long-polls `idle` and publishes one `Topic::Subsystem` event per changed
/// subsystem.
///
/// `idle` blocks its connection until something changes, so the watcher
/// needs a supervisor of its own; sharing the command connection would stall
/// every other query.
pub struct EventWatcher<U: Upstream> {
    supervisor: Supervisor<U>,
    hub: EventHub,
}

impl<U> EventWatcher<U>
where
    U: Upstream,
    U::Connection: IdleSource,
{
    /// Events are published on `hub`, not on the supervisor's own hub.
    pub fn new(supervisor: Supervisor<U>, hub: EventHub) -> Self {
        Self { supervisor, hub }
    }

    /// Wait for one batch of changes and publish it. Returns how many events
    /// were published.
    pub async fn poll_once(&self) -> Result<usize, SupervisorError> {
        let names = self
            .supervisor
            .call(|connection| async move { connection.idle().await })
            .await?;

        let mut published = 0;
        for name in names {
            match name.parse::<Subsystem>() {
                Ok(subsystem) => {
                    tracing::debug!("MPD subsystem changed: {}", subsystem);
                    self.hub.publish(Topic::Subsystem(subsystem));
                    published += 1;
                }
                Err(_) => tracing::warn!("Ignoring unknown MPD subsystem {:?}", name),
            }
        }
        Ok(published)
    }

    /// Poll forever. A failed cycle pauses for the reconnect delay before the
    /// next one.
    pub async fn run(self) {
        tracing::info!("Event watcher started on {}", self.supervisor.name());
        loop {
            if let Err(e) = self.poll_once().await {
                tracing::warn!("Event watcher cycle failed: {}", e);
                tokio::time::sleep(self.supervisor.config().reconnect_delay).await;
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
