//! Connection supervision for one upstream.
//!
//! A [`Supervisor`] owns the only live connection to its upstream and runs a
//! single background task through the cycle
//!
//! ```text
//! Down -> Connecting -> HealthChecking -> Ready
//!   ^          |              |             |
//!   +----------+--------------+-------------+   (any failure)
//! ```
//!
//! Readiness is announced on the supervisor's [`EventHub`]: `api_ready` once
//! per recovered connection, `api_down` whenever a failure is detected. The
//! payload of both is the connection's generation number, which increases by
//! one on every recovery. A failure report naming an older generation is
//! ignored, so a late report can never tear down a fresh connection.
//!
//! Consumers never hold the connection across calls. They go through
//! [`Supervisor::call`], which borrows the current connection for one
//! operation and, if it fails, reports the failure, waits for the next
//! generation and retries exactly once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use event_hub::{Event, EventHub, Overflow, Subscription, Topic, DEFAULT_CAPACITY};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, UpstreamError};
use crate::upstream::Upstream;

/// Lifecycle of a supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Down,
    Connecting,
    HealthChecking,
    Ready,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Down => "down",
            ConnectionState::Connecting => "connecting",
            ConnectionState::HealthChecking => "health_checking",
            ConnectionState::Ready => "ready",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ready connection together with its generation.
pub struct Connected<C> {
    pub generation: u64,
    pub connection: Arc<C>,
}

impl<C> Clone for Connected<C> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            connection: self.connection.clone(),
        }
    }
}

impl<C> fmt::Debug for Connected<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Readiness as seen by health reporting.
pub trait Readiness: Send + Sync {
    fn upstream(&self) -> &str;

    fn state(&self) -> ConnectionState;

    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }
}

struct Shared<U: Upstream> {
    upstream: U,
    hub: EventHub,
    config: SupervisorConfig,
    state: watch::Sender<ConnectionState>,
    current: watch::Sender<Option<Connected<U::Connection>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps one upstream connected and gates every operation on it.
///
/// Cloning is cheap; all clones drive the same background task.
///
/// # Example
///
/// ```no_run
/// use event_hub::EventHub;
/// use mpd_client::MpdAddress;
/// use mpdex_core::{MpdUpstream, Supervisor, SupervisorConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let upstream = MpdUpstream::new("mpd", "localhost:6600".parse::<MpdAddress>()?);
/// let mpd = Supervisor::start(upstream, EventHub::new(), SupervisorConfig::default());
///
/// let status = mpd.call(|connection| async move { connection.status().await.map_err(Into::into) }).await?;
/// println!("playlist version {:?}", status.get("playlist"));
/// # Ok(())
/// # }
/// ```
pub struct Supervisor<U: Upstream> {
    shared: Arc<Shared<U>>,
}

impl<U: Upstream> Clone for Supervisor<U> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<U: Upstream> Supervisor<U> {
    /// Create the supervisor and spawn its background task.
    ///
    /// `hub` should be dedicated to this upstream: `api_ready` and `api_down`
    /// published on it are taken to refer to this connection.
    pub fn start(upstream: U, hub: EventHub, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Down);
        let (current, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            upstream,
            hub,
            config,
            state,
            current,
            task: Mutex::new(None),
        });

        // Subscribe before spawning so that no report is missed.
        let reports = subscribe_reports(&shared.hub);
        let handle = tokio::spawn(shared.clone().run(reports));
        *shared.task.lock() = Some(handle);

        Self { shared }
    }

    pub fn name(&self) -> &str {
        self.shared.upstream.name()
    }

    /// The hub this supervisor signals on.
    pub fn hub(&self) -> &EventHub {
        &self.shared.hub
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Best-effort snapshot of the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Best-effort snapshot of the live connection.
    pub fn current(&self) -> Option<Connected<U::Connection>> {
        self.shared.current.borrow().clone()
    }

    /// Wait until a connection is ready. Blocks for as long as the outage
    /// lasts.
    pub async fn wait_until_ready(&self) -> Result<Connected<U::Connection>, SupervisorError> {
        let mut ready = self.shared.hub.subscribe_latest([Topic::ApiReady]);
        self.connected_after(&mut ready, 0).await
    }

    /// Wait for a connection newer than `generation`, typically one that was
    /// just reported as failed.
    pub async fn wait_for_recovery(
        &self,
        generation: u64,
    ) -> Result<Connected<U::Connection>, SupervisorError> {
        let mut ready = self.shared.hub.subscribe_latest([Topic::ApiReady]);
        self.connected_after(&mut ready, generation).await
    }

    /// Report that the connection of `generation` failed.
    ///
    /// Has no effect if the supervisor already moved past that generation.
    pub fn report_failure(&self, generation: u64) {
        self.shared
            .hub
            .publish_event(Event::with_payload(Topic::ApiDown, generation));
    }

    /// Report that whatever connection is live has failed.
    pub fn report_down(&self) {
        self.shared.hub.publish(Topic::ApiDown);
    }

    /// Run `operation` against the live connection, recovering once on
    /// failure.
    ///
    /// Waits for readiness first if needed. If the operation fails, the
    /// failure is reported, the call waits for a newer connection and runs
    /// `operation` one more time; a second failure is returned as
    /// [`SupervisorError::RetryFailed`].
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, SupervisorError>
    where
        F: Fn(Arc<U::Connection>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        // Subscribe before inspecting the connection; a recovery that lands
        // in between is then still seen.
        let mut ready = self.shared.hub.subscribe_latest([Topic::ApiReady]);

        let first = self.connected_after(&mut ready, 0).await?;
        match operation(first.connection.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    "{}: operation failed on connection {}, waiting for recovery: {}",
                    self.name(),
                    first.generation,
                    e
                );
                self.report_failure(first.generation);
            }
        }

        let second = self.connected_after(&mut ready, first.generation).await?;
        operation(second.connection).await.map_err(|source| {
            tracing::error!("{}: operation failed again after recovery: {}", self.name(), source);
            SupervisorError::RetryFailed {
                upstream: self.name().to_string(),
                source,
            }
        })
    }

    /// Abort the background task. The connection is dropped and the state
    /// stays wherever it was.
    pub fn shutdown(&self) {
        if let Some(handle) = self.shared.task.lock().take() {
            handle.abort();
            tracing::debug!("{}: supervisor stopped", self.name());
        }
    }

    async fn connected_after(
        &self,
        ready: &mut Subscription,
        generation: u64,
    ) -> Result<Connected<U::Connection>, SupervisorError> {
        loop {
            if let Some(connected) = self.current() {
                if connected.generation > generation {
                    return Ok(connected);
                }
            }
            ready.wait_for(Topic::ApiReady).await?;
        }
    }
}

impl<U: Upstream> Readiness for Supervisor<U> {
    fn upstream(&self) -> &str {
        self.name()
    }

    fn state(&self) -> ConnectionState {
        Supervisor::state(self)
    }
}

impl<U: Upstream> fmt::Debug for Supervisor<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("upstream", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Failure reports are queued, not collapsed: a stale report arriving after
/// a live one must not hide it.
fn subscribe_reports(hub: &EventHub) -> Subscription {
    hub.subscribe_with([Topic::ApiDown], DEFAULT_CAPACITY, Overflow::Overwrite)
}

impl<U: Upstream> Shared<U> {
    fn name(&self) -> &str {
        self.upstream.name()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("{}: {} -> {}", self.name(), previous, state);
        }
    }

    async fn run(self: Arc<Self>, mut reports: Subscription) {
        let mut generation = 0u64;

        loop {
            let connection = Arc::new(self.recover().await);
            generation += 1;

            // Reports raised while recovering refer to dead connections. Drop
            // them before the new connection is visible to callers.
            reports.drain();
            self.current.send_replace(Some(Connected {
                generation,
                connection: connection.clone(),
            }));
            self.set_state(ConnectionState::Ready);
            self.hub
                .publish_event(Event::with_payload(Topic::ApiReady, generation));
            tracing::info!("{}: connection ready (generation {})", self.name(), generation);

            self.monitor(&connection, generation, &mut reports).await;

            self.current.send_replace(None);
            self.set_state(ConnectionState::Down);
            drop(connection);
        }
    }

    /// Connect and probe until a healthy connection is obtained. Never gives
    /// up.
    async fn recover(&self) -> U::Connection {
        let mut failures = 0u32;

        loop {
            self.set_state(ConnectionState::Connecting);
            match self.upstream.connect().await {
                Ok(connection) => {
                    self.set_state(ConnectionState::HealthChecking);
                    if self.probe(&connection).await {
                        return connection;
                    }
                    tracing::warn!(
                        "{}: connection opened but failed {} liveness probes",
                        self.name(),
                        self.config.probe_attempts
                    );
                }
                Err(e) => {
                    tracing::warn!("{}: connect failed: {}", self.name(), e);
                }
            }

            self.set_state(ConnectionState::Down);
            let delay = self.config.backoff(failures);
            failures = failures.saturating_add(1);
            tracing::debug!("{}: reconnecting in {:?}", self.name(), delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn probe(&self, connection: &U::Connection) -> bool {
        for attempt in 1..=self.config.probe_attempts {
            match self.upstream.ping(connection).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::debug!(
                        "{}: probe {}/{} failed: {}",
                        self.name(),
                        attempt,
                        self.config.probe_attempts,
                        e
                    );
                }
            }
            if attempt < self.config.probe_attempts {
                tokio::time::sleep(self.config.probe_delay).await;
            }
        }
        false
    }

    /// Return once the connection of `generation` is considered dead.
    async fn monitor(&self, connection: &U::Connection, generation: u64, reports: &mut Subscription) {
        loop {
            let report = match self.config.health_check_interval {
                Some(interval) => {
                    tokio::select! {
                        report = reports.recv() => report,
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = self.upstream.ping(connection).await {
                                tracing::warn!("{}: health check failed: {}", self.name(), e);
                                self.hub.publish_event(Event::with_payload(Topic::ApiDown, generation));
                                reports.drain();
                                return;
                            }
                            continue;
                        }
                    }
                }
                None => reports.recv().await,
            };

            match report {
                Some(event) => {
                    // Look at everything queued; one live report is enough.
                    let mut down = self.condemns(&event, generation);
                    while let Ok(queued) = reports.try_recv() {
                        down |= self.condemns(&queued, generation);
                    }
                    if down {
                        tracing::warn!("{}: connection {} reported down", self.name(), generation);
                        return;
                    }
                }
                None => {
                    // The report subscription only closes if it was removed
                    // from the hub; register again.
                    *reports = subscribe_reports(&self.hub);
                }
            }
        }
    }

    /// Whether `report` applies to the connection of `generation`. Reports
    /// without a generation apply to whatever connection is live.
    fn condemns(&self, report: &Event, generation: u64) -> bool {
        match report.payload_u64() {
            Some(reported) if reported != generation => {
                tracing::debug!(
                    "{}: ignoring failure report for old connection {}",
                    self.name(),
                    reported
                );
                false
            }
            _ => true,
        }
    }
}
