//! Configuration types for mpdex-core
//!
//! These structures control reconnect cadence for every supervised upstream
//! and the flush cadence of the bulk batcher.

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for a [`Supervisor`](crate::Supervisor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay before the first reconnect attempt; doubles on each failure
    /// Default: 1 second
    pub reconnect_delay: Duration,

    /// Upper bound for the reconnect delay
    /// Default: 30 seconds
    pub max_reconnect_delay: Duration,

    /// Delay between liveness probes on a freshly opened connection
    /// Default: 100 milliseconds
    pub probe_delay: Duration,

    /// Probes attempted before the connection is dropped and reopened
    /// Default: 20
    pub probe_attempts: u32,

    /// Interval of passive health checks while ready; `None` disables them
    /// Default: 10 seconds
    pub health_check_interval: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            probe_delay: Duration::from_millis(100),
            probe_attempts: 20,
            health_check_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a connection that spends its life in a blocking
    /// long-poll, where a health ping would have to wait for the poll.
    pub fn event_listener() -> Self {
        Self {
            health_check_interval: None,
            ..Default::default()
        }
    }

    /// Millisecond timings, for tests and local tooling
    pub fn fast() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_delay: Duration::from_millis(40),
            probe_delay: Duration::from_millis(2),
            probe_attempts: 5,
            health_check_interval: Some(Duration::from_millis(50)),
        }
    }

    /// Reconnect delay after `failures` consecutive failed attempts
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2_u32.pow(failures.min(6));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::Supervisor(
                "Reconnect delay must be greater than 0".to_string(),
            ));
        }

        if self.reconnect_delay > self.max_reconnect_delay {
            return Err(ConfigError::Supervisor(
                "Invalid reconnect delay: base must not exceed max".to_string(),
            ));
        }

        if self.probe_delay.is_zero() {
            return Err(ConfigError::Supervisor(
                "Probe delay must be greater than 0".to_string(),
            ));
        }

        if self.probe_attempts == 0 {
            return Err(ConfigError::Supervisor(
                "Probe attempts must be greater than 0".to_string(),
            ));
        }

        if self.health_check_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(ConfigError::Supervisor(
                "Health check interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_delay = base;
        self.max_reconnect_delay = max;
        self
    }

    pub fn with_probe(mut self, delay: Duration, attempts: u32) -> Self {
        self.probe_delay = delay;
        self.probe_attempts = attempts;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.health_check_interval = interval;
        self
    }
}

/// Configuration for a [`BulkBatcher`](crate::BulkBatcher)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Flush at least this often, even without an `index_update` signal
    /// Default: 2 seconds
    pub flush_interval: Duration,

    /// Pause after a signal so that a burst of writes lands in one flush
    /// Default: 250 milliseconds
    pub coalesce_delay: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(2),
            coalesce_delay: Duration::from_millis(250),
        }
    }
}

impl BatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fast() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            coalesce_delay: Duration::from_millis(5),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Batcher(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.coalesce_delay >= self.flush_interval {
            return Err(ConfigError::Batcher(
                "Coalesce delay must be shorter than the flush interval".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_coalesce_delay(mut self, delay: Duration) -> Self {
        self.coalesce_delay = delay;
        self
    }
}
