//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mpd_client::MpdAddress;
use mpdex_core::logging::LoggingMode;
use mpdex_core::{BatcherConfig, SupervisorConfig};
use tracing::info;

/// mpdex
///
/// Mirrors an MPD music library into an Elasticsearch-compatible index and
/// publishes playlist changes as they happen.
#[derive(Parser, Debug, Clone)]
#[command(name = "mpdex")]
#[command(about = "Mirror an MPD library into Elasticsearch and track playlist changes")]
#[command(version)]
pub struct Args {
    /// MPD address: host[:port] or the path of a Unix socket
    #[arg(long, default_value = "localhost:6600")]
    pub mpd: String,

    /// Base URL of the index store
    #[arg(long, default_value = "http://localhost:9200")]
    pub es_url: String,

    /// Name of the song index
    #[arg(long, default_value = "songs")]
    pub index: String,

    /// MPD log file or named pipe to follow for library updates
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Address of the health endpoint
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Longest time a queued index write waits before being flushed
    #[arg(long, default_value = "2000")]
    pub flush_interval_ms: u64,

    /// Interval between passive liveness checks of each upstream
    #[arg(long, default_value = "10")]
    pub health_interval_secs: u64,

    /// Log output: silent, development, debug or json
    #[arg(long, default_value = "development")]
    pub log_mode: String,

    /// Log filter directive, e.g. "info" or "mpdex_core=debug"
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Apply `MPDEX_*` overrides. `lookup` reads one variable.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mpd) = lookup("MPDEX_MPD") {
            self.mpd = mpd;
        }

        if let Some(url) = lookup("MPDEX_ES_URL") {
            self.es_url = url;
        }

        if let Some(index) = lookup("MPDEX_INDEX") {
            self.index = index;
        }

        if let Some(path) = lookup("MPDEX_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }

        if let Some(listen) = lookup("MPDEX_LISTEN") {
            self.listen = listen
                .parse()
                .context("Invalid MPDEX_LISTEN environment variable")?;
        }

        if let Some(interval) = lookup("MPDEX_FLUSH_INTERVAL_MS") {
            self.flush_interval_ms = interval
                .parse()
                .context("Invalid MPDEX_FLUSH_INTERVAL_MS environment variable")?;
        }

        if let Some(interval) = lookup("MPDEX_HEALTH_INTERVAL_SECS") {
            self.health_interval_secs = interval
                .parse()
                .context("Invalid MPDEX_HEALTH_INTERVAL_SECS environment variable")?;
        }

        if let Some(mode) = lookup(mpdex_core::logging::LOG_MODE_ENV) {
            self.log_mode = mode;
        }

        if let Some(level) = lookup(mpdex_core::logging::LOG_LEVEL_ENV) {
            self.log_level = Some(level);
        }

        Ok(())
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(anyhow!("Flush interval must be positive"));
        }

        if self.health_interval_secs == 0 {
            return Err(anyhow!("Health check interval must be positive"));
        }

        if !(self.es_url.starts_with("http://") || self.es_url.starts_with("https://")) {
            return Err(anyhow!(
                "Invalid index store URL '{}': expected http:// or https://",
                self.es_url
            ));
        }

        // Elasticsearch rejects index names with upper case or path characters.
        if self.index.is_empty()
            || self.index.starts_with(['_', '-', '+'])
            || self
                .index
                .chars()
                .any(|c| c.is_ascii_uppercase() || "\\/*?\"<>| ,#:".contains(c))
        {
            return Err(anyhow!("Invalid index name '{}'", self.index));
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub mpd: MpdAddress,
    pub es_url: String,
    pub index: String,
    pub log_file: Option<PathBuf>,
    pub listen: SocketAddr,
    pub supervisor: SupervisorConfig,
    pub batcher: BatcherConfig,
    pub log_mode: LoggingMode,
    pub log_level: Option<String>,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        args.validate()?;

        let mpd = args
            .mpd
            .parse::<MpdAddress>()
            .with_context(|| format!("Invalid MPD address '{}'", args.mpd))?;
        let log_mode = args
            .log_mode
            .parse::<LoggingMode>()
            .context("Invalid log mode")?;

        let supervisor =
            SupervisorConfig::default().with_health_check_interval(Some(args.health_interval()));
        supervisor
            .validate()
            .context("Invalid supervisor settings")?;

        // Keep the coalesce window well inside short flush intervals.
        let flush_interval = args.flush_interval();
        let coalesce_delay = BatcherConfig::default().coalesce_delay.min(flush_interval / 4);
        let batcher = BatcherConfig::default()
            .with_flush_interval(flush_interval)
            .with_coalesce_delay(coalesce_delay);
        batcher.validate().context("Invalid batcher settings")?;

        Ok(Self {
            mpd,
            es_url: args.es_url,
            index: args.index,
            log_file: args.log_file,
            listen: args.listen,
            supervisor,
            batcher,
            log_mode,
            log_level: args.log_level,
        })
    }
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();
        args.apply_overrides(|key| std::env::var(key).ok())?;
        Config::try_from(args)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  MPD: {}", self.mpd);
        info!("  Index store: {} (index {})", self.es_url, self.index);
        match &self.log_file {
            Some(path) => info!("  Library log: {}", path.display()),
            None => info!("  Library log: disabled"),
        }
        info!("  Health endpoint: http://{}/healthcheck", self.listen);
        info!("  Flush interval: {:?}", self.batcher.flush_interval);
        info!(
            "  Health check interval: {:?}",
            self.supervisor.health_check_interval
        );
    }
}
