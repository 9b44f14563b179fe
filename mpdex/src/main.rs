use std::sync::Arc;

use anyhow::{Context, Result};
use event_hub::{EventHub, Topic};
use mpdex_core::logging;
use mpdex_core::{
    song_mapping, BulkBatcher, EventWatcher, IndexUpstream, LibraryIndexer, MpdUpstream,
    PlaylistTracker, Readiness, Supervisor,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod config;
mod health;
mod log_tail;

use config::Config;
use health::HealthServer;
use log_tail::LogTail;

/// Library changes buffered between the log tail and the indexer.
const LIBRARY_CHANNEL_CAPACITY: usize = 256;

/// Log every playlist delta and index outage seen on the hubs.
fn spawn_monitor(events: EventHub, index_events: EventHub) -> JoinHandle<()> {
    let mut deltas = events.subscribe([Topic::PlaylistDelta]);
    let mut outages = index_events.subscribe([Topic::IndexDown]);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = deltas.recv() => match event {
                    Some(event) => match event.payload {
                        Some(delta) => info!("Playlist delta: {}", delta),
                        None => info!("Playlist changed"),
                    },
                    None => deltas = events.subscribe([Topic::PlaylistDelta]),
                },
                event = outages.recv() => match event {
                    Some(_) => warn!("Index store lost its index, writes are held until it is back"),
                    None => outages = index_events.subscribe([Topic::IndexDown]),
                },
            }
        }
    })
}

async fn run(config: Config) -> Result<()> {
    let events = EventHub::new();

    let mpd = Supervisor::start(
        MpdUpstream::new("mpd", config.mpd.clone()),
        EventHub::new(),
        config.supervisor.clone(),
    );
    // idle blocks its connection, so it gets one of its own and no pings.
    let mpd_idle = Supervisor::start(
        MpdUpstream::new("mpd-idle", config.mpd.clone()),
        EventHub::new(),
        config.supervisor.clone().with_health_check_interval(None),
    );
    let index = Supervisor::start(
        IndexUpstream::new("index", &config.es_url, &config.index, song_mapping()),
        EventHub::new(),
        config.supervisor.clone(),
    );

    let health = HealthServer::start(
        config.listen,
        vec![
            Arc::new(mpd.clone()) as Arc<dyn Readiness>,
            Arc::new(mpd_idle.clone()) as Arc<dyn Readiness>,
            Arc::new(index.clone()) as Arc<dyn Readiness>,
        ],
    )
    .await?;

    let monitor_task = spawn_monitor(events.clone(), index.hub().clone());
    let (batcher, batch_handle) = BulkBatcher::new(index.clone(), config.batcher.clone());
    let batcher_task = batcher.spawn();
    let watcher_task = EventWatcher::new(mpd_idle.clone(), events.clone()).spawn();

    info!("Waiting for MPD and the index store");
    mpd.wait_until_ready()
        .await
        .context("MPD readiness signal failed")?;
    index
        .wait_until_ready()
        .await
        .context("Index store readiness signal failed")?;

    let tracker = PlaylistTracker::new(mpd.clone(), events.clone());
    if let Err(e) = tracker.prime().await {
        warn!("Could not read the initial playlist, the first delta may be off: {}", e);
    }
    let tracker_task = tracker.spawn();

    let mut library_tasks = Vec::new();
    match config.log_file.clone() {
        Some(path) => {
            let (sender, receiver) = mpsc::channel(LIBRARY_CHANNEL_CAPACITY);
            library_tasks.push(LogTail::new(path, sender).spawn());
            library_tasks.push(LibraryIndexer::new(mpd.clone(), batch_handle).spawn(receiver));
        }
        None => {
            info!("No library log configured, index updates are disabled");
            drop(batch_handle);
        }
    }

    info!("mpdex is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down");

    for task in library_tasks {
        task.abort();
    }
    tracker_task.abort();
    watcher_task.abort();
    monitor_task.abort();
    // The batcher stops by itself once the indexer's handle is gone; give it
    // two flush intervals to write what is pending.
    if tokio::time::timeout(config.batcher.flush_interval * 2, batcher_task)
        .await
        .is_err()
    {
        warn!("Pending index writes were not flushed before shutdown");
    }

    health.shutdown().await;
    mpd.shutdown();
    mpd_idle.shutdown();
    index.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from command line and environment
    let config = Config::from_env().context("Failed to parse configuration")?;

    logging::init_logging_with_filter(config.log_mode, config.log_level.as_deref())
        .context("Failed to initialize logging")?;
    config.print_summary();

    if let Err(e) = run(config).await {
        error!("mpdex failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
