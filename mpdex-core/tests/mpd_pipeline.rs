//! Watcher, playlist tracker and library indexer against a scripted MPD
//! server on a local socket.

use std::sync::Arc;
use std::time::Duration;

use event_hub::{EventHub, Topic};
use mpd_client::MpdAddress;
use mpdex_core::{
    EventWatcher, MpdUpstream, PlaylistTracker, Song, Supervisor, SupervisorConfig,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Default)]
struct Queue {
    version: u32,
    length: u32,
    changed: Vec<u32>,
}

/// Answers `ping`, `status`, `plchangesposid`, `lsinfo` and `idle`. Idle
/// replies are fed through `idle`.
struct ScriptedMpd {
    address: MpdAddress,
    queue: Arc<Mutex<Queue>>,
    idle: mpsc::UnboundedSender<&'static str>,
}

impl ScriptedMpd {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string().parse().unwrap();
        let queue = Arc::new(Mutex::new(Queue::default()));
        let (idle, idle_rx) = mpsc::unbounded_channel();
        let idle_rx = Arc::new(tokio::sync::Mutex::new(idle_rx));

        let shared = queue.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone(), idle_rx.clone()));
            }
        });

        Self {
            address,
            queue,
            idle,
        }
    }

    fn set_queue(&self, version: u32, length: u32, changed: &[u32]) {
        *self.queue.lock() = Queue {
            version,
            length,
            changed: changed.to_vec(),
        };
    }
}

async fn serve(
    stream: TcpStream,
    queue: Arc<Mutex<Queue>>,
    idle: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<&'static str>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    if write.write_all(b"OK MPD 0.23.5\n").await.is_err() {
        return;
    }

    while let Ok(Some(command)) = lines.next_line().await {
        let reply = if command == "ping" {
            "OK\n".to_string()
        } else if command == "status" {
            let queue = queue.lock();
            format!(
                "volume: 100\nstate: play\nplaylist: {}\nplaylistlength: {}\nOK\n",
                queue.version, queue.length
            )
        } else if command.starts_with("plchangesposid ") {
            let queue = queue.lock();
            let mut reply = String::new();
            for (id, position) in queue.changed.iter().enumerate() {
                reply.push_str(&format!("cpos: {position}\nId: {id}\n"));
            }
            reply + "OK\n"
        } else if command == "lsinfo \"Kraftwerk/Radioland.flac\"" {
            "file: Kraftwerk/Radioland.flac\nTitle: Radioland\nArtist: Kraftwerk\nTime: 350\nOK\n"
                .to_string()
        } else if command == "idle" {
            match idle.lock().await.recv().await {
                Some(name) => format!("changed: {name}\nOK\n"),
                None => return,
            }
        } else {
            format!("ACK [5@0] {{{command}}} unknown command\n")
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[tokio::test]
async fn test_idle_notification_produces_playlist_delta() {
    let mpd = ScriptedMpd::start().await;
    mpd.set_queue(5, 10, &[]);

    let api = Supervisor::start(
        MpdUpstream::new("mpd", mpd.address.clone()),
        EventHub::new(),
        SupervisorConfig::fast(),
    );
    let listener = Supervisor::start(
        MpdUpstream::new("mpd-idle", mpd.address.clone()),
        EventHub::new(),
        SupervisorConfig::fast().with_health_check_interval(None),
    );

    let hub = EventHub::new();
    let mut deltas = hub.subscribe([Topic::PlaylistDelta]);

    let tracker = PlaylistTracker::new(api.clone(), hub.clone());
    tracker.prime().await.unwrap();
    let tracker_task = tracker.spawn();
    let watcher_task = EventWatcher::new(listener.clone(), hub.clone()).spawn();

    mpd.set_queue(6, 12, &[10, 11]);
    mpd.idle.send("playlist").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), deltas.wait_for(Topic::PlaylistDelta))
        .await
        .expect("a playlist delta should be published")
        .unwrap();
    assert_eq!(
        event.payload,
        Some(json!({ "kind": "add", "start": 10, "count": 2 }))
    );

    mpd.set_queue(7, 8, &[3]);
    mpd.idle.send("playlist").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), deltas.wait_for(Topic::PlaylistDelta))
        .await
        .expect("a second delta should be published")
        .unwrap();
    assert_eq!(
        event.payload,
        Some(json!({
            "kind": "move",
            "start": 3,
            "count": 1,
            "truncation": { "prev_length": 12, "removed_count": 4 }
        }))
    );

    tracker_task.abort();
    watcher_task.abort();
    api.shutdown();
    listener.shutdown();
}

#[tokio::test]
async fn test_song_metadata_lookup() {
    let mpd = ScriptedMpd::start().await;
    let api = Supervisor::start(
        MpdUpstream::new("mpd", mpd.address.clone()),
        EventHub::new(),
        SupervisorConfig::fast(),
    );

    let info = api
        .call(|connection| async move {
            Ok(connection.list_info("Kraftwerk/Radioland.flac").await?)
        })
        .await
        .unwrap()
        .expect("song should be known");

    let song = Song::from_attrs("Kraftwerk/Radioland.flac", &info);
    assert_eq!(song.title.as_deref(), Some("Radioland"));
    assert_eq!(song.duration.as_deref(), Some("350"));
    api.shutdown();
}
