//! Follows MPD's log and forwards database updates.
//!
//! The log may be a regular file that MPD appends to or a named pipe MPD
//! writes into. Either way reading continues past end of file: new lines in
//! a file, or the next writer of a pipe, are picked up on a later read. The
//! file is reopened only after a read error.

use std::path::PathBuf;
use std::time::Duration;

use mpdex_core::LibraryChange;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to wait at end of file before reading again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait before reopening after an open or read failure.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

pub struct LogTail {
    path: PathBuf,
    changes: mpsc::Sender<LibraryChange>,
}

impl LogTail {
    pub fn new(path: PathBuf, changes: mpsc::Sender<LibraryChange>) -> Self {
        Self { path, changes }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the receiving side is dropped.
    pub async fn run(self) {
        loop {
            match File::open(&self.path).await {
                Ok(file) => {
                    tracing::info!("Following {}", self.path.display());
                    if !self.follow(BufReader::new(file)).await {
                        tracing::debug!("Library change receiver gone, stopping log tail");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot open {}: {}", self.path.display(), e);
                }
            }
            tokio::time::sleep(REOPEN_DELAY).await;
        }
    }

    /// Read lines until a read error. Returns false once nobody listens.
    async fn follow(&self, mut reader: BufReader<File>) -> bool {
        let mut line = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                // A partial line stays buffered until the rest is written.
                Ok(_) if line.last() != Some(&b'\n') => {}
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    if let Some(change) = LibraryChange::parse_log_line(&text) {
                        tracing::debug!("Library change: {:?} {}", change.kind, change.path);
                        if self.changes.send(change).await.is_err() {
                            return false;
                        }
                    }
                    line.clear();
                }
                Err(e) => {
                    tracing::warn!("Reading {} failed: {}", self.path.display(), e);
                    return true;
                }
            }
        }
    }
}
