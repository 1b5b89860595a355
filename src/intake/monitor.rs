//! Voice folder monitor.
//!
//! Polls a directory once per second and submits every newly appearing
//! `.wav` / `.mp3` file to the analysis worker. Files already present when
//! the monitor starts are ignored.

use crate::worker::AnalysisHandle;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

/// Watches a folder for new audio files.
pub struct FolderMonitor {
    folder: PathBuf,
    worker: AnalysisHandle,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl FolderMonitor {
    /// Create a monitor for `folder`. Call [`run`](Self::run) to start polling.
    pub fn new(folder: PathBuf, worker: AnalysisHandle, cancel: CancellationToken) -> Self {
        Self {
            folder,
            worker,
            cancel,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Override the poll interval (useful for testing).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll until cancelled or until the worker stops accepting jobs.
    pub async fn run(self) {
        let mut last = list_entries(&self.folder).await;
        info!(
            folder = %self.folder.display(),
            existing = last.len(),
            "folder monitor started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("folder monitor cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    let current = list_entries(&self.folder).await;
                    for path in current.difference(&last).filter(|p| is_audio_file(p)) {
                        info!(path = %path.display(), "new audio file detected");
                        if self.worker.submit(path.clone()).is_err() {
                            warn!("analysis worker stopped, folder monitor exiting");
                            return;
                        }
                    }
                    last = current;
                }
            }
        }
    }
}

/// Every entry of `folder`; an unreadable folder reads as empty.
async fn list_entries(folder: &Path) -> BTreeSet<PathBuf> {
    let mut entries = BTreeSet::new();
    let mut dir = match tokio::fs::read_dir(folder).await {
        Ok(dir) => dir,
        Err(e) => {
            debug!(folder = %folder.display(), error = %e, "cannot list monitor folder");
            return entries;
        }
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        entries.insert(entry.path());
    }
    entries
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
