//! File-change events and the sources that produce them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

impl ChangeKind {
    /// Maps a notify event kind; access and metadata-only events are ignored.
    pub fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(ChangeKind::Create),
            EventKind::Modify(_) => Some(ChangeKind::Modify),
            EventKind::Remove(_) => Some(ChangeKind::Remove),
            _ => None,
        }
    }
}

/// One observed change to a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

impl Change {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            at: Utc::now(),
        }
    }
}

/// Watches a directory tree and yields its changes.
///
/// The returned channel is bounded by `buffer`, so a sync that falls behind
/// slows its source down instead of growing without limit. Once the channel
/// closes the watch is over; sources are not restartable.
pub trait ChangeSource: Send + Sync + 'static {
    fn watch(
        &self,
        root: &Path,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Change>, SyncError>;
}

/// [`ChangeSource`] backed by the platform's recommended `notify` watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyChangeSource;

impl ChangeSource for NotifyChangeSource {
    fn watch(
        &self,
        root: &Path,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Change>, SyncError> {
        let buffer = buffer.max(1);
        // The callback runs on notify's own thread, so blocking_send is safe.
        let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(buffer);
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.blocking_send(event);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::debug!(path = %root.display(), "watching sync directory");

        let (change_tx, change_rx) = mpsc::channel(buffer);
        let root = root.to_path_buf();
        tokio::spawn(async move {
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        let event = match event {
                            Ok(event) => event,
                            Err(err) => {
                                tracing::warn!(root = %root.display(), error = %err, "watcher event error");
                                continue;
                            }
                        };
                        let Some(kind) = ChangeKind::from_event(&event.kind) else {
                            continue;
                        };
                        for path in event.paths {
                            if change_tx.send(Change::new(path, kind)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!(root = %root.display(), "stopped watching sync directory");
        });

        Ok(change_rx)
    }
}
