//! Local↔remote directory syncs: resolution, containment, pruning, and the
//! background watch/flush loops.
//!
//! ## Containment
//!
//! `a.contains(b)` holds when `b.local` lies strictly under `a.local` *and*
//! the suffix relating the two local paths equals the suffix relating the
//! two remote paths. `/host/src -> /app/src` contains
//! `/host/src/lib -> /app/src/lib` but not `/host/src/lib -> /app/vendor/lib`.
//!
//! Coincident syncs (same local and remote) do not contain each other;
//! [`prune`] collapses them explicitly, keeping the first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use harbor_core::config::SyncConfig;
use harbor_output::Stream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::change::{Change, ChangeSource};
use crate::error::{resolve_err, SyncError};

/// Pending changes keyed by path: a later change to a path replaces the
/// earlier one, and a drain yields changes in path order.
type Buffer = BTreeMap<PathBuf, Change>;

#[derive(Debug, Default)]
struct Pending {
    incoming: Buffer,
    outgoing: Buffer,
}

fn coalesce(buffer: &mut Buffer, change: Change) {
    buffer.insert(change.path.clone(), change);
}

fn drain(buffer: &mut Buffer) -> Vec<Change> {
    std::mem::take(buffer).into_values().collect()
}

/// A mirroring relationship between one local directory and one remote one.
///
/// Clones share the same pending buffers.
#[derive(Debug, Clone)]
pub struct DirSync {
    local: PathBuf,
    remote: PathBuf,
    pending: Arc<Mutex<Pending>>,
}

impl DirSync {
    /// Resolve `local` to an absolute, symlink-free path. Fails if it does not
    /// exist.
    pub fn new(local: impl AsRef<Path>, remote: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let local = local.as_ref();
        let resolved = std::fs::canonicalize(local).map_err(|e| resolve_err(local, e))?;
        Ok(Self {
            local: resolved,
            remote: remote.into(),
            pending: Arc::new(Mutex::new(Pending::default())),
        })
    }

    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    pub fn contains(&self, other: &DirSync) -> bool {
        let Ok(local_suffix) = other.local.strip_prefix(&self.local) else {
            return false;
        };
        let Ok(remote_suffix) = other.remote.strip_prefix(&self.remote) else {
            return false;
        };
        if local_suffix.as_os_str().is_empty() {
            return false;
        }
        local_suffix == remote_suffix
    }

    /// Same local and remote path.
    pub fn is_coincident(&self, other: &DirSync) -> bool {
        self.local == other.local && self.remote == other.remote
    }

    /// Remote path a local path maps to, if it lies under this sync.
    pub fn remote_path_for(&self, local: &Path) -> Option<PathBuf> {
        local
            .strip_prefix(&self.local)
            .ok()
            .map(|suffix| self.remote.join(suffix))
    }

    pub fn record_outgoing(&self, change: Change) {
        coalesce(&mut lock(&self.pending).outgoing, change);
    }

    pub fn record_incoming(&self, change: Change) {
        coalesce(&mut lock(&self.pending).incoming, change);
    }

    /// Take every pending outgoing change, leaving the buffer empty.
    pub fn drain_outgoing(&self) -> Vec<Change> {
        drain(&mut lock(&self.pending).outgoing)
    }

    pub fn drain_incoming(&self) -> Vec<Change> {
        drain(&mut lock(&self.pending).incoming)
    }

    pub fn pending_outgoing(&self) -> usize {
        lock(&self.pending).outgoing.len()
    }

    /// Drain the outgoing buffer and publish it on `stream`. Returns the number
    /// of changes flushed.
    pub async fn flush(&self, stream: &Stream) -> usize {
        let batch = self.drain_outgoing();
        if batch.is_empty() {
            return 0;
        }
        for change in &batch {
            tracing::debug!(
                local = %change.path.display(),
                remote = ?self.remote_path_for(&change.path),
                kind = ?change.kind,
                "flushing change",
            );
        }
        stream
            .send(format!(
                "sync: {} change(s) {} -> {}",
                batch.len(),
                self.local.display(),
                self.remote.display()
            ))
            .await;
        batch.len()
    }

    /// Spawn the watch and flush loops. Both exit when `cancel` fires.
    pub fn start(
        &self,
        source: Arc<dyn ChangeSource>,
        stream: Stream,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> SyncTasks {
        let watch = tokio::spawn(watch_outgoing(
            self.clone(),
            source,
            config.change_buffer,
            cancel.clone(),
        ));
        let flush = tokio::spawn(flush_outgoing(
            self.clone(),
            stream,
            config.flush_interval(),
            cancel,
        ));
        SyncTasks { watch, flush }
    }
}

/// Background tasks of one started sync.
#[derive(Debug)]
pub struct SyncTasks {
    pub watch: JoinHandle<()>,
    pub flush: JoinHandle<()>,
}

impl SyncTasks {
    pub async fn join(self) {
        for (task, handle) in [("watch", self.watch), ("flush", self.flush)] {
            if let Err(err) = handle.await {
                tracing::warn!(task, error = %err, "sync task join failure");
            }
        }
    }
}

/// Keep only root syncs: those no other sync contains. Of several coincident
/// syncs the first one wins.
pub fn prune(syncs: Vec<DirSync>) -> Vec<DirSync> {
    let keep: Vec<bool> = syncs
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            if let Some(root) = syncs
                .iter()
                .enumerate()
                .find(|(j, other)| *j != i && other.contains(candidate))
                .map(|(_, other)| other)
            {
                tracing::debug!(
                    local = %candidate.local.display(),
                    root = %root.local.display(),
                    "pruned nested sync",
                );
                return false;
            }
            if syncs[..i].iter().any(|earlier| earlier.is_coincident(candidate)) {
                tracing::warn!(
                    local = %candidate.local.display(),
                    remote = %candidate.remote.display(),
                    "duplicate sync request ignored",
                );
                return false;
            }
            true
        })
        .collect();

    syncs
        .into_iter()
        .zip(keep)
        .filter_map(|(sync, keep)| keep.then_some(sync))
        .collect()
}

async fn watch_outgoing(
    sync: DirSync,
    source: Arc<dyn ChangeSource>,
    buffer: usize,
    cancel: CancellationToken,
) {
    let mut changes = match source.watch(&sync.local, buffer, cancel.child_token()) {
        Ok(changes) => changes,
        Err(err) => {
            tracing::error!(
                local = %sync.local.display(),
                error = %err,
                "cannot watch sync directory; local edits will not be synced",
            );
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => {
                let Some(change) = change else {
                    tracing::warn!(local = %sync.local.display(), "change source closed");
                    break;
                };
                sync.record_outgoing(change);
            }
        }
    }
}

async fn flush_outgoing(
    sync: DirSync,
    stream: Stream,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sync.flush(&stream).await;
            }
        }
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
