//! # harbor-output
//!
//! Labeled output multiplexer. Every process, sync and proxy writes lines to
//! a named [`Stream`]; one drain task per stream prints them as
//! `<prefix padded to the widest prefix> | <line>` under a single lock, so
//! lines from different streams never interleave mid-line.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lines a stream may queue before its writers wait on the drain task.
pub const STREAM_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StreamId(u64);

/// A named line channel. Clones share the same prefix column.
#[derive(Debug, Clone)]
pub struct Stream {
    id: StreamId,
    prefix: Arc<str>,
    tx: mpsc::Sender<String>,
}

impl Stream {
    /// Queue one line for printing. Lines sent after [`Output::shutdown`] are
    /// dropped.
    pub async fn send(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).await.is_err() {
            tracing::trace!(prefix = %self.prefix, "output stream closed, dropping line");
        }
    }

    /// Returns `true` if both handles write to the same stream.
    pub fn same_stream(&self, other: &Stream) -> bool {
        self.id == other.id
    }
}

struct Registry {
    streams: HashMap<String, Stream>,
    prefixes: HashMap<StreamId, String>,
    writer: Box<dyn Write + Send>,
    next_id: u64,
}

impl Registry {
    fn widest_prefix(&self) -> usize {
        self.prefixes
            .values()
            .map(|p| p.chars().count())
            .max()
            .unwrap_or(0)
    }

    fn print_line(&mut self, id: StreamId, line: &str) {
        let width = self.widest_prefix();
        let prefix = self.prefixes.get(&id).cloned().unwrap_or_default();
        let written = writeln!(self.writer, "{prefix:<width$} | {line}")
            .and_then(|()| self.writer.flush());
        if let Err(err) = written {
            tracing::warn!(prefix = %prefix, error = %err, "failed to write output line");
        }
    }
}

/// Shared output multiplexer. Cheap to clone; clones share streams.
#[derive(Clone)]
pub struct Output {
    registry: Arc<Mutex<Registry>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl Output {
    /// Multiplexer printing to the process's stdout.
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                streams: HashMap::new(),
                prefixes: HashMap::new(),
                writer: Box::new(writer),
                next_id: 0,
            })),
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the stream for `prefix`, creating it and its drain task on
    /// first use. Must be called from within a tokio runtime.
    pub fn stream(&self, prefix: &str) -> Stream {
        let mut registry = lock(&self.registry);
        if let Some(stream) = registry.streams.get(prefix) {
            return stream.clone();
        }

        let id = StreamId(registry.next_id);
        registry.next_id += 1;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let stream = Stream {
            id,
            prefix: Arc::from(prefix),
            tx,
        };
        registry.streams.insert(prefix.to_string(), stream.clone());
        registry.prefixes.insert(id, prefix.to_string());
        drop(registry);

        let handle = tokio::spawn(drain_stream(
            self.registry.clone(),
            id,
            rx,
            self.shutdown.child_token(),
        ));
        lock(&self.tasks).push(handle);
        tracing::debug!(prefix, "registered output stream");

        stream
    }

    /// Names of every registered stream, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let registry = lock(&self.registry);
        let mut prefixes: Vec<String> = registry.streams.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }

    /// Stop every drain task after printing the lines already queued.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "output drain task failed");
            }
        }
    }
}

async fn drain_stream(
    registry: Arc<Mutex<Registry>>,
    id: StreamId,
    mut rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => {
                let Some(line) = line else { return };
                lock(&registry).print_line(id, &line);
            }
            _ = shutdown.cancelled() => break,
        }
    }

    rx.close();
    while let Ok(line) = rx.try_recv() {
        lock(&registry).print_line(id, &line);
    }
}

// A writer that panicked mid-line leaves nothing worth protecting.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
