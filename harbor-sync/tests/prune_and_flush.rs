//! Containment/pruning properties and the watch → flush pipeline.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harbor_core::config::SyncConfig;
use harbor_output::Output;
use harbor_sync::{
    prune, Change, ChangeKind, ChangeSource, DirSync, NotifyChangeSource, SyncError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    for sub in ["app/src/lib", "app/vendor", "other"] {
        std::fs::create_dir_all(dir.path().join(sub)).expect("mkdir");
    }
    dir
}

fn sync(root: &TempDir, local: &str, remote: &str) -> DirSync {
    DirSync::new(root.path().join(local), remote).expect("resolve sync")
}

fn locals(syncs: &[DirSync], root: &Path) -> Vec<String> {
    let root = std::fs::canonicalize(root).expect("canonical root");
    syncs
        .iter()
        .map(|s| {
            s.local()
                .strip_prefix(&root)
                .expect("under root")
                .display()
                .to_string()
        })
        .collect()
}

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("buffer lock").clone()).expect("utf8")
    }
}

/// Change source whose events the test pushes by hand.
struct ManualSource {
    rx: Mutex<Option<mpsc::Receiver<Change>>>,
}

impl ManualSource {
    fn new() -> (Arc<Self>, mpsc::Sender<Change>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

impl ChangeSource for ManualSource {
    fn watch(
        &self,
        _root: &Path,
        _buffer: usize,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Change>, SyncError> {
        Ok(self
            .rx
            .lock()
            .expect("source lock")
            .take()
            .expect("watch called once"))
    }
}

/// Change source whose backend cannot watch anything.
struct BrokenSource;

impl ChangeSource for BrokenSource {
    fn watch(
        &self,
        root: &Path,
        _buffer: usize,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Change>, SyncError> {
        Err(SyncError::Notify(notify::Error::generic(&format!(
            "inotify limit reached for {}",
            root.display()
        ))))
    }
}

// ---------------------------------------------------------------------------
// 1. Containment and pruning
// ---------------------------------------------------------------------------

#[test]
fn nested_sync_with_matching_remote_suffix_is_contained_and_pruned() {
    let root = project();
    let outer = sync(&root, "app/src", "/container/src");
    let inner = sync(&root, "app/src/lib", "/container/src/lib");

    assert!(outer.contains(&inner));
    assert!(!inner.contains(&outer));

    let pruned = prune(vec![inner, outer]);
    assert_eq!(locals(&pruned, root.path()), vec!["app/src"]);
}

#[test]
fn nested_local_with_diverging_remote_is_kept() {
    let root = project();
    let outer = sync(&root, "app/src", "/container/src");
    let elsewhere = sync(&root, "app/src/lib", "/container/vendor/lib");

    assert!(!outer.contains(&elsewhere));
    assert_eq!(prune(vec![outer, elsewhere]).len(), 2);
}

#[test]
fn unrelated_syncs_both_survive() {
    let root = project();
    let a = sync(&root, "app/vendor", "/container/vendor");
    let b = sync(&root, "other", "/container/other");

    assert!(!a.contains(&b));
    assert!(!b.contains(&a));
    assert_eq!(
        locals(&prune(vec![a, b]), root.path()),
        vec!["app/vendor", "other"]
    );
}

#[test]
fn deeper_chains_keep_only_the_outermost() {
    let root = project();
    let syncs = vec![
        sync(&root, "app/src/lib", "/c/app/src/lib"),
        sync(&root, "app", "/c/app"),
        sync(&root, "app/src", "/c/app/src"),
        sync(&root, "other", "/c/other"),
    ];
    assert_eq!(locals(&prune(syncs), root.path()), vec!["app", "other"]);
}

#[test]
fn pruning_is_idempotent() {
    let root = project();
    let syncs = vec![
        sync(&root, "app/src", "/c/src"),
        sync(&root, "app/src/lib", "/c/src/lib"),
        sync(&root, "app/vendor", "/c/vendor"),
        sync(&root, "app/src/lib", "/c/elsewhere"),
    ];
    let once = prune(syncs);
    let twice = prune(once.clone());
    assert_eq!(locals(&once, root.path()), locals(&twice, root.path()));
    assert_eq!(once.len(), 3);
}

#[test]
fn coincident_requests_collapse_to_the_first() {
    let root = project();
    // Different spellings resolve to the same canonical local path.
    let a = sync(&root, "app/src", "/c/src");
    let b = sync(&root, "app/src/../src", "/c/src");

    let pruned = prune(vec![a, b]);
    assert_eq!(pruned.len(), 1);
}

// ---------------------------------------------------------------------------
// 2. Watch → flush
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn burst_of_edits_flushes_once_per_tick() {
    let root = project();
    let dir_sync = sync(&root, "app/src", "/container/src");
    let (source, changes) = ManualSource::new();
    let buffer = Buffer::default();
    let output = Output::with_writer(buffer.clone());
    let cancel = CancellationToken::new();

    let tasks = dir_sync.start(
        source,
        output.stream("web"),
        &SyncConfig::default(),
        cancel.clone(),
    );

    let file = dir_sync.local().join("main.rs");
    for kind in [ChangeKind::Create, ChangeKind::Modify, ChangeKind::Modify] {
        changes.send(Change::new(&file, kind)).await.expect("send");
    }
    changes
        .send(Change::new(dir_sync.local().join("lib/mod.rs"), ChangeKind::Create))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(dir_sync.pending_outgoing(), 0, "tick drained the buffer");

    // Nothing new arrives, so the next ticks publish nothing.
    tokio::time::sleep(Duration::from_secs(3)).await;

    cancel.cancel();
    tasks.join().await;
    output.shutdown().await;

    let text = buffer.text();
    assert_eq!(text.matches("sync: ").count(), 1, "got: {text}");
    assert!(text.contains("sync: 2 change(s)"), "got: {text}");
    assert!(text.contains("-> /container/src"), "got: {text}");
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn cancel_stops_both_loops_even_if_source_stays_open() {
    let root = project();
    let dir_sync = sync(&root, "app", "/c/app");
    let (source, _changes) = ManualSource::new();
    let output = Output::with_writer(io::sink());
    let cancel = CancellationToken::new();

    let tasks = dir_sync.start(source, output.stream("web"), &SyncConfig::default(), cancel.clone());
    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), tasks.join())
        .await
        .expect("sync tasks exit after cancel");
    output.shutdown().await;
}

#[tokio::test]
async fn notify_source_reports_file_creation() {
    let root = project();
    let watched = std::fs::canonicalize(root.path().join("app")).expect("canonical");
    let cancel = CancellationToken::new();
    let mut changes = NotifyChangeSource
        .watch(&watched, 64, cancel.clone())
        .expect("watch");

    std::fs::write(watched.join("created.txt"), "hello").expect("write");

    let change = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let change = changes.recv().await.expect("change stream open");
            if change.path.ends_with("created.txt") {
                return change;
            }
        }
    })
    .await
    .expect("change observed");
    assert!(matches!(change.kind, ChangeKind::Create | ChangeKind::Modify));

    cancel.cancel();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn failed_watch_degrades_only_its_own_sync() {
    let root = project();
    let broken = sync(&root, "app/vendor", "/c/vendor");
    let healthy = sync(&root, "other", "/c/other");
    let (source, changes) = ManualSource::new();
    let buffer = Buffer::default();
    let output = Output::with_writer(buffer.clone());
    let cancel = CancellationToken::new();
    let config = SyncConfig::default();

    let broken_tasks = broken.start(
        Arc::new(BrokenSource),
        output.stream("vendor"),
        &config,
        cancel.child_token(),
    );
    let healthy_tasks = healthy.start(source, output.stream("other"), &config, cancel.child_token());

    changes
        .send(Change::new(healthy.local().join("notes.txt"), ChangeKind::Create))
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The broken watch gave up; its flush loop keeps running until cancelled.
    assert!(broken_tasks.watch.is_finished());
    assert!(!broken_tasks.flush.is_finished());
    assert_eq!(healthy.pending_outgoing(), 0);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), async {
        broken_tasks.join().await;
        healthy_tasks.join().await;
    })
    .await
    .expect("both syncs exit after cancel");
    output.shutdown().await;

    let text = buffer.text();
    assert_eq!(text.matches("sync: ").count(), 1, "got: {text}");
    assert!(text.contains("sync: 1 change(s)"), "got: {text}");
    assert!(text.contains("-> /c/other"), "got: {text}");
}
