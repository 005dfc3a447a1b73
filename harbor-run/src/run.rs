//! Run orchestrator: sequential service startup, sync wiring, and teardown.
//!
//! ```text
//! Created ─start()─▶ Starting ──▶ Running ─stop()─▶ Stopping ──▶ Stopped
//!                       │            │
//!                       └─ error ─▶ Failed ─stop()─▶ Stopping ──▶ Stopped
//! ```
//!
//! A failed `start()` leaves already-launched services running and tracked;
//! the caller decides whether to `stop()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use harbor_core::{HarborConfig, ImageSource, Manifest, ProcessSpec, ProxySpec, Service};
use harbor_output::{Output, Stream};
use harbor_sync::{prune, ChangeSource, DirSync, NotifyChangeSource, SyncTasks};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{ContainerEngine, Launched};
use crate::error::{EngineError, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Per-invocation inputs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Application name; prefixes every container name.
    pub app: String,
    /// Run directory. Build contexts and sync paths resolve against it.
    pub dir: PathBuf,
}

/// First completion reported by a tracked process.
#[derive(Debug)]
pub struct ProcessExit {
    pub name: String,
    pub result: Result<(), EngineError>,
}

/// One orchestration session. Single-shot: `start()` works once.
pub struct Run {
    options: RunOptions,
    manifest: Manifest,
    engine: Arc<dyn ContainerEngine>,
    changes: Arc<dyn ChangeSource>,
    output: Output,
    config: HarborConfig,

    state: RunState,
    processes: Vec<ProcessSpec>,
    proxies: Vec<ProxySpec>,
    syncs: Vec<DirSync>,
    sync_tasks: Vec<SyncTasks>,
    tasks: Vec<JoinHandle<()>>,
    done_tx: Option<mpsc::UnboundedSender<ProcessExit>>,
    done_rx: Option<mpsc::UnboundedReceiver<ProcessExit>>,
    shutdown: CancellationToken,
}

impl Run {
    pub fn new(
        options: RunOptions,
        manifest: Manifest,
        engine: Arc<dyn ContainerEngine>,
        output: Output,
    ) -> Self {
        Self {
            options,
            manifest,
            engine,
            changes: Arc::new(NotifyChangeSource),
            output,
            config: HarborConfig::default(),
            state: RunState::Created,
            processes: Vec::new(),
            proxies: Vec::new(),
            syncs: Vec::new(),
            sync_tasks: Vec::new(),
            tasks: Vec::new(),
            done_tx: None,
            done_rx: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: HarborConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_change_source(mut self, changes: Arc<dyn ChangeSource>) -> Self {
        self.changes = changes;
        self
    }

    pub fn app(&self) -> &str {
        &self.options.app
    }

    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn processes(&self) -> &[ProcessSpec] {
        &self.processes
    }

    pub fn proxies(&self) -> &[ProxySpec] {
        &self.proxies
    }

    pub fn syncs(&self) -> &[DirSync] {
        &self.syncs
    }

    /// Token that, when cancelled (e.g. on Ctrl-C), ends [`Run::wait`] early
    /// or makes an in-progress [`Run::start`] return `Interrupted`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Build images, then start every service in run order, one at a time.
    pub async fn start(&mut self) -> Result<(), RunError> {
        if self.state != RunState::Created {
            return Err(RunError::AlreadyStarted);
        }
        self.state = RunState::Starting;

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        self.done_tx = Some(done_tx);
        self.done_rx = Some(done_rx);

        let result = self.start_services().await;
        // Only exit waiters keep the completion channel open from here on.
        self.done_tx = None;

        match result {
            Ok(()) => {
                self.state = RunState::Running;
                tracing::info!(
                    app = %self.options.app,
                    processes = self.processes.len(),
                    proxies = self.proxies.len(),
                    syncs = self.syncs.len(),
                    "run started",
                );
                Ok(())
            }
            Err(err) => {
                self.state = RunState::Failed;
                tracing::error!(app = %self.options.app, error = %err, "run failed to start");
                Err(err)
            }
        }
    }

    /// Block until the first tracked process exits (or the shutdown token is
    /// cancelled), stop the run, and report that process's result.
    pub async fn wait(&mut self) -> Result<(), RunError> {
        if self.state == RunState::Created {
            return Err(RunError::NotStarted);
        }

        let shutdown = self.shutdown.clone();
        let exit = match self.done_rx.as_mut() {
            Some(done) => tokio::select! {
                exit = done.recv() => exit,
                _ = shutdown.cancelled() => None,
            },
            None => None,
        };
        self.stop().await;

        match exit {
            Some(ProcessExit {
                name,
                result: Err(source),
            }) => Err(RunError::Process { name, source }),
            Some(ProcessExit { name, .. }) => {
                tracing::info!(process = %name, "process exited");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Kill every tracked process and proxy, then cancel and join all
    /// background work. Kill failures are logged, never returned. Calling it
    /// again, or on a run that never started, does nothing.
    pub async fn stop(&mut self) {
        if matches!(self.state, RunState::Created | RunState::Stopped) {
            return;
        }
        self.state = RunState::Stopping;

        for process in std::mem::take(&mut self.processes) {
            let result = self.engine.kill(&process.name).await;
            log_cleanup("kill process", &process.name, result);
        }
        for proxy in std::mem::take(&mut self.proxies) {
            let result = self.engine.kill(&proxy.name).await;
            log_cleanup("kill proxy", &proxy.name, result);
        }

        self.shutdown.cancel();
        for sync in std::mem::take(&mut self.sync_tasks) {
            sync.join().await;
        }
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "run task join failure");
            }
        }
        self.syncs.clear();
        self.done_rx = None;
        self.state = RunState::Stopped;
        tracing::info!(app = %self.options.app, "run stopped");
    }

    async fn start_services(&mut self) -> Result<(), RunError> {
        let order: Vec<Service> = self.manifest.run_order()?.into_iter().cloned().collect();

        for service in &order {
            self.check_interrupted()?;
            self.build(service).await?;
        }
        for service in &order {
            self.check_interrupted()?;
            self.start_service(service).await?;
        }
        Ok(())
    }

    fn check_interrupted(&self) -> Result<(), RunError> {
        if self.shutdown.is_cancelled() {
            return Err(RunError::Interrupted);
        }
        Ok(())
    }

    /// Build a service's image, streaming build output, and wait for it.
    async fn build(&mut self, service: &Service) -> Result<(), RunError> {
        let ImageSource::Build(context) = &service.source else {
            return Ok(());
        };
        let stream = self.output.stream(&service.name.0);
        let tag = service.image_tag(&self.options.app);
        let context = self.options.dir.join(context);
        let build_err = |source| RunError::Build {
            service: service.name.0.clone(),
            source,
        };

        stream
            .send(format!(
                "running: {} build -t {tag} {}",
                self.engine.program(),
                context.display()
            ))
            .await;
        let shutdown = self.shutdown.clone();
        let Launched { mut output, exit } = tokio::select! {
            _ = shutdown.cancelled() => return Err(RunError::Interrupted),
            launched = self.engine.build(&tag, &context) => launched.map_err(build_err)?,
        };
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Err(RunError::Interrupted),
                line = output.recv() => match line {
                    Some(line) => stream.send(line).await,
                    None => break,
                },
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => Err(RunError::Interrupted),
            result = exit => result
                .unwrap_or(Err(EngineError::Detached))
                .map_err(build_err),
        }
    }

    async fn start_service(&mut self, service: &Service) -> Result<(), RunError> {
        let app = self.options.app.clone();
        let stream = self.output.stream(&service.name.0);
        let proxies = service.proxies(&app, &self.config.proxy_image);
        let process = service.process(&app);

        // The container may legitimately not exist yet.
        if let Err(err) = self.engine.remove(&process.name).await {
            tracing::debug!(process = %process.name, error = %err, "pre-start removal skipped");
        }

        self.launch(&process.name, &process.args, &stream, true)
            .await?;
        // Tracked as soon as it is launched so a later failure in this
        // service's startup still leaves it reachable by `stop()`.
        self.processes.push(process.clone());

        let mut syncs = Vec::new();
        for (local, remote) in service.sync_paths() {
            syncs.push(DirSync::new(self.options.dir.join(&local), remote)?);
        }
        for sync in prune(syncs) {
            let tasks = sync.start(
                self.changes.clone(),
                stream.clone(),
                &self.config.sync,
                self.shutdown.child_token(),
            );
            tracing::info!(
                service = %service.name,
                local = %sync.local().display(),
                remote = %sync.remote().display(),
                "sync started",
            );
            self.sync_tasks.push(tasks);
            self.syncs.push(sync);
        }

        if !self.wait_for_reachable(&process.name).await? {
            tracing::warn!(
                process = %process.name,
                attempts = self.config.reachability.attempts,
                "process not reachable; continuing startup",
            );
        }

        for proxy in proxies {
            self.proxies.push(proxy.clone());
            self.launch(&proxy.name, &proxy.args, &stream, false)
                .await?;
        }
        Ok(())
    }

    /// Launch a container and spawn its output forwarder and exit waiter.
    /// Only exits with `report_exit` set end the run.
    async fn launch(
        &mut self,
        name: &str,
        args: &[String],
        stream: &Stream,
        report_exit: bool,
    ) -> Result<(), RunError> {
        stream
            .send(format!("running: {} run {}", self.engine.program(), args.join(" ")))
            .await;
        let Launched { output, exit } =
            self.engine
                .launch(args)
                .await
                .map_err(|source| RunError::Launch {
                    name: name.to_string(),
                    source,
                })?;

        self.tasks.push(tokio::spawn(forward_output(
            output,
            stream.clone(),
            self.shutdown.child_token(),
        )));

        let done = if report_exit { self.done_tx.clone() } else { None };
        let name = name.to_string();
        let cancel = self.shutdown.child_token();
        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = exit => {
                    let result = result.unwrap_or(Err(EngineError::Detached));
                    match done {
                        Some(done) => {
                            let _ = done.send(ProcessExit { name, result });
                        }
                        None => {
                            if let Err(err) = result {
                                tracing::warn!(name = %name, error = %err, "proxy exited");
                            }
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    /// Poll `inspect` until the container reports an address, at most
    /// `reachability.attempts` times. Returns `Ok(false)` on timeout and
    /// `Interrupted` if the shutdown token fires mid-poll.
    async fn wait_for_reachable(&self, name: &str) -> Result<bool, RunError> {
        let attempts = self.config.reachability.attempts.max(1);
        let interval = self.config.reachability.interval();
        let shutdown = self.shutdown.clone();

        for attempt in 1..=attempts {
            let inspected = tokio::select! {
                _ = shutdown.cancelled() => return Err(RunError::Interrupted),
                inspected = self.engine.inspect(name) => inspected,
            };
            match inspected {
                Ok(inspection) if inspection.is_reachable() => {
                    tracing::debug!(
                        process = name,
                        attempt,
                        running = inspection.running,
                        address = %inspection.address,
                        "process reachable",
                    );
                    return Ok(true);
                }
                Ok(inspection) => tracing::trace!(
                    process = name,
                    attempt,
                    running = inspection.running,
                    "no address yet",
                ),
                Err(err) => tracing::trace!(process = name, error = %err, "inspect failed"),
            }
            if attempt < attempts {
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(RunError::Interrupted),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
        Ok(false)
    }
}

async fn forward_output(
    mut lines: mpsc::Receiver<String>,
    stream: Stream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => {
                let Some(line) = line else { break };
                stream.send(line).await;
            }
        }
    }
}

/// Cleanup is best-effort: failures are logged and swallowed.
fn log_cleanup(action: &'static str, name: &str, result: Result<(), EngineError>) {
    if let Err(err) = result {
        tracing::warn!(action, name, error = %err, "best-effort cleanup failed");
    }
}
