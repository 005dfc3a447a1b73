use thiserror::Error;

/// Failures reported by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}{}", detail(.stderr))]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse inspect output: {0}")]
    Inspect(#[from] serde_json::Error),

    #[error("no such container: {0}")]
    NotFound(String),

    /// The exit of a launched process could no longer be observed.
    #[error("process detached before reporting its exit")]
    Detached,
}

fn detail(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Error surface for the run orchestrator.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("already started")]
    AlreadyStarted,

    #[error("run has not been started")]
    NotStarted,

    /// The shutdown token fired while `start()` was still in progress.
    #[error("startup interrupted")]
    Interrupted,

    #[error("manifest error: {0}")]
    Manifest(#[from] harbor_core::ManifestError),

    #[error("sync error: {0}")]
    Sync(#[from] harbor_sync::SyncError),

    #[error("failed to build service '{service}': {source}")]
    Build {
        service: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to launch '{name}': {source}")]
    Launch {
        name: String,
        #[source]
        source: EngineError,
    },

    #[error("process '{name}' failed: {source}")]
    Process {
        name: String,
        #[source]
        source: EngineError,
    },
}
