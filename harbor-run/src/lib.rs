//! Run orchestration: container engine, service startup, teardown.

pub mod engine;
mod error;
pub mod run;

pub use engine::{ContainerEngine, DockerEngine, EngineFuture, Inspection, Launched};
pub use error::{EngineError, RunError};
pub use run::{ProcessExit, Run, RunOptions, RunState};

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Safe to call more than once.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
