//! `harbor start`: run every service in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use harbor_output::Output;
use harbor_run::{DockerEngine, Run};

use super::target::{Target, TargetArgs};

/// Arguments for `harbor start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

impl StartArgs {
    pub fn run(self) -> Result<()> {
        let target = self.target.load()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        runtime.block_on(run_foreground(target))
    }
}

async fn run_foreground(target: Target) -> Result<()> {
    let Target {
        options,
        manifest,
        config,
    } = target;

    let output = Output::stdout();
    let engine = Arc::new(DockerEngine::new(config.docker.clone()));
    let mut run = Run::new(options, manifest, engine, output.clone()).with_config(config);

    let shutdown = run.shutdown_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            shutdown.cancel();
        }
    });

    let result = match run.start().await {
        Ok(()) => run.wait().await,
        Err(err) => {
            // Services launched before the failure are still running.
            run.stop().await;
            Err(err)
        }
    };

    interrupt.abort();
    output.shutdown().await;
    result.with_context(|| format!("app '{}' stopped with an error", run.app()))
}
