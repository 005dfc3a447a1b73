//! Container engine contract and the Docker CLI implementation.
//!
//! The orchestrator only ever sees [`ContainerEngine`]; everything that
//! actually starts, stops or inspects a container lives behind it.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;

pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Combined stdout/stderr lines a launched process may queue.
pub const OUTPUT_BUFFER: usize = 256;

/// Handle to a process the engine has started.
#[derive(Debug)]
pub struct Launched {
    /// Combined output, one line per message. Closes when the process closes
    /// its output.
    pub output: mpsc::Receiver<String>,
    /// Resolves once with the process result.
    pub exit: oneshot::Receiver<Result<(), EngineError>>,
}

/// Observed status of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub running: bool,
    pub address: String,
}

impl Inspection {
    /// A container is reachable once it reports a host address.
    pub fn is_reachable(&self) -> bool {
        !self.address.is_empty()
    }
}

/// Black-box process controller used by the orchestrator.
pub trait ContainerEngine: Send + Sync + 'static {
    /// Program name used when echoing commands, e.g. `docker`.
    fn program(&self) -> &str;

    /// Build `context` into an image tagged `tag`.
    fn build<'a>(&'a self, tag: &'a str, context: &'a Path) -> EngineFuture<'a, Launched>;

    /// Start a container with `run` arguments; returns once it is spawned.
    fn launch<'a>(&'a self, args: &'a [String]) -> EngineFuture<'a, Launched>;

    /// Forcefully remove a container by name.
    fn remove<'a>(&'a self, name: &'a str) -> EngineFuture<'a, ()>;

    fn kill<'a>(&'a self, name: &'a str) -> EngineFuture<'a, ()>;

    fn inspect<'a>(&'a self, name: &'a str) -> EngineFuture<'a, Inspection>;
}

/// [`ContainerEngine`] that shells out to the `docker` CLI (or a compatible
/// binary such as `podman`).
#[derive(Debug, Clone)]
pub struct DockerEngine {
    program: String,
}

impl DockerEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn(&self, args: Vec<String>) -> Result<Launched, EngineError> {
        let command = self.command_line(&args);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(EngineError::Exit {
                    command,
                    status: status.to_string(),
                    stderr: String::new(),
                }),
                Err(err) => Err(EngineError::Io(err)),
            };
            let _ = exit_tx.send(result);
        });

        Ok(Launched {
            output: line_rx,
            exit: exit_rx,
        })
    }

    /// Run to completion and return stdout.
    async fn output(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            return Err(EngineError::Exit {
                command: self.command_line(&owned),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerEngine for DockerEngine {
    fn program(&self) -> &str {
        &self.program
    }

    fn build<'a>(&'a self, tag: &'a str, context: &'a Path) -> EngineFuture<'a, Launched> {
        Box::pin(async move {
            self.spawn(vec![
                "build".to_string(),
                "-t".to_string(),
                tag.to_string(),
                context.display().to_string(),
            ])
        })
    }

    fn launch<'a>(&'a self, args: &'a [String]) -> EngineFuture<'a, Launched> {
        Box::pin(async move {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push("run".to_string());
            full.extend(args.iter().cloned());
            self.spawn(full)
        })
    }

    fn remove<'a>(&'a self, name: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.output(&["rm", "-f", name]).await.map(|_| ()) })
    }

    fn kill<'a>(&'a self, name: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.output(&["kill", name]).await.map(|_| ()) })
    }

    fn inspect<'a>(&'a self, name: &'a str) -> EngineFuture<'a, Inspection> {
        Box::pin(async move {
            let json = self.output(&["inspect", name]).await?;
            parse_inspect(name, &json)
        })
    }
}

/// Forward `reader` line by line. Invalid UTF-8 is replaced, not fatal.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(&['\n', '\r'][..]).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to read process output");
                break;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    networks: BTreeMap<String, NetworkEndpoint>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Parse `docker inspect` output. The default bridge address wins; otherwise
/// the first non-empty address from a named network is used.
pub fn parse_inspect(name: &str, json: &str) -> Result<Inspection, EngineError> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

    let settings = entry.network_settings;
    let address = if settings.ip_address.is_empty() {
        settings
            .networks
            .into_values()
            .map(|n| n.ip_address)
            .find(|ip| !ip.is_empty())
            .unwrap_or_default()
    } else {
        settings.ip_address
    };

    Ok(Inspection {
        running: entry.state.running,
        address,
    })
}
