//! Error types for harbor-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or resolving a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The manifest declares no services.
    #[error("manifest declares no services")]
    Empty,

    /// A service has neither `build` nor `image`.
    #[error("service '{service}' needs either `build` or `image`")]
    MissingImage { service: String },

    /// A `ports` entry is not `<host>:<container>` or `<port>`.
    #[error("service '{service}' has invalid port mapping '{port}'")]
    InvalidPort { service: String, port: String },

    /// A service links to a service the manifest does not declare.
    #[error("service '{service}' links to unknown service '{link}'")]
    UnknownLink { service: String, link: String },

    /// Links form a cycle, so no run order exists.
    #[error("service links form a cycle involving: {}", services.join(", "))]
    Cycle { services: Vec<String> },
}

/// Errors from loading the per-user configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.harbor/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
