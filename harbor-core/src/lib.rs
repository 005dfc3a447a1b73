//! Harbor core library: manifest model, run order, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, raw YAML shapes and validated services
//! - [`manifest`]: load / validate / run order
//! - [`config`]: `~/.harbor/config.yaml`
//! - [`error`]: [`ManifestError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::HarborConfig;
pub use error::{ConfigError, ManifestError};
pub use manifest::{Manifest, DEFAULT_MANIFEST};
pub use types::{
    ImageSource, PortMapping, ProcessSpec, ProxySpec, Service, ServiceDef, ServiceName,
};
