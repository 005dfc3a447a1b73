//! Domain types for the Harbor manifest.
//!
//! [`ServiceDef`] is the raw YAML shape; [`Service`] is the validated form the
//! orchestrator consumes. All path fields use `PathBuf`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a service entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Raw YAML shape
// ---------------------------------------------------------------------------

/// A service command: either a single shell-style string or an exec list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandDef {
    Shell(String),
    Exec(Vec<String>),
}

impl CommandDef {
    fn to_args(&self) -> Vec<String> {
        match self {
            CommandDef::Shell(line) => vec!["sh".to_string(), "-c".to_string(), line.clone()],
            CommandDef::Exec(args) => args.clone(),
        }
    }
}

/// One service as written in `harbor.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceDef {
    /// Build context, relative to the run directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandDef>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    /// Local path -> remote path sync requests.
    #[serde(default)]
    pub sync: BTreeMap<String, String>,
}

/// Root of the manifest YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ManifestDef {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDef>,
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// A `host:container` port pair. Each one becomes a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    /// Parses `"80:3000"` or a bare `"3000"` (same port on both sides).
    pub fn parse(service: &str, raw: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidPort {
            service: service.to_string(),
            port: raw.to_string(),
        };
        let (host, container) = match raw.split_once(':') {
            Some((host, container)) => (host, container),
            None => (raw, raw),
        };
        let host = host.trim().parse::<u16>().map_err(|_| invalid())?;
        let container = container.trim().parse::<u16>().map_err(|_| invalid())?;
        if host == 0 || container == 0 {
            return Err(invalid());
        }
        Ok(Self { host, container })
    }
}

/// Where a service's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// Built from a context directory relative to the run directory.
    Build(PathBuf),
    /// Pulled by reference.
    Image(String),
}

/// A validated service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub name: ServiceName,
    pub source: ImageSource,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub links: Vec<ServiceName>,
    pub sync: BTreeMap<String, String>,
}

/// Launch descriptor for a service's main container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    /// Container name, `<app>-<service>`.
    pub name: String,
    pub service: ServiceName,
    /// Arguments passed to the engine's `run`.
    pub args: Vec<String>,
}

/// Launch descriptor for a port-forwarding proxy container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySpec {
    pub name: String,
    pub service: ServiceName,
    pub port: PortMapping,
    pub args: Vec<String>,
}

impl Service {
    pub(crate) fn from_def(name: &str, def: ServiceDef) -> Result<Self, ManifestError> {
        let source = match (def.build, def.image) {
            (Some(context), _) => ImageSource::Build(context),
            (None, Some(image)) => ImageSource::Image(image),
            (None, None) => {
                return Err(ManifestError::MissingImage {
                    service: name.to_string(),
                })
            }
        };
        let ports = def
            .ports
            .iter()
            .map(|raw| PortMapping::parse(name, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: ServiceName::from(name),
            source,
            command: def.command.map(|c| c.to_args()).unwrap_or_default(),
            environment: def.environment,
            ports,
            links: def.links.into_iter().map(ServiceName::from).collect(),
            sync: def.sync,
        })
    }

    /// Tag for images built from this service's context: `<app>/<service>`.
    pub fn image_tag(&self, app: &str) -> String {
        format!("{app}/{}", self.name)
    }

    /// The image reference the process container runs.
    pub fn image(&self, app: &str) -> String {
        match &self.source {
            ImageSource::Build(_) => self.image_tag(app),
            ImageSource::Image(image) => image.clone(),
        }
    }

    /// Container name for the service's main process.
    pub fn container_name(&self, app: &str) -> String {
        format!("{app}-{}", self.name)
    }

    /// Engine `run` arguments for the service's main process.
    pub fn process(&self, app: &str) -> ProcessSpec {
        let name = self.container_name(app);
        let mut args = vec![
            "-i".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.clone(),
        ];
        for (key, value) in &self.environment {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for port in &self.ports {
            args.push("--expose".to_string());
            args.push(port.container.to_string());
        }
        args.push(self.image(app));
        args.extend(self.command.iter().cloned());

        ProcessSpec {
            name,
            service: self.name.clone(),
            args,
        }
    }

    /// One proxy per declared port, forwarding `host` to the process container.
    pub fn proxies(&self, app: &str, proxy_image: &str) -> Vec<ProxySpec> {
        let target = self.container_name(app);
        self.ports
            .iter()
            .map(|port| {
                let name = format!("{target}-proxy-{}", port.host);
                let args = vec![
                    "-i".to_string(),
                    "--rm".to_string(),
                    "--name".to_string(),
                    name.clone(),
                    "--link".to_string(),
                    format!("{target}:host"),
                    "-p".to_string(),
                    format!("{}:{}", port.host, port.host),
                    proxy_image.to_string(),
                    port.host.to_string(),
                    "host".to_string(),
                    port.container.to_string(),
                ];
                ProxySpec {
                    name,
                    service: self.name.clone(),
                    port: *port,
                    args,
                }
            })
            .collect()
    }

    /// Declared `(local, remote)` sync requests, ordered by local path.
    pub fn sync_paths(&self) -> Vec<(String, String)> {
        self.sync
            .iter()
            .map(|(local, remote)| (local.clone(), remote.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn web() -> Service {
        let def = ServiceDef {
            image: Some("node:20".to_string()),
            command: Some(CommandDef::Shell("npm start".to_string())),
            environment: [("PORT".to_string(), "3000".to_string())].into(),
            ports: vec!["80:3000".to_string()],
            ..Default::default()
        };
        Service::from_def("web", def).expect("valid service")
    }

    #[test]
    fn newtype_display() {
        assert_eq!(ServiceName::from("web").to_string(), "web");
    }

    #[test]
    fn port_mapping_parses_pairs_and_bare_ports() {
        assert_eq!(
            PortMapping::parse("web", "80:3000").expect("pair"),
            PortMapping { host: 80, container: 3000 }
        );
        assert_eq!(
            PortMapping::parse("web", "5432").expect("bare"),
            PortMapping { host: 5432, container: 5432 }
        );
        assert!(PortMapping::parse("web", "http:80").is_err());
        assert!(PortMapping::parse("web", "0:80").is_err());
    }

    #[test]
    fn process_args_carry_name_env_and_command() {
        let spec = web().process("shop");
        assert_eq!(spec.name, "shop-web");
        assert_eq!(
            spec.args,
            vec![
                "-i", "--rm", "--name", "shop-web", "-e", "PORT=3000", "--expose", "3000",
                "node:20", "sh", "-c", "npm start",
            ]
        );
    }

    #[test]
    fn proxies_forward_host_port_to_process() {
        let proxies = web().proxies("shop", "harbor/proxy");
        assert_eq!(proxies.len(), 1);
        let proxy = &proxies[0];
        assert_eq!(proxy.name, "shop-web-proxy-80");
        assert!(proxy.args.contains(&"shop-web:host".to_string()));
        assert!(proxy.args.contains(&"80:80".to_string()));
        assert_eq!(proxy.args.last().map(String::as_str), Some("3000"));
    }

    #[test]
    fn built_services_run_their_own_tag() {
        let def = ServiceDef {
            build: Some(PathBuf::from(".")),
            ..Default::default()
        };
        let service = Service::from_def("worker", def).expect("valid");
        assert_eq!(service.image("shop"), "shop/worker");
    }

    #[test]
    fn service_without_image_or_build_is_rejected() {
        let err = Service::from_def("broken", ServiceDef::default()).unwrap_err();
        assert!(matches!(err, ManifestError::MissingImage { .. }), "got: {err}");
    }
}
