//! Manifest loading and run-order resolution.
//!
//! # Storage layout
//!
//! ```text
//! <run dir>/
//!   harbor.yml        (default manifest file name)
//! ```
//!
//! # API pattern
//!
//! - `load_at(dir, file)`: explicit directory; used in tests with `TempDir`
//! - `from_yaml_str(yaml)`: no I/O; used by unit tests and fixtures

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::ManifestError;
use crate::types::{ManifestDef, Service, ServiceName};

/// Default manifest file name inside the run directory.
pub const DEFAULT_MANIFEST: &str = "harbor.yml";

/// A validated manifest: every service resolved, every link known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    services: BTreeMap<ServiceName, Service>,
}

impl Manifest {
    /// Load `<dir>/<file>`.
    ///
    /// Returns `ManifestError::Io` if unreadable and
    /// `ManifestError::Parse` (with path + line context) if malformed YAML.
    pub fn load_at(dir: &Path, file: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(file);
        let contents = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let def: ManifestDef = serde_yaml::from_str(&contents)
            .map_err(|source| ManifestError::Parse { path, source })?;
        Self::from_def(def)
    }

    /// Parse a manifest from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ManifestError> {
        let def: ManifestDef =
            serde_yaml::from_str(yaml).map_err(|source| ManifestError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Self::from_def(def)
    }

    fn from_def(def: ManifestDef) -> Result<Self, ManifestError> {
        if def.services.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut services = BTreeMap::new();
        for (name, service_def) in def.services {
            let service = Service::from_def(&name, service_def)?;
            services.insert(service.name.clone(), service);
        }

        for service in services.values() {
            if let Some(link) = service.links.iter().find(|l| !services.contains_key(*l)) {
                return Err(ManifestError::UnknownLink {
                    service: service.name.0.clone(),
                    link: link.0.clone(),
                });
            }
        }

        let manifest = Self { services };
        // Reject cycles at load time so `run_order` on a loaded manifest is total.
        manifest.run_order()?;
        Ok(manifest)
    }

    /// Services in dependency order: each service comes after everything it
    /// links to. Among services whose links are all satisfied, names sort
    /// alphabetically so the order is deterministic.
    pub fn run_order(&self) -> Result<Vec<&Service>, ManifestError> {
        let mut pending: BTreeMap<&ServiceName, BTreeSet<&ServiceName>> = self
            .services
            .values()
            .map(|s| (&s.name, s.links.iter().collect()))
            .collect();

        let mut order = Vec::with_capacity(self.services.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name);

            let Some(next) = next else {
                return Err(ManifestError::Cycle {
                    services: pending.keys().map(|n| n.0.clone()).collect(),
                });
            };

            pending.remove(next);
            for deps in pending.values_mut() {
                deps.remove(next);
            }
            if let Some(service) = self.services.get(next) {
                order.push(service);
            }
        }
        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[&Service]) -> Vec<String> {
        order.iter().map(|s| s.name.0.clone()).collect()
    }

    #[test]
    fn run_order_puts_links_first() {
        let manifest = Manifest::from_yaml_str(
            r#"
services:
  web:
    image: nginx
    links: [api]
  api:
    image: node
    links: [db]
  db:
    image: postgres
"#,
        )
        .expect("manifest");
        let order = manifest.run_order().expect("order");
        assert_eq!(names(&order), vec!["db", "api", "web"]);
    }

    #[test]
    fn independent_services_sort_by_name() {
        let manifest = Manifest::from_yaml_str(
            "services:\n  worker: {image: busybox}\n  web: {image: nginx}\n",
        )
        .expect("manifest");
        assert_eq!(names(&manifest.run_order().expect("order")), vec!["web", "worker"]);
    }

    #[test]
    fn cycles_are_rejected_on_load() {
        let err = Manifest::from_yaml_str(
            "services:\n  a: {image: x, links: [b]}\n  b: {image: x, links: [a]}\n",
        )
        .unwrap_err();
        match err {
            ManifestError::Cycle { services } => assert_eq!(services, vec!["a", "b"]),
            other => panic!("expected cycle, got: {other}"),
        }
    }

    #[test]
    fn unknown_links_are_rejected() {
        let err = Manifest::from_yaml_str("services:\n  web: {image: x, links: [db]}\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownLink { .. }), "got: {err}");
    }

    #[test]
    fn empty_manifest_is_rejected() {
        let err = Manifest::from_yaml_str("services: {}\n").unwrap_err();
        assert!(matches!(err, ManifestError::Empty));
    }
}
