//! Manifest loading, error-message and config integration tests.

use std::path::Path;

use assert_fs::prelude::*;
use harbor_core::{config, ImageSource, Manifest, ManifestError, ServiceName, DEFAULT_MANIFEST};
use predicates::prelude::predicate;
use rstest::rstest;

const SHOP: &str = r#"
services:
  web:
    build: .
    command: npm start
    ports: ["80:3000"]
    links: [worker]
    sync:
      ./src: /app/src
      ./src/lib: /app/src/lib
  worker:
    image: busybox
    command: ["sleep", "infinity"]
"#;

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_reads_default_manifest_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(DEFAULT_MANIFEST).write_str(SHOP).expect("write");
    dir.child(DEFAULT_MANIFEST).assert(predicate::path::exists());

    let manifest = Manifest::load_at(dir.path(), Path::new(DEFAULT_MANIFEST)).expect("load");
    let order = manifest.run_order().expect("order");
    assert_eq!(order.len(), 2);

    let web = order[1];
    assert_eq!(web.name, ServiceName::from("web"));
    assert_eq!(web.source, ImageSource::Build(".".into()));
    assert_eq!(web.command, vec!["sh", "-c", "npm start"]);
    assert_eq!(
        web.sync_paths(),
        vec![
            ("./src".to_string(), "/app/src".to_string()),
            ("./src/lib".to_string(), "/app/src/lib".to_string()),
        ]
    );

    let names: Vec<_> = order.iter().map(|s| s.name.0.as_str()).collect();
    assert_eq!(names, vec!["worker", "web"]);
}

#[test]
fn load_missing_manifest_returns_io_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = Manifest::load_at(dir.path(), Path::new(DEFAULT_MANIFEST)).unwrap_err();
    assert!(matches!(err, ManifestError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("harbor.yml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("custom.yml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = Manifest::load_at(dir.path(), Path::new("custom.yml")).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("custom.yml"));
}

#[rstest]
#[case("services:\n  web: {}\n", "needs either `build` or `image`")]
#[case("services:\n  web: {image: x, ports: [\"abc\"]}\n", "invalid port mapping 'abc'")]
#[case("services:\n  web: {image: x, links: [db]}\n", "unknown service 'db'")]
#[case("services:\n  a: {image: x, links: [a]}\n", "cycle")]
fn invalid_manifests_report_the_offending_service(#[case] yaml: &str, #[case] needle: &str) {
    let err = Manifest::from_yaml_str(yaml).unwrap_err();
    assert!(err.to_string().contains(needle), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Config
// ---------------------------------------------------------------------------

#[test]
fn config_missing_file_yields_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg, harbor_core::HarborConfig::default());
}

#[test]
fn config_file_overrides_selected_keys() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".harbor/config.yaml")
        .write_str("docker: podman\nsync:\n  flush_interval_ms: 250\n")
        .expect("write");

    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg.docker, "podman");
    assert_eq!(cfg.sync.flush_interval_ms, 250);
    assert_eq!(cfg.sync.change_buffer, 1024);
}

#[test]
fn config_corrupt_file_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".harbor/config.yaml")
        .write_str("docker: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(err.to_string().contains("config.yaml"), "got: {err}");
}
