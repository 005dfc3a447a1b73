//! Arguments shared by every command that operates on a run directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use harbor_core::{config, HarborConfig, Manifest, DEFAULT_MANIFEST};
use harbor_run::RunOptions;

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Run directory; build contexts and sync paths resolve against it.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Application name used to prefix containers and images.
    /// Defaults to the run directory's name.
    #[arg(long)]
    pub app: Option<String>,

    /// Manifest file, relative to the run directory.
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    pub file: PathBuf,
}

/// Everything a command needs once arguments are resolved.
#[derive(Debug)]
pub struct Target {
    pub options: RunOptions,
    pub manifest: Manifest,
    pub config: HarborConfig,
}

impl TargetArgs {
    pub fn load(&self) -> Result<Target> {
        let dir = std::fs::canonicalize(&self.dir)
            .with_context(|| format!("run directory '{}' not found", self.dir.display()))?;
        let manifest = Manifest::load_at(&dir, &self.file)
            .with_context(|| format!("failed to load manifest '{}'", self.file.display()))?;
        let config = config::load().context("failed to load ~/.harbor/config.yaml")?;

        let app = match &self.app {
            Some(app) => app.clone(),
            None => default_app_name(&dir),
        };
        Ok(Target {
            options: RunOptions { app, dir },
            manifest,
            config,
        })
    }
}

/// Lower-cased directory name with anything outside `[a-z0-9_.-]` mapped to
/// `-`, so it is usable in container names and image tags.
fn default_app_name(dir: &std::path::Path) -> String {
    let raw = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '-',
        })
        .collect();
    let name = name.trim_matches(|c| c == '-' || c == '.' || c == '_');
    if name.is_empty() {
        "harbor".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn app_name_is_sanitized_directory_name() {
        assert_eq!(default_app_name(Path::new("/work/My Shop")), "my-shop");
        assert_eq!(default_app_name(Path::new("/work/api_v2")), "api_v2");
    }

    #[test]
    fn app_name_falls_back_for_root() {
        assert_eq!(default_app_name(Path::new("/")), "harbor");
    }
}
