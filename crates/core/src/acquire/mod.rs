//! Crate acquisition: turn a `(name, version)` pair into a source tree on disk.
//!
//! The default registry shells out to `cargo vendor`, which downloads the exact
//! version from the configured registry without building anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::build::cargo::resolve_cargo_path;
use crate::model::CrateSpec;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: std::io::Error },
    #[error("registry refused {krate}: {message}")]
    Registry { krate: String, message: String },
    #[error("fetched source for {krate} has no Cargo.toml at {path}")]
    MissingManifest { krate: String, path: PathBuf },
    #[error("I/O error while staging crate: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of crate source trees.
pub trait CrateRegistry {
    /// Fetch `spec` somewhere below `dest` and return the crate root.
    fn fetch(&self, spec: &CrateSpec, dest: &Path) -> Result<PathBuf, AcquireError>;

    fn name(&self) -> &'static str;
}

/// Fetch crates through `cargo vendor --versioned-dirs`.
#[derive(Debug, Clone)]
pub struct CargoVendorRegistry {
    pub cargo: PathBuf,
}

impl Default for CargoVendorRegistry {
    fn default() -> Self {
        Self { cargo: resolve_cargo_path() }
    }
}

/// Manifest for a throwaway package whose only purpose is to pin `spec`.
fn staging_manifest(spec: &CrateSpec) -> String {
    format!(
        "[package]\n\
         name = \"cerberus-fetch-stage\"\n\
         version = \"0.0.0\"\n\
         edition = \"2021\"\n\
         publish = false\n\
         \n\
         [lib]\n\
         path = \"lib.rs\"\n\
         \n\
         [dependencies]\n\
         {} = \"={}\"\n\
         \n\
         [workspace]\n",
        spec.name, spec.version
    )
}

impl CrateRegistry for CargoVendorRegistry {
    fn fetch(&self, spec: &CrateSpec, dest: &Path) -> Result<PathBuf, AcquireError> {
        let stage = dest.join("fetch");
        fs::create_dir_all(&stage)?;
        fs::write(stage.join("Cargo.toml"), staging_manifest(spec))?;
        fs::write(stage.join("lib.rs"), "")?;

        let vendor_dir = stage.join("vendor");
        let output = Command::new(&self.cargo)
            .arg("vendor")
            .arg("--versioned-dirs")
            .arg("--manifest-path")
            .arg(stage.join("Cargo.toml"))
            .arg(&vendor_dir)
            .current_dir(&stage)
            .output()
            .map_err(|source| AcquireError::Spawn {
                program: self.cargo.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .find(|l| l.trim_start().starts_with("error"))
                .unwrap_or("cargo vendor failed")
                .trim()
                .to_string();
            debug!(krate = %spec, "cargo vendor output:\n{stderr}");
            return Err(AcquireError::Registry { krate: spec.to_string(), message });
        }

        Ok(vendor_dir.join(spec.dir_name()))
    }

    fn name(&self) -> &'static str {
        "cargo-vendor"
    }
}

/// Stage `spec` in its own directory under `scratch` and return the crate root.
///
/// Each crate gets a private subdirectory so manifests and lock files of
/// different crates never collide.
pub fn stage_crate(
    registry: &dyn CrateRegistry,
    spec: &CrateSpec,
    scratch: &Path,
) -> Result<PathBuf, AcquireError> {
    let dest = scratch.join(spec.dir_name());
    fs::create_dir_all(&dest)?;
    debug!(krate = %spec, registry = registry.name(), dest = %dest.display(), "fetching crate");
    let root = registry.fetch(spec, &dest)?;
    let manifest = root.join("Cargo.toml");
    if !manifest.is_file() {
        return Err(AcquireError::MissingManifest { krate: spec.to_string(), path: manifest });
    }
    Ok(root)
}
