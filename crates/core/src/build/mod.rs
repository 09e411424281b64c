//! Reference crate builds.
//!
//! - `patches`: source rewrites for known incompatibilities.
//! - `fixer`: the build / diagnose / patch loop (`BuildFixer`).
//! - `cargo`: the `cargo build` invocation used outside of tests.

pub mod cargo;
pub mod fixer;
pub mod patches;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::Arch;

pub use cargo::{locate_artifact, CargoCompiler};
pub use fixer::{BuildFailure, BuildFixer, BuildSuccess, PatchRecord};
pub use patches::PatchKind;

/// Result of a single build attempt that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Whether the build process exited with status zero.
    pub exit_ok: bool,
    /// Standard error, split into lines.
    pub stderr: Vec<String>,
}

impl BuildOutput {
    pub fn from_stderr(exit_ok: bool, stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr);
        Self { exit_ok, stderr: text.lines().map(str::to_string).collect() }
    }

    /// Lines reporting a compiler error.
    pub fn error_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.iter().map(|l| l.trim()).filter(|l| l.starts_with("error: "))
    }

    /// A build succeeded when it exited cleanly and reported no `error:` line.
    pub fn succeeded(&self) -> bool {
        self.exit_ok && self.error_lines().next().is_none()
    }
}

/// The build could not be run at all.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: std::io::Error },
    #[error("build timed out after {0}s")]
    TimedOut(u64),
    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

/// Something that can compile a crate for a target architecture.
pub trait Compiler {
    fn build(&self, crate_root: &Path, arch: Arch) -> Result<BuildOutput, InvocationError>;

    /// Path of the library produced by a successful build.
    fn artifact(&self, crate_root: &Path, crate_name: &str, arch: Arch) -> Option<PathBuf> {
        locate_artifact(crate_root, crate_name, arch)
    }
}
