use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use super::patches::{patch_for_line, PatchKind};
use super::{BuildOutput, Compiler, InvocationError};
use crate::model::Arch;

/// When a patch was applied during one build session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub patch: PatchKind,
    pub applied_at_iteration: usize,
}

/// Why a build session gave up.
#[derive(Debug, Error)]
pub enum BuildFailure {
    #[error("build invocation failed: {0}")]
    Invocation(#[from] InvocationError),
    #[error("no known patch for build failure at iteration {iteration}")]
    Unpatchable { iteration: usize, diagnostics: Vec<String> },
    #[error(
        "repair cycle: patch {patch} applied at iteration {first_applied} is needed again at iteration {iteration}"
    )]
    RepairCycle { patch: PatchKind, first_applied: usize, iteration: usize },
    #[error("failed to apply patch {patch}: {source}")]
    Patch { patch: PatchKind, source: std::io::Error },
    #[error("build succeeded but no library artifact was found under {0}")]
    MissingArtifact(PathBuf),
}

/// A build session that ended with a compiled library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSuccess {
    pub artifact: PathBuf,
    /// Number of rebuilds after the first attempt.
    pub iterations: usize,
    pub applied_patches: Vec<PatchRecord>,
}

/// Build / diagnose / patch loop for one crate.
///
/// The loop only ends in success or a fatal error. It terminates because a
/// patch can be applied once per session: seeing the same diagnosis again at a
/// later iteration is a repair cycle.
pub struct BuildFixer<'a> {
    crate_root: PathBuf,
    crate_name: String,
    arch: Arch,
    compiler: &'a dyn Compiler,
    applied: BTreeMap<PatchKind, PatchRecord>,
}

impl<'a> BuildFixer<'a> {
    pub fn new(
        crate_root: impl Into<PathBuf>,
        crate_name: impl Into<String>,
        arch: Arch,
        compiler: &'a dyn Compiler,
    ) -> Self {
        Self {
            crate_root: crate_root.into(),
            crate_name: crate_name.into(),
            arch,
            compiler,
            applied: BTreeMap::new(),
        }
    }

    pub fn crate_root(&self) -> &Path {
        &self.crate_root
    }

    /// Patches applied so far, in application order.
    pub fn applied_patches(&self) -> Vec<PatchRecord> {
        let mut records: Vec<PatchRecord> = self.applied.values().copied().collect();
        records.sort_by_key(|r| r.applied_at_iteration);
        records
    }

    /// Build the crate, repairing it until it compiles or no patch helps.
    pub fn run(&mut self) -> Result<BuildSuccess, BuildFailure> {
        let mut iteration = 0;
        let mut output = self.invoke()?;
        loop {
            if output.succeeded() {
                return self.finish(iteration);
            }
            error!(krate = %self.crate_name, iteration, "build failed");
            debug!(krate = %self.crate_name, "build trace:\n{}", output.stderr.join("\n"));

            let patch = self.diagnose(&output, iteration)?;
            info!(krate = %self.crate_name, %patch, "applying patch");
            patch.apply(&self.crate_root).map_err(|source| BuildFailure::Patch { patch, source })?;
            self.applied.insert(patch, PatchRecord { patch, applied_at_iteration: iteration });

            info!(krate = %self.crate_name, "building crate again");
            output = self.invoke()?;
            iteration += 1;
        }
    }

    fn invoke(&self) -> Result<BuildOutput, BuildFailure> {
        self.compiler.build(&self.crate_root, self.arch).map_err(|e| {
            error!(krate = %self.crate_name, error = %e, "build invocation failed");
            BuildFailure::from(e)
        })
    }

    /// Inspect diagnostics and pick the next patch.
    ///
    /// The first line matching a known trigger decides the pass; multiple
    /// errors are not batched.
    fn diagnose(&self, output: &BuildOutput, iteration: usize) -> Result<PatchKind, BuildFailure> {
        let Some(patch) = output.stderr.iter().find_map(|line| patch_for_line(line)) else {
            error!(krate = %self.crate_name, iteration, "no patch was found");
            return Err(BuildFailure::Unpatchable { iteration, diagnostics: output.stderr.clone() });
        };

        match self.applied.get(&patch) {
            None => Ok(patch),
            Some(record) if record.applied_at_iteration != iteration => {
                error!(
                    krate = %self.crate_name,
                    %patch,
                    first_applied = record.applied_at_iteration,
                    iteration,
                    "patch recursion detected"
                );
                Err(BuildFailure::RepairCycle {
                    patch,
                    first_applied: record.applied_at_iteration,
                    iteration,
                })
            }
            Some(_) => {
                error!(krate = %self.crate_name, iteration, "no new patch was found");
                Err(BuildFailure::Unpatchable { iteration, diagnostics: output.stderr.clone() })
            }
        }
    }

    fn finish(&self, iterations: usize) -> Result<BuildSuccess, BuildFailure> {
        let artifact = self
            .compiler
            .artifact(&self.crate_root, &self.crate_name, self.arch)
            .ok_or_else(|| BuildFailure::MissingArtifact(self.crate_root.join("target")))?;
        info!(
            krate = %self.crate_name,
            iterations,
            artifact = %artifact.display(),
            outcome = "success",
            "crate built"
        );
        Ok(BuildSuccess { artifact, iterations, applied_patches: self.applied_patches() })
    }
}
