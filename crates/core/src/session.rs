//! One recovery session: acquire and build every declared crate, match the
//! target against the results, write the patched binary.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::acquire::{stage_crate, CrateRegistry};
use crate::build::{BuildFixer, Compiler, PatchKind};
use crate::config::{ConfigError, SessionConfig};
use crate::model::{Arch, CrateSet, CrateSpec, SymbolAssignment};
use crate::services::{
    patch_file, BoundarySource, ExtractError, FingerprintEngine, FunctionExtractor, MatchResolver,
    PatcherError, ReferenceSet,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no crate was declared")]
    NoCrates,
    #[error("failed to read target {path}: {source}")]
    ReadTarget { path: PathBuf, source: std::io::Error },
    #[error("failed to analyze target: {0}")]
    Target(#[source] ExtractError),
    #[error("failed to create session directory in {path}: {source}")]
    Scratch { path: PathBuf, source: std::io::Error },
    #[error("none of the declared crates could be built")]
    NothingBuilt,
    #[error(transparent)]
    Patch(#[from] PatcherError),
}

/// What happened to one declared crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrateStatus {
    Built { iterations: usize, patches: Vec<PatchKind>, functions: usize },
    AcquireFailed { error: String },
    BuildFailed { error: String },
    ExtractFailed { error: String },
    ArchMismatch { found: Arch },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrateOutcome {
    #[serde(rename = "crate")]
    pub krate: CrateSpec,
    #[serde(flatten)]
    pub status: CrateStatus,
}

impl CrateOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self.status, CrateStatus::Built { .. })
    }
}

/// Everything a finished session did, serialisable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub binary: PathBuf,
    pub output: PathBuf,
    pub input_sha256: String,
    pub started_at: String,
    pub finished_at: String,
    pub arch: Arch,
    pub boundary_source: BoundarySource,
    pub config: SessionConfig,
    pub target_functions: usize,
    pub reference_functions: usize,
    pub crates: Vec<CrateOutcome>,
    pub assignments: Vec<SymbolAssignment>,
    pub skipped_symbols: usize,
}

/// Runs the recovery pipeline with pluggable crate source and compiler.
pub struct Session<'a> {
    config: SessionConfig,
    registry: &'a dyn CrateRegistry,
    compiler: &'a dyn Compiler,
}

impl<'a> Session<'a> {
    pub fn new(
        config: SessionConfig,
        registry: &'a dyn CrateRegistry,
        compiler: &'a dyn Compiler,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self { config, registry, compiler })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn scratch_dir(&self) -> Result<TempDir, SessionError> {
        let root = match &self.config.scratch_root {
            Some(root) => root.clone(),
            None => std::env::current_dir()
                .map_err(|source| SessionError::Scratch { path: PathBuf::from("."), source })?,
        };
        tempfile::Builder::new()
            .prefix(".cerberus-")
            .tempdir_in(&root)
            .map_err(|source| SessionError::Scratch { path: root, source })
    }

    /// Recover symbols of `binary` from `crates` and write the result to `output`.
    ///
    /// The scratch directory is removed when this returns, on every path.
    pub fn run(
        &self,
        binary: &Path,
        crates: &CrateSet,
        output: &Path,
    ) -> Result<SessionReport, SessionError> {
        let started_at = Utc::now().to_rfc3339();
        if crates.is_empty() {
            error!("no crate was declared; nothing to do");
            return Err(SessionError::NoCrates);
        }

        let bytes = fs::read(binary).map_err(|source| {
            error!(binary = %binary.display(), error = %source, "cannot read target");
            SessionError::ReadTarget { path: binary.to_path_buf(), source }
        })?;
        let input_sha256 = format!("{:x}", Sha256::digest(&bytes));

        let extractor = FunctionExtractor::new(self.config.min_func_size);
        let target = extractor.extract_target(&bytes).map_err(|e| {
            error!(binary = %binary.display(), error = %e, "cannot analyze target");
            SessionError::Target(e)
        })?;
        info!(
            arch = %target.arch,
            functions = target.functions.len(),
            source = ?target.boundary_source,
            "target analyzed"
        );

        let scratch = self.scratch_dir()?;
        debug!(dir = %scratch.path().display(), "session directory created");

        let engine = FingerprintEngine::new(self.config.part_hash_len);
        let mut references = ReferenceSet::new();
        let mut outcomes = Vec::with_capacity(crates.len());
        for (crate_index, krate) in crates.iter().enumerate() {
            let status = self.reference_crate(
                crate_index,
                krate,
                target.arch,
                scratch.path(),
                &engine,
                &mut references,
            );
            outcomes.push(CrateOutcome { krate: krate.clone(), status });
        }

        if !outcomes.iter().any(CrateOutcome::is_built) {
            error!("no crate could be built; aborting");
            return Err(SessionError::NothingBuilt);
        }

        let resolver = MatchResolver::new(self.config.part_hash_trust);
        let assignments =
            resolver.resolve(&target.functions, &target.named_addresses, &engine, &references);
        info!(
            recovered = assignments.len(),
            target_functions = target.functions.len(),
            "matching finished"
        );

        let summary = patch_file(binary, output, &assignments).map_err(|e| {
            error!(output = %output.display(), error = %e, "cannot write patched binary");
            SessionError::from(e)
        })?;

        Ok(SessionReport {
            binary: binary.to_path_buf(),
            output: output.to_path_buf(),
            input_sha256,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            arch: target.arch,
            boundary_source: target.boundary_source,
            config: self.config.clone(),
            target_functions: target.functions.len(),
            reference_functions: references.len(),
            crates: outcomes,
            assignments,
            skipped_symbols: summary.skipped,
        })
    }

    /// Acquire, build and fingerprint one crate. Failures are logged and
    /// reported in the returned status; they never abort the session.
    fn reference_crate(
        &self,
        crate_index: usize,
        krate: &CrateSpec,
        arch: Arch,
        scratch: &Path,
        engine: &FingerprintEngine,
        references: &mut ReferenceSet,
    ) -> CrateStatus {
        info!(krate = %krate, "downloading crate");
        let root = match stage_crate(self.registry, krate, scratch) {
            Ok(root) => root,
            Err(e) => {
                warn!(krate = %krate, error = %e, "could not download crate; skipping");
                return CrateStatus::AcquireFailed { error: e.to_string() };
            }
        };

        info!(krate = %krate, "building crate");
        let mut fixer = BuildFixer::new(&root, &krate.name, arch, self.compiler);
        let built = match fixer.run() {
            Ok(built) => built,
            Err(e) => {
                error!(krate = %krate, error = %e, "could not build crate; skipping");
                return CrateStatus::BuildFailed { error: e.to_string() };
            }
        };

        let extractor = FunctionExtractor::new(self.config.min_func_size);
        let (found, functions) = match extractor.extract_reference_file(&built.artifact) {
            Ok(res) => res,
            Err(e) => {
                warn!(krate = %krate, error = %e, "could not read built library; skipping");
                return CrateStatus::ExtractFailed { error: e.to_string() };
            }
        };
        if found != arch {
            warn!(
                krate = %krate,
                expected = %arch,
                %found,
                "library built for another architecture"
            );
            return CrateStatus::ArchMismatch { found };
        }

        let added = references.add_crate(crate_index, krate, &functions, engine);
        info!(krate = %krate, functions = added, outcome = "success", "reference functions ready");
        CrateStatus::Built {
            iterations: built.iterations,
            patches: built.applied_patches.iter().map(|r| r.patch).collect(),
            functions: added,
        }
    }
}
