use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cerberus_core::acquire::CargoVendorRegistry;
use cerberus_core::build::CargoCompiler;
use cerberus_core::config::SessionConfig;
use cerberus_core::model::{CrateSet, CrateSpec};
use cerberus_core::services::detect_crates;
use cerberus_core::session::{Session, SessionReport};
use tracing::{info, warn};

use super::crates::review_crates;
use crate::default_output_path;

/// Options of one `cerberus <binary>` run, after argument parsing.
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    pub binary: PathBuf,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub part_hash_len: Option<usize>,
    pub part_hash_trust: Option<f64>,
    pub min_func_size: Option<usize>,
    pub build_timeout: Option<u64>,
    pub crates: Vec<CrateSpec>,
    pub no_prompt: bool,
    pub report: Option<PathBuf>,
}

/// Load the config file, if any, and apply command-line overrides on top.
pub fn resolve_config(opts: &RecoverOptions) -> Result<SessionConfig> {
    let mut config = match &opts.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(len) = opts.part_hash_len {
        config.part_hash_len = len;
    }
    if let Some(trust) = opts.part_hash_trust {
        config.part_hash_trust = trust;
    }
    if let Some(size) = opts.min_func_size {
        config.min_func_size = size;
    }
    if let Some(secs) = opts.build_timeout {
        config.build_timeout_secs = Some(secs);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Crates found in the binary, overridden by the ones given on the command line.
pub fn initial_crates(binary_bytes: &[u8], cli_crates: &[CrateSpec]) -> CrateSet {
    let mut crates = detect_crates(binary_bytes);
    for spec in cli_crates {
        crates.upsert(spec.clone());
    }
    crates
}

/// Run a full recovery session for `opts.binary`.
pub fn recover_command(opts: &RecoverOptions) -> Result<SessionReport> {
    let config = resolve_config(opts)?;

    if !opts.binary.is_file() {
        return Err(anyhow!("Binary file does not exist: {}", opts.binary.display()));
    }
    let bytes = fs::read(&opts.binary)
        .with_context(|| format!("Failed to read binary: {}", opts.binary.display()))?;
    let output = opts.output.clone().unwrap_or_else(|| default_output_path(&opts.binary));

    let mut crates = initial_crates(&bytes, &opts.crates);
    drop(bytes);
    if !opts.no_prompt && io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut out = io::stdout();
        review_crates(&mut crates, &mut input, &mut out)?;
    } else if crates.is_empty() {
        warn!("no crate was found in the binary and none was given with -crate");
    }
    if crates.is_empty() {
        return Err(anyhow!("At least one crate is required (use -crate NAME@VERSION)"));
    }

    let registry = CargoVendorRegistry::default();
    let compiler = CargoCompiler::new(config.build_timeout());
    let session = Session::new(config, &registry, &compiler)?;
    let report = session
        .run(&opts.binary, &crates, &output)
        .with_context(|| format!("Symbol recovery failed for {}", opts.binary.display()))?;

    info!(
        recovered = report.assignments.len(),
        output = %output.display(),
        outcome = "success",
        "end of execution"
    );
    println!("Recovered {} function name(s)", report.assignments.len());
    println!("Result: {}", output.display());

    if let Some(path) = &opts.report {
        write_report(&report, path)?;
    }
    Ok(report)
}

pub fn write_report(report: &SessionReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}
