use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of sampled instructions in a part hash.
pub const DEFAULT_PART_HASH_LEN: usize = 20;

/// Default fraction of fingerprint positions that must agree to trust a match.
pub const DEFAULT_PART_HASH_TRUST: f64 = 0.6;

/// Default minimum number of instructions a function needs to be analyzed.
pub const DEFAULT_MIN_FUNC_SIZE: usize = 10;

/// Default upper bound for a single `cargo build` invocation.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("part_hash_len must be at least 1")]
    ZeroPartHashLen,
    #[error("part_hash_trust must be within [0, 1], got {0}")]
    TrustOutOfRange(f64),
    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("Failed to parse config {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Tunables for one recovery session.
///
/// Read-only once a session starts. Can be loaded from a JSON file; every field
/// is optional there and falls back to the defaults above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of a part hash (fingerprint), in sampled instructions.
    pub part_hash_len: usize,
    /// Minimum ratio of matching fingerprint positions to keep a candidate.
    pub part_hash_trust: f64,
    /// Functions with fewer instructions than this are ignored on both sides.
    pub min_func_size: usize,
    /// Timeout for each build invocation; `None` waits forever.
    pub build_timeout_secs: Option<u64>,
    /// Directory where the scratch session directory is created (defaults to cwd).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            part_hash_len: DEFAULT_PART_HASH_LEN,
            part_hash_trust: DEFAULT_PART_HASH_TRUST,
            min_func_size: DEFAULT_MIN_FUNC_SIZE,
            build_timeout_secs: Some(DEFAULT_BUILD_TIMEOUT_SECS),
            scratch_root: None,
        }
    }
}

impl SessionConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let body = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: SessionConfig = serde_json::from_str(&body)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.part_hash_len == 0 {
            return Err(ConfigError::ZeroPartHashLen);
        }
        if !(0.0..=1.0).contains(&self.part_hash_trust) {
            return Err(ConfigError::TrustOutOfRange(self.part_hash_trust));
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }
}
