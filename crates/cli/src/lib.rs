use std::ffi::OsString;
use std::path::{Path, PathBuf};

use cerberus_core::config::ConfigError;
use cerberus_core::model::CrateSpec;
use cerberus_core::session::SessionError;

pub mod commands;
pub mod logging;

/// Exit status for a failed build, patch or session.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status for invalid arguments or configuration.
pub const EXIT_USAGE: u8 = 2;

/// Rewrite single-dash long options (`-output`) to their `--` form.
///
/// Short flags (`-h`), negative numbers and everything after a bare `--` are
/// left untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for arg in args {
        if passthrough {
            out.push(arg);
            continue;
        }
        let rewritten = match arg.to_str() {
            Some("--") => {
                passthrough = true;
                None
            }
            Some(s) if is_single_dash_long(s) => Some(OsString::from(format!("-{s}"))),
            _ => None,
        };
        out.push(rewritten.unwrap_or(arg));
    }
    out
}

fn is_single_dash_long(arg: &str) -> bool {
    let Some(rest) = arg.strip_prefix('-') else { return false };
    !rest.starts_with('-')
        && rest.len() > 1
        && rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// `<binary>-patched`, next to the input.
pub fn default_output_path(binary: &Path) -> PathBuf {
    let mut name = binary.as_os_str().to_owned();
    name.push("-patched");
    PathBuf::from(name)
}

/// Parse `name@version` (the version may carry a leading `v`).
pub fn parse_crate_arg(raw: &str) -> Result<CrateSpec, String> {
    let (name, version) = raw
        .split_once('@')
        .ok_or_else(|| format!("expected NAME@VERSION, got '{raw}'"))?;
    let spec = CrateSpec::new(name, version);
    if spec.name.is_empty() || spec.version.is_empty() {
        return Err(format!("expected NAME@VERSION, got '{raw}'"));
    }
    Ok(spec)
}

/// Map an error chain to the process exit status.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    let invalid_config = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || matches!(cause.downcast_ref::<SessionError>(), Some(SessionError::Config(_)))
    });
    if invalid_config {
        EXIT_USAGE
    } else {
        EXIT_FAILURE
    }
}
