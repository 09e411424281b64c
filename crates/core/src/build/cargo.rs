use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{BuildOutput, Compiler, InvocationError};
use crate::model::Arch;

/// Environment variable overriding the cargo executable.
pub const CARGO_ENV: &str = "CERBERUS_CARGO";

/// Builds crates with `cargo build --release`.
#[derive(Debug, Clone)]
pub struct CargoCompiler {
    pub cargo: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for CargoCompiler {
    fn default() -> Self {
        Self { cargo: resolve_cargo_path(), timeout: None }
    }
}

impl CargoCompiler {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { cargo: resolve_cargo_path(), timeout }
    }

    fn command(&self, crate_root: &Path, arch: Arch) -> Command {
        let mut cmd = Command::new(&self.cargo);
        cmd.args(["build", "--release"]);
        if let Some(triple) = arch.target_triple() {
            cmd.arg(format!("--target={triple}"));
        }
        cmd.current_dir(crate_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // rustc and build scripts join this group and are killed with it.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

pub fn resolve_cargo_path() -> PathBuf {
    std::env::var_os(CARGO_ENV).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("cargo"))
}

impl Compiler for CargoCompiler {
    fn build(&self, crate_root: &Path, arch: Arch) -> Result<BuildOutput, InvocationError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(InvocationError::Runtime)?;
        let mut cmd = self.command(crate_root, arch);
        let program = self.cargo.display().to_string();
        debug!(crate_root = %crate_root.display(), %arch, "invoking cargo build");

        let output = runtime.block_on(async {
            let spawn_err = |source| InvocationError::Spawn { program: program.clone(), source };
            let child = cmd.spawn().map_err(spawn_err)?;
            let pid = child.id();
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                    Ok(res) => res.map_err(spawn_err),
                    Err(_) => {
                        if let Some(pid) = pid {
                            kill_process_group(pid);
                        }
                        Err(InvocationError::TimedOut(limit.as_secs()))
                    }
                },
                None => child.wait_with_output().await.map_err(spawn_err),
            }
        })?;

        Ok(BuildOutput::from_stderr(output.status.success(), &output.stderr))
    }
}

/// Kill every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else { return };
    // SAFETY: kill(2) takes plain integers; a negative pid addresses the whole group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let error = std::io::Error::last_os_error();
        debug!(pgid, %error, "could not kill build process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Find the rlib produced for `crate_name` under `target/[<triple>/]release`.
///
/// Prefers `lib<ident>.rlib`; falls back to the first rlib in the release
/// directory (crates whose `[lib] name` differs from the package name).
pub fn locate_artifact(crate_root: &Path, crate_name: &str, arch: Arch) -> Option<PathBuf> {
    let mut release_dir = crate_root.join("target");
    if let Some(triple) = arch.target_triple() {
        release_dir.push(triple);
    }
    release_dir.push("release");

    let expected = release_dir.join(format!("lib{}.rlib", crate_name.replace('-', "_")));
    if expected.is_file() {
        return Some(expected);
    }

    let mut rlibs: Vec<PathBuf> = fs::read_dir(&release_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("rlib"))
        .collect();
    rlibs.sort();
    rlibs.into_iter().next()
}
