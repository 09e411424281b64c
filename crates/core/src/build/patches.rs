//! Source patches that make a published crate build standalone.
//!
//! Every rule rewrites files under the crate root in place and is idempotent.
//! A rule whose target file does not exist does nothing.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Edition forced by [`PatchKind::Edition2021`].
pub const FORCED_EDITION: &str = "2021";

/// Known source incompatibilities and the patch that fixes each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatchKind {
    Edition2021,
    StdRedefinition,
    AddWorkspace,
}

impl PatchKind {
    pub const ALL: [PatchKind; 3] =
        [PatchKind::Edition2021, PatchKind::StdRedefinition, PatchKind::AddWorkspace];

    pub fn name(self) -> &'static str {
        match self {
            PatchKind::Edition2021 => "EDITION 2021",
            PatchKind::StdRedefinition => "STD REDEFINITION",
            PatchKind::AddWorkspace => "ADD WORKSPACE",
        }
    }

    /// Apply the patch to the crate rooted at `crate_root`.
    pub fn apply(self, crate_root: &Path) -> io::Result<()> {
        match self {
            PatchKind::Edition2021 => newer_edition_patch(crate_root),
            PatchKind::StdRedefinition => std_redefinition_patch(crate_root),
            PatchKind::AddWorkspace => add_workspace_patch(crate_root),
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiler diagnostic substrings and the patch each one calls for.
///
/// Order matters: the first trigger found in a diagnostic line wins.
pub const DIAGNOSTIC_TRIGGERS: &[(&str, PatchKind)] = &[
    ("maybe a missing crate `core`?", PatchKind::Edition2021),
    ("the name `std` is defined multiple times", PatchKind::StdRedefinition),
    ("language item required, but not found: `eh_personality`", PatchKind::StdRedefinition),
    ("current package believes it's in a workspace when it's not", PatchKind::AddWorkspace),
];

/// Return the patch triggered by a diagnostic line, if any.
pub fn patch_for_line(line: &str) -> Option<PatchKind> {
    DIAGNOSTIC_TRIGGERS.iter().find(|(trigger, _)| line.contains(trigger)).map(|(_, kind)| *kind)
}

/// Force `edition = "2021"` right after the first `[package]` header and drop
/// every other edition declaration.
pub fn normalize_edition(manifest: &str) -> String {
    let mut out = String::with_capacity(manifest.len() + 32);
    let mut package_seen = false;
    for line in manifest.lines() {
        let line = line.trim();
        if !package_seen && line.contains("[package]") {
            package_seen = true;
            out.push_str("[package]\n");
            out.push_str(&format!("edition = \"{FORCED_EDITION}\"\n"));
        } else if !line.starts_with("edition ") && !line.starts_with("edition=") {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Drop `#![no_std]` style directives and `extern crate ... as std;` aliases.
pub fn strip_std_shadowing(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if line.contains("no_std") || line.contains("as std;") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Append a `[workspace]` table unless one is already declared.
pub fn ensure_workspace(manifest: &str) -> String {
    if manifest.lines().any(|l| l.trim() == "[workspace]") {
        return manifest.to_string();
    }
    let mut out = manifest.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("[workspace]\n");
    out
}

fn rewrite_in_place(path: &Path, transform: fn(&str) -> String) -> io::Result<()> {
    if !path.is_file() {
        return Ok(());
    }
    let body = fs::read_to_string(path)?;
    let patched = transform(&body);
    if patched != body {
        fs::write(path, patched)?;
    }
    Ok(())
}

pub fn newer_edition_patch(crate_root: &Path) -> io::Result<()> {
    rewrite_in_place(&crate_root.join("Cargo.toml"), normalize_edition)
}

pub fn std_redefinition_patch(crate_root: &Path) -> io::Result<()> {
    rewrite_in_place(&crate_root.join("src").join("lib.rs"), strip_std_shadowing)
}

pub fn add_workspace_patch(crate_root: &Path) -> io::Result<()> {
    rewrite_in_place(&crate_root.join("Cargo.toml"), ensure_workspace)
}
