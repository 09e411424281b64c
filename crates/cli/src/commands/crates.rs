use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use cerberus_core::model::{CrateSet, CrateSpec};

/// Print the crate list, one `- name: vversion` line per crate.
pub fn print_crates<W: Write>(crates: &CrateSet, out: &mut W) -> Result<()> {
    for krate in crates.iter() {
        writeln!(out, "- {}: v{}", krate.name, krate.version)?;
    }
    Ok(())
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
) -> Result<Option<String>> {
    write!(out, "{question}")?;
    out.flush()?;
    let mut line = String::new();
    let read = input.read_line(&mut line).context("Failed to read from stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Let the user add, edit or remove crates until they answer anything but `y`.
///
/// A blank version removes an existing crate; a blank version for an unknown
/// crate is ignored. End of input ends the review.
pub fn review_crates<R: BufRead, W: Write>(
    crates: &mut CrateSet,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    if crates.is_empty() {
        writeln!(out, "No crate was found in the binary")?;
    } else {
        writeln!(out, "The following crates were found:")?;
        print_crates(crates, out)?;
    }

    loop {
        let Some(answer) = prompt(input, out, "Add/Edit/Remove crate ? (y/N): ")? else { break };
        if !answer.to_lowercase().starts_with('y') {
            break;
        }
        let Some(name) = prompt(input, out, "Crate name: ")? else { break };
        let Some(version) = prompt(input, out, "Crate version (blank to remove): ")? else {
            break;
        };

        if name.is_empty() {
            writeln!(out, "Crate name cannot be empty")?;
        } else if version.is_empty() {
            if crates.remove(&name).is_none() {
                writeln!(out, "No crate named {name}; nothing removed")?;
            }
        } else {
            crates.upsert(CrateSpec::new(name, version));
        }

        writeln!(out, "Current crates list:")?;
        print_crates(crates, out)?;
    }
    Ok(())
}
