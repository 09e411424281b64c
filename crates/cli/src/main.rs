use std::path::PathBuf;
use std::process::ExitCode;

use cerberus::commands::{recover_command, RecoverOptions};
use cerberus::{exit_code_for, logging, normalize_args, parse_crate_arg};
use cerberus_core::model::CrateSpec;
use clap::{CommandFactory, Parser};
use tracing::error;

/// Recover function names in stripped Rust ELF binaries.
///
/// Every declared crate is downloaded and compiled as a reference library; the
/// functions of the binary are matched against it by partial fingerprints and
/// the recovered names are written into a copy of the binary.
///
/// Long options may be written with a single dash (`-output out.elf`).
#[derive(Parser, Debug)]
#[command(
    name = "cerberus",
    version,
    about = "Recover function names in stripped Rust ELF binaries",
    long_about = None
)]
struct Cli {
    /// Stripped ELF binary to analyze.
    binary: Option<PathBuf>,

    /// Path of the resulting ELF file. Defaults to `<binary>-patched`.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of instructions sampled into a part hash (default 20).
    #[arg(long = "part_hash_len", value_name = "INT")]
    part_hash_len: Option<usize>,

    /// Minimum ratio of matching part hash positions to keep a match (default 0.6).
    #[arg(long = "part_hash_trust", value_name = "FLOAT")]
    part_hash_trust: Option<f64>,

    /// Minimum number of instructions a function needs to be analyzed (default 10).
    #[arg(long = "min_func_size", value_name = "INT")]
    min_func_size: Option<usize>,

    /// Timeout in seconds for each crate build (default 900).
    #[arg(long = "build_timeout", value_name = "SECS")]
    build_timeout: Option<u64>,

    /// Declare a crate linked into the binary. Repeatable; overrides detected versions.
    #[arg(long = "crate", value_name = "NAME@VERSION", value_parser = parse_crate_arg)]
    crates: Vec<CrateSpec>,

    /// JSON session configuration; command-line values take precedence.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write a JSON report of the session.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Skip the interactive crate review.
    #[arg(long = "no-prompt", alias = "no_prompt", default_value_t = false)]
    no_prompt: bool,

    /// Enable debug level logging.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    logging::init_tracing(cli.debug);

    let Some(binary) = cli.binary else {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    };

    let opts = RecoverOptions {
        binary,
        output: cli.output,
        config: cli.config,
        part_hash_len: cli.part_hash_len,
        part_hash_trust: cli.part_hash_trust,
        min_func_size: cli.min_func_size,
        build_timeout: cli.build_timeout,
        crates: cli.crates,
        no_prompt: cli.no_prompt,
        report: cli.report,
    };

    match recover_command(&opts) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
