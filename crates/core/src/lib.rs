//! cerberus-core
//!
//! Core library for recovering function names in stripped Rust ELF binaries.
//!
//! Declared crates are fetched and compiled as reference libraries (repairing
//! known build failures on the way), every function on both sides is reduced to
//! a partial fingerprint, and the best reference match for each target function
//! is written back into the binary's symbol table.
//!
//! All substantive logic lives here so it can be tested without a terminal or
//! network; the `cerberus` binary is a thin frontend.

pub mod acquire;
pub mod build;
pub mod config;
pub mod model;
pub mod services;
pub mod session;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
