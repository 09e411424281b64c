//! Binary-facing services: decoding, fingerprinting, matching and writing symbols.

pub mod disasm;
pub mod extractor;
pub mod fingerprint;
pub mod matcher;
pub mod metadata;
pub mod patcher;

pub use disasm::{DisasmError, Disassembler};
pub use extractor::{BoundarySource, ExtractError, FunctionExtractor, TargetBinary};
pub use fingerprint::{Fingerprint, FingerprintEngine};
pub use matcher::{MatchCandidate, MatchResolver, ReferenceSet};
pub use metadata::detect_crates;
pub use patcher::{patch_bytes, patch_file, PatchSummary, PatcherError};
