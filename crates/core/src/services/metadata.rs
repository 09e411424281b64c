//! Crate detection from paths the compiler left in the binary.
//!
//! Panic locations embed the source path of every crate that can panic, e.g.
//! `/home/u/.cargo/registry/src/index.crates.io-6f17d22bba15001f/foo-1.2.3/src/lib.rs`.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

use crate::model::{CrateSet, CrateSpec};

pub static RE_REGISTRY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"registry[/\\]src[/\\][^/\\\x00]+[/\\]([A-Za-z0-9_\-]+)-(\d+\.\d+\.\d+(?:-[0-9A-Za-z.\-]+)?(?:\+[0-9A-Za-z.\-]+)?)[/\\]",
    )
    .expect("valid registry path regex")
});

/// Crates referenced by registry source paths in `data`, in order of first appearance.
pub fn detect_crates(data: &[u8]) -> CrateSet {
    let mut crates = CrateSet::new();
    for caps in RE_REGISTRY_PATH.captures_iter(data) {
        let (Some(name), Some(version)) = (caps.get(1), caps.get(2)) else { continue };
        let name = String::from_utf8_lossy(name.as_bytes());
        let version = String::from_utf8_lossy(version.as_bytes());
        if crates.insert_if_absent(CrateSpec::new(name.as_ref(), version.as_ref())) {
            debug!(krate = %name, %version, "detected crate");
        }
    }
    crates
}
