//! Similarity matching between target and reference fingerprints.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::model::{CrateSpec, Function, SymbolAssignment};
use crate::services::fingerprint::{Fingerprint, FingerprintEngine};

/// A fingerprinted function of a reference crate.
#[derive(Debug, Clone)]
pub struct ReferenceFunction {
    /// Registration order of the crate in the session.
    pub crate_index: usize,
    /// Order of the function within its crate's artifact.
    pub ordinal: usize,
    pub crate_name: String,
    /// Raw (mangled) symbol name.
    pub symbol: String,
    pub fingerprint: Fingerprint,
}

/// Reference fingerprints of all built crates, bucketed by length.
///
/// Only fingerprints of equal length can score above zero, so a target is only
/// ever compared against its own bucket.
#[derive(Debug, Default)]
pub struct ReferenceSet {
    buckets: HashMap<usize, Vec<ReferenceFunction>>,
    total: usize,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint and register the functions of one crate. Returns how many were added.
    pub fn add_crate(
        &mut self,
        crate_index: usize,
        krate: &CrateSpec,
        functions: &[Function],
        engine: &FingerprintEngine,
    ) -> usize {
        let mut added = 0;
        for (ordinal, function) in functions.iter().enumerate() {
            let Some(symbol) = function.name.clone() else { continue };
            let fingerprint = engine.fingerprint(function);
            if fingerprint.is_empty() {
                continue;
            }
            self.buckets.entry(fingerprint.len()).or_default().push(ReferenceFunction {
                crate_index,
                ordinal,
                crate_name: krate.name.clone(),
                symbol,
                fingerprint,
            });
            added += 1;
        }
        self.total += added;
        added
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// References whose fingerprint has the same length as `fingerprint`.
    pub fn bucket(&self, fingerprint: &Fingerprint) -> &[ReferenceFunction] {
        self.buckets.get(&fingerprint.len()).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A reference function similar enough to a target function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub target_address: u64,
    pub reference: String,
    pub crate_name: String,
    pub crate_index: usize,
    pub reference_ordinal: usize,
    pub score: f64,
    pub match_count: usize,
}

/// Strip the hash and demangle a reference symbol, then make sure it is rooted
/// at the crate it came from.
pub fn recovered_name(crate_name: &str, symbol: &str) -> String {
    let demangled = format!("{:#}", rustc_demangle::demangle(symbol));
    let ident = crate_name.replace('-', "_");
    let prefix = format!("{ident}::");
    if demangled.starts_with(&prefix) {
        demangled
    } else {
        format!("{prefix}{demangled}")
    }
}

/// Keeps candidates at or above the trust threshold and picks one winner per target.
#[derive(Debug, Clone, Copy)]
pub struct MatchResolver {
    trust: f64,
}

impl MatchResolver {
    pub fn new(trust: f64) -> Self {
        Self { trust }
    }

    pub fn trust(&self) -> f64 {
        self.trust
    }

    /// Every reference scoring at least the trust threshold against `fingerprint`.
    pub fn candidates(
        &self,
        target_address: u64,
        fingerprint: &Fingerprint,
        references: &ReferenceSet,
    ) -> Vec<MatchCandidate> {
        references
            .bucket(fingerprint)
            .iter()
            .filter_map(|reference| {
                let match_count = fingerprint.match_count(&reference.fingerprint);
                let score = fingerprint.similarity(&reference.fingerprint);
                (score >= self.trust).then(|| MatchCandidate {
                    target_address,
                    reference: reference.symbol.clone(),
                    crate_name: reference.crate_name.clone(),
                    crate_index: reference.crate_index,
                    reference_ordinal: reference.ordinal,
                    score,
                    match_count,
                })
            })
            .collect()
    }

    /// Most matching positions wins; ties go to the earliest registered crate,
    /// then to the earliest function in that crate.
    pub fn select(candidates: &[MatchCandidate]) -> Option<&MatchCandidate> {
        candidates
            .iter()
            .min_by_key(|c| (Reverse(c.match_count), c.crate_index, c.reference_ordinal))
    }

    /// Assign names to target functions.
    ///
    /// Functions whose start address is in `named` already carry a symbol and
    /// are left alone.
    pub fn resolve(
        &self,
        targets: &[Function],
        named: &BTreeSet<u64>,
        engine: &FingerprintEngine,
        references: &ReferenceSet,
    ) -> Vec<SymbolAssignment> {
        let mut assignments = Vec::new();
        for function in targets {
            if named.contains(&function.start_address) {
                continue;
            }
            let fingerprint = engine.fingerprint(function);
            let candidates = self.candidates(function.start_address, &fingerprint, references);
            let Some(best) = Self::select(&candidates) else { continue };
            let name = recovered_name(&best.crate_name, &best.reference);
            debug!(
                address = %format!("0x{:X}", function.start_address),
                name = %name,
                score = best.score,
                candidates = candidates.len(),
                "matched function"
            );
            assignments.push(SymbolAssignment {
                address_range: function.address_range(),
                recovered_name: name,
                source_crate: best.crate_name.clone(),
            });
        }
        assignments
    }
}
