use std::collections::BTreeSet;

use cerberus_core::model::{CrateSpec, Function, Instruction, Operand};
use cerberus_core::services::fingerprint::{Fingerprint, FingerprintEngine};
use cerberus_core::services::matcher::{
    recovered_name, MatchCandidate, MatchResolver, ReferenceSet,
};

fn candidate(crate_index: usize, ordinal: usize, match_count: usize) -> MatchCandidate {
    MatchCandidate {
        target_address: 0x1000,
        reference: format!("ref_{crate_index}_{ordinal}"),
        crate_name: format!("crate{crate_index}"),
        crate_index,
        reference_ordinal: ordinal,
        score: match_count as f64 / 20.0,
        match_count,
    }
}

/// `n` instructions; `variant` changes the mnemonic of every third instruction.
fn function(name: Option<&str>, start: u64, n: usize, variant: &str) -> Function {
    let instructions = (0..n)
        .map(|i| {
            let mnemonic = if i % 3 == 2 { variant } else { "mov" };
            Instruction::new(start + i as u64, 1, mnemonic)
                .with_operands(vec![Operand::Register, Operand::Immediate(i as i64)])
        })
        .collect();
    Function { start_address: start, size: n as u64, name: name.map(str::to_string), instructions }
}

#[test]
fn higher_match_count_wins_regardless_of_order() {
    let strong = candidate(1, 3, 20);
    let weak = candidate(0, 0, 18);
    for candidates in [vec![weak.clone(), strong.clone()], vec![strong.clone(), weak.clone()]] {
        assert_eq!(MatchResolver::select(&candidates), Some(&strong));
    }
}

#[test]
fn ties_go_to_earliest_crate_then_earliest_function() {
    let candidates = vec![candidate(2, 0, 15), candidate(1, 7, 15), candidate(1, 4, 15)];
    let best = MatchResolver::select(&candidates).unwrap();
    assert_eq!((best.crate_index, best.reference_ordinal), (1, 4));
    assert!(MatchResolver::select(&[]).is_none());
}

#[test]
fn raising_trust_never_adds_candidates() {
    let engine = FingerprintEngine::new(12);
    let krate = CrateSpec::new("foo", "1.0.0");
    let references: Vec<Function> = ["add", "sub", "xor", "mov", "lea"]
        .iter()
        .enumerate()
        .map(|(i, v)| function(Some(&format!("f{i}")), 0x100 * i as u64, 30, v))
        .collect();
    let mut set = ReferenceSet::new();
    assert_eq!(set.add_crate(0, &krate, &references, &engine), 5);

    let target = engine.fingerprint(&function(None, 0x9000, 30, "add"));
    let mut previous = usize::MAX;
    for step in 0..=10 {
        let trust = step as f64 / 10.0;
        let count = MatchResolver::new(trust).candidates(0x9000, &target, &set).len();
        assert!(count <= previous, "trust {trust} retained {count} > {previous}");
        previous = count;
    }
    assert_eq!(MatchResolver::new(1.0).candidates(0x9000, &target, &set).len(), 1);
}

#[test]
fn references_are_bucketed_by_length() {
    let engine = FingerprintEngine::new(20);
    let krate = CrateSpec::new("foo", "1.0.0");
    let references =
        vec![function(Some("short"), 0, 8, "add"), function(Some("long"), 0x100, 40, "add")];
    let mut set = ReferenceSet::new();
    set.add_crate(0, &krate, &references, &engine);
    assert_eq!(set.len(), 2);

    let short = Fingerprint::from_tokens(vec![0; 8]);
    assert_eq!(set.bucket(&short).len(), 1);
    assert_eq!(set.bucket(&short)[0].symbol, "short");
    assert!(set.bucket(&Fingerprint::from_tokens(vec![0; 9])).is_empty());
}

#[test]
fn unnamed_references_are_ignored() {
    let engine = FingerprintEngine::new(10);
    let mut set = ReferenceSet::new();
    let added =
        set.add_crate(0, &CrateSpec::new("foo", "1"), &[function(None, 0, 20, "add")], &engine);
    assert_eq!(added, 0);
    assert!(set.is_empty());
}

#[test]
fn resolve_skips_named_targets_and_prefers_first_crate() {
    let engine = FingerprintEngine::new(10);
    let mut set = ReferenceSet::new();
    let body = |name: &str| function(Some(name), 0, 25, "xor");
    let first = [body("_ZN11first_crate3run17h0123456789abcdefE")];
    let second = [body("_ZN6second3run17h0123456789abcdefE")];
    set.add_crate(0, &CrateSpec::new("first-crate", "1.0.0"), &first, &engine);
    set.add_crate(1, &CrateSpec::new("second", "2.0.0"), &second, &engine);

    let targets = vec![function(None, 0x4000, 25, "xor"), function(None, 0x5000, 25, "xor")];
    let named: BTreeSet<u64> = [0x5000].into_iter().collect();
    let assignments = MatchResolver::new(0.6).resolve(&targets, &named, &engine, &set);

    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].address_range.start, 0x4000);
    assert_eq!(assignments[0].address_range.end, 0x4000 + 25);
    assert_eq!(assignments[0].recovered_name, "first_crate::run");
    assert_eq!(assignments[0].source_crate, "first-crate");
}

#[test]
fn recovered_names_are_demangled_and_rooted_at_the_crate() {
    assert_eq!(recovered_name("foo", "_ZN3foo5alpha17h0123456789abcdefE"), "foo::alpha");
    assert_eq!(
        recovered_name("my-crate", "_ZN4core3ptr13drop_in_place17h0123456789abcdefE"),
        "my_crate::core::ptr::drop_in_place"
    );
    assert_eq!(recovered_name("foo", "plain_c_symbol"), "foo::plain_c_symbol");
}
