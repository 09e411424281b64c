use cerberus_core::model::CrateSpec;
use cerberus_core::services::metadata::detect_crates;

#[test]
fn registry_paths_yield_crates_in_first_seen_order() {
    let mut blob = b"\x00\x01junk".to_vec();
    blob.extend_from_slice(
        b"/home/u/.cargo/registry/src/index.crates.io-6f17d22bba15001f/serde_json-1.0.108/src/de.rs\x00",
    );
    blob.extend_from_slice(
        b"attempt to add with overflow/home/u/.cargo/registry/src/github.com-1ecc6299db9ec823/foo-1.2.3/src/lib.rs",
    );
    let crates = detect_crates(&blob);
    let found: Vec<_> = crates.iter().cloned().collect();
    assert_eq!(found, [CrateSpec::new("serde_json", "1.0.108"), CrateSpec::new("foo", "1.2.3")]);
}

#[test]
fn repeated_paths_are_reported_once() {
    let path = b"C:\\Users\\u\\.cargo\\registry\\src\\index.crates.io-abc\\hashbrown-0.14.3\\src\\map.rs;";
    let blob = [&path[..], &path[..], &path[..]].concat();
    let crates = detect_crates(&blob);
    assert_eq!(crates.len(), 1);
    assert_eq!(crates.get("hashbrown").unwrap().version, "0.14.3");
}

#[test]
fn hyphenated_names_and_prerelease_versions() {
    let blob = b"registry/src/index.crates.io-0/my-crate-0.3.0-alpha.2/src/lib.rs";
    let crates = detect_crates(blob);
    assert_eq!(crates.get("my-crate").unwrap().version, "0.3.0-alpha.2");
}

#[test]
fn non_registry_paths_are_ignored() {
    let blob = b"/rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/core/src/fmt/mod.rs\
                 /home/u/project/src/main.rs";
    assert!(detect_crates(blob).is_empty());
}
