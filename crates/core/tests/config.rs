use std::fs;
use std::time::Duration;

use cerberus_core::config::{
    ConfigError, SessionConfig, DEFAULT_MIN_FUNC_SIZE, DEFAULT_PART_HASH_LEN,
    DEFAULT_PART_HASH_TRUST,
};
use tempfile::tempdir;

#[test]
fn defaults_are_valid() {
    let config = SessionConfig::default();
    assert_eq!(config.part_hash_len, DEFAULT_PART_HASH_LEN);
    assert_eq!(config.part_hash_trust, DEFAULT_PART_HASH_TRUST);
    assert_eq!(config.min_func_size, DEFAULT_MIN_FUNC_SIZE);
    assert_eq!(config.build_timeout(), Some(Duration::from_secs(900)));
    config.validate().unwrap();
}

#[test]
fn validate_rejects_bad_values() {
    let zero = SessionConfig { part_hash_len: 0, ..SessionConfig::default() };
    assert!(matches!(zero.validate(), Err(ConfigError::ZeroPartHashLen)));

    for trust in [-0.1, 1.5, f64::NAN] {
        let config = SessionConfig { part_hash_trust: trust, ..SessionConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::TrustOutOfRange(_))), "{trust}");
    }
    for trust in [0.0, 1.0] {
        SessionConfig { part_hash_trust: trust, ..SessionConfig::default() }.validate().unwrap();
    }
}

#[test]
fn json_file_fills_missing_fields_with_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cerberus.json");
    fs::write(&path, r#"{ "part_hash_len": 12, "build_timeout_secs": null }"#).unwrap();

    let config = SessionConfig::from_json_file(&path).unwrap();
    assert_eq!(config.part_hash_len, 12);
    assert_eq!(config.part_hash_trust, DEFAULT_PART_HASH_TRUST);
    assert_eq!(config.build_timeout(), None);
}

#[test]
fn json_file_errors_are_typed() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert!(matches!(SessionConfig::from_json_file(&missing), Err(ConfigError::Read { .. })));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ part_hash_len: ").unwrap();
    assert!(matches!(SessionConfig::from_json_file(&broken), Err(ConfigError::Parse { .. })));

    let invalid = dir.path().join("invalid.json");
    fs::write(&invalid, r#"{ "part_hash_trust": 2.0 }"#).unwrap();
    assert!(matches!(
        SessionConfig::from_json_file(&invalid),
        Err(ConfigError::TrustOutOfRange(_))
    ));
}
