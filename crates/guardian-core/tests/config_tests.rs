use std::collections::HashMap;
use std::path::PathBuf;

use guardian_core::config::{ConfigError, GuardianConfig, DEFAULT_ADDRESS, DEFAULT_TICK_SECS};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_defaults_with_explicit_data_dir() {
    let config =
        GuardianConfig::from_lookup(lookup(&[("GUARDIAN_DATA_DIR", "/var/lib/guardian")])).unwrap();

    assert_eq!(config.address, DEFAULT_ADDRESS);
    assert_eq!(config.data_dir, PathBuf::from("/var/lib/guardian"));
    assert_eq!(config.scheduler_tick_secs, DEFAULT_TICK_SECS);
    assert_eq!(config.job_timeout().as_secs(), 21_600);
    assert!(config.s3.is_none());
    assert_eq!(
        config.backup_history_path(),
        PathBuf::from("/var/lib/guardian/backups.json")
    );
}

#[test]
fn test_overrides() {
    let config = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_ADDRESS", "0.0.0.0:9000"),
        ("GUARDIAN_SCHEDULER_TICK_SECS", "5"),
        ("GUARDIAN_JOB_TIMEOUT_SECS", "120"),
    ]))
    .unwrap();

    assert_eq!(config.address, "0.0.0.0:9000");
    assert_eq!(config.scheduler_tick().as_secs(), 5);
    assert_eq!(config.job_timeout().as_secs(), 120);
}

#[test]
fn test_invalid_numbers_are_rejected() {
    let result = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_SCHEDULER_TICK_SECS", "soon"),
    ]));
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

    let result = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_SCHEDULER_TICK_SECS", "0"),
    ]));
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
fn test_s3_requires_both_keys() {
    let config = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_S3_ACCESS_KEY_ID", "AKIA"),
    ]))
    .unwrap();
    assert!(config.s3.is_none());

    let config = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_S3_ACCESS_KEY_ID", "AKIA"),
        ("GUARDIAN_S3_SECRET_KEY", "secret"),
        ("GUARDIAN_S3_ENDPOINT", "http://minio:9000"),
        ("GUARDIAN_S3_FORCE_PATH_STYLE", "false"),
    ]))
    .unwrap();
    let s3 = config.s3.unwrap();
    assert_eq!(s3.region, "us-east-1");
    assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
    assert!(!s3.force_path_style);
}

#[test]
fn test_s3_secret_is_not_serialized() {
    let config = GuardianConfig::from_lookup(lookup(&[
        ("GUARDIAN_DATA_DIR", "/tmp/g"),
        ("GUARDIAN_S3_ACCESS_KEY_ID", "AKIA"),
        ("GUARDIAN_S3_SECRET_KEY", "topsecret"),
    ]))
    .unwrap();

    let serialized = serde_json::to_string(&config).unwrap();
    assert!(serialized.contains("AKIA"));
    assert!(!serialized.contains("topsecret"));
}
