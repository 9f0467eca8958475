use netraven_config::{load_config, StoreBackend};
use std::path::Path;

#[test]
fn load_valid_fixture() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/runtime.yml");
    let cfg = load_config(&path).expect("should load without error");

    assert_eq!(cfg.max_concurrent_job_runs, 4);
    assert_eq!(cfg.max_concurrent_devices, 2);
    assert_eq!(cfg.connect_timeout.as_secs(), 15);
    assert_eq!(cfg.command_timeout.as_secs(), 20);
    assert_eq!(cfg.icmp_timeout.as_millis(), 500);
    assert_eq!(cfg.encryption_key, "test-encryption-key-0123456789ab");
    assert_eq!(cfg.redaction_patterns, vec!["enable_secret=\\S+".to_string()]);
    assert_eq!(cfg.store_backend, StoreBackend::Memory);
    assert_eq!(cfg.api_bind_address.to_string(), "127.0.0.1:9090");
}

#[test]
fn defaults_apply_when_sections_are_omitted() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/minimal.yml");
    let cfg = load_config(&path).expect("should load without error");

    assert_eq!(cfg.max_concurrent_job_runs, 8);
    assert_eq!(cfg.max_concurrent_devices, 3);
    assert_eq!(cfg.connect_timeout.as_secs(), 30);
    assert_eq!(cfg.icmp_timeout.as_millis(), 1000);
    assert_eq!(cfg.store_backend, StoreBackend::Memory);
}

#[test]
fn missing_encryption_key_is_rejected() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/missing_key.yml");
    assert!(load_config(&path).is_err());
}

#[test]
fn postgres_backend_without_url_is_rejected() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/postgres_no_url.yml");
    assert!(load_config(&path).is_err());
}

#[test]
fn missing_file_returns_error() {
    let path = Path::new("/nonexistent/path/does/not/exist.yml");
    assert!(load_config(path).is_err());
}
