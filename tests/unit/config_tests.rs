// ==========================
// tests/unit/config_tests.rs
// ==========================
//! Unit tests for the configuration module
use gatekeeper::config::{ConfigError, LimitSettings, Settings};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const SECRETS: &str = r#"
[tokens]
access_secret = "file-access"
refresh_secret = "file-refresh"
"#;

#[test]
fn test_settings_default() {
    let settings = Settings::default();

    assert_eq!(settings.bind_addr.to_string(), "127.0.0.1:8080");
    assert_eq!(settings.redis.url, "redis://127.0.0.1:6379/0");
    assert_eq!(settings.store_timeout(), Duration::from_secs(2));
    assert!(settings.cookies.secure);
    assert!(settings.rate_limit.enabled);
    assert!(!settings.rate_limit.allow_private);
    assert_eq!(settings.rate_limit.otp_confirm, LimitSettings::new(10, 60));

    // no secrets ship with the defaults
    assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_limit_window() {
    assert_eq!(LimitSettings::new(5, 90).window(), Duration::from_secs(90));
}

#[test]
fn test_file_sections_override_defaults() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("gatekeeper.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            log_json = true

            [cookies]
            domain = "example.com"
            secure = false

            [otp]
            code_ttl_secs = 300

            [rate_limit]
            allow_private = true
            {SECRETS}"#
        ),
    )
    .unwrap();

    let settings = Settings::load_from(&config_path).unwrap();
    assert!(settings.log_json);
    assert_eq!(settings.cookies.domain.as_deref(), Some("example.com"));
    assert!(!settings.cookies.secure);
    assert_eq!(settings.otp.code_ttl_secs, 300);
    assert_eq!(settings.otp.trusted_device_ttl_secs, 2_592_000);
    assert!(settings.rate_limit.allow_private);
    assert_eq!(*settings.tokens.access_secret, "file-access");
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("broken.toml");
    fs::write(&config_path, "bind_addr = \"not an address\"\n").unwrap();

    assert!(matches!(
        Settings::load_from(&config_path),
        Err(ConfigError::Load(_))
    ));
}

// the only test in this crate that touches the process environment
#[test]
fn test_environment_overrides_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("gatekeeper.toml");
    fs::write(
        &config_path,
        format!("[session]\nttl_secs = 100\n{SECRETS}"),
    )
    .unwrap();

    std::env::set_var("GATEKEEPER_SESSION__TTL_SECS", "7200");
    let loaded = Settings::load_from(&config_path);
    std::env::remove_var("GATEKEEPER_SESSION__TTL_SECS");

    assert_eq!(loaded.unwrap().session.ttl_secs, 7200);
}
