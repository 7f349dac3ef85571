use kvpool::config::{self, Config, ConfigError};
use std::env;
use std::fs;
use tempfile::TempDir;

/// Test loading configuration from a YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
default:
  server: "127.0.0.1:6379"
  pool:
    maxTotal: 10
    maxIdle: 2
    maxWait: 100
sessions:
  server: "10.1.2.3:6380"
  pool:
    maxTotal: 32
    maxIdle: 8
    maxWait: "500"
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("kvpool.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.targets.len(), 2);

    let default = config.targets.get("default").unwrap();
    assert_eq!(default.server, "127.0.0.1:6379");
    assert_eq!(default.pool.max_total, 10);
    assert_eq!(default.pool.max_idle, 2);
    assert_eq!(default.pool.max_wait.as_millis().unwrap(), 100);

    let sessions = config.targets.get("sessions").unwrap();
    assert_eq!(sessions.server, "10.1.2.3:6380");
    assert_eq!(sessions.pool.max_wait.as_millis().unwrap(), 500);

    assert!(config.validate().is_ok());
}

/// Test that a missing config file is a load error
#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.yaml");

    let err = config::load_from_yaml(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

/// Test that malformed YAML is a parse error
#[test]
fn test_malformed_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("kvpool.yaml");
    fs::write(&config_path, "default: [not, a, target").unwrap();

    let err = config::load_from_yaml(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

/// Test that a non-mapping document is a parse error
#[test]
fn test_non_mapping_document() {
    let err = Config::from_yaml_str("- default\n- sessions\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

/// Test validation outcomes on the address forms from the file contract
#[test]
fn test_validation_of_addresses() {
    let accepted = Config::from_yaml_str(
        r#"
default:
  server: "1.2.3.4:6379"
  pool:
    maxTotal: 10
    maxIdle: 2
    maxWait: 100
"#,
    )
    .unwrap();
    assert!(accepted.validate().is_ok());

    let rejected = Config::from_yaml_str(
        r#"
default:
  server: "999.1.1.1:6379"
  pool:
    maxTotal: 10
    maxIdle: 2
    maxWait: 100
"#,
    )
    .unwrap();
    assert!(matches!(
        rejected.validate(),
        Err(ConfigError::InvalidAddress { .. })
    ));
}

/// Test loading configuration from environment variables
#[test]
fn test_load_env_config() {
    // Save original env vars
    let orig_server = env::var("KVPOOL_SERVER").ok();
    let orig_total = env::var("KVPOOL_MAX_TOTAL").ok();
    let orig_idle = env::var("KVPOOL_MAX_IDLE").ok();
    let orig_wait = env::var("KVPOOL_MAX_WAIT").ok();

    // Defaults apply when only the server is set
    env::set_var("KVPOOL_SERVER", "127.0.0.1:6379");
    env::remove_var("KVPOOL_MAX_TOTAL");
    env::remove_var("KVPOOL_MAX_IDLE");
    env::remove_var("KVPOOL_MAX_WAIT");

    let config = config::load_from_env().unwrap();
    let default = config.targets.get("default").unwrap();
    assert_eq!(default.server, "127.0.0.1:6379");
    assert_eq!(default.pool.max_total, 8);
    assert_eq!(default.pool.max_idle, 4);
    assert_eq!(default.pool.max_wait.as_millis().unwrap(), 1000);
    assert!(config.validate().is_ok());

    // Explicit values win over defaults
    env::set_var("KVPOOL_MAX_TOTAL", "20");
    env::set_var("KVPOOL_MAX_IDLE", "5");
    env::set_var("KVPOOL_MAX_WAIT", "250");

    let config = config::load_from_env().unwrap();
    let default = config.targets.get("default").unwrap();
    assert_eq!(default.pool.max_total, 20);
    assert_eq!(default.pool.max_idle, 5);
    assert_eq!(default.pool.max_wait.as_millis().unwrap(), 250);

    // A garbled knob is an error, not a silent default
    env::set_var("KVPOOL_MAX_TOTAL", "many");
    assert!(matches!(
        config::load_from_env(),
        Err(ConfigError::InvalidEnv { .. })
    ));

    // Without the server variable, env loading fails
    env::remove_var("KVPOOL_SERVER");
    assert!(matches!(
        config::load_from_env(),
        Err(ConfigError::MissingEnv(_))
    ));

    // Restore original env vars
    cleanup_env("KVPOOL_SERVER", orig_server);
    cleanup_env("KVPOOL_MAX_TOTAL", orig_total);
    cleanup_env("KVPOOL_MAX_IDLE", orig_idle);
    cleanup_env("KVPOOL_MAX_WAIT", orig_wait);
}

/// Test that load_config prefers a file when a path is given
#[test]
fn test_load_config_prefers_file() {
    let yaml = r#"
default:
  server: "127.0.0.1:7000"
  pool:
    maxTotal: 3
    maxIdle: 1
    maxWait: 50
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("kvpool.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = config::load_config(Some(config_path.to_str().unwrap())).unwrap();
    assert_eq!(
        config.targets.get("default").unwrap().server,
        "127.0.0.1:7000"
    );
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
