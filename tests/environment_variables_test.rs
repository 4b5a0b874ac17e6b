//! Configuration file and environment variable handling.

use std::env;
use std::sync::Mutex;

use relaychat::Config;
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 5] = [
    "RELAYCHAT_BIND",
    "RELAYCHAT_PORT",
    "RELAYCHAT_HOST",
    "RELAYCHAT_RECONNECT_DELAY_MS",
    "RELAYCHAT_MAX_RECONNECT_ATTEMPTS",
];

/// Helper to point the config dir at a fresh temp dir with no overrides set
fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();
    for var in VARS {
        env::remove_var(var);
    }
    env::set_var("RELAYCHAT_CONFIG_DIR", temp_dir.path());
    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();
    let config = Config::load().unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_env_overrides_file() {
    let (dir, _guard) = setup_test_env();
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"server": {"port": 7000}, "client": {"host": "chat.example"}}"#,
    )
    .unwrap();

    env::set_var("RELAYCHAT_PORT", "7100");
    env::set_var("RELAYCHAT_MAX_RECONNECT_ATTEMPTS", "2");
    let config = Config::load().unwrap();
    for var in VARS {
        env::remove_var(var);
    }

    assert_eq!(config.server.port, 7100);
    assert_eq!(config.client.port, 7100);
    assert_eq!(config.client.host, "chat.example");
    assert_eq!(config.client.max_reconnect_attempts, 2);
}

#[test]
fn test_invalid_port_env_is_error() {
    let (_dir, _guard) = setup_test_env();
    env::set_var("RELAYCHAT_PORT", "not-a-port");
    let err = Config::load().unwrap_err();
    env::remove_var("RELAYCHAT_PORT");
    assert_eq!(err.to_string(), "Invalid port number");
}

#[test]
fn test_save_writes_to_config_dir() {
    let (dir, _guard) = setup_test_env();
    let mut config = Config::default();
    config.server.port = 6123;
    config.save().unwrap();

    let content = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(saved["server"]["port"], 6123);
}
