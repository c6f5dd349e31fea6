//! Integration tests for loading configuration files

use std::io::Write;
use std::time::Duration;

use litenet::config::ConfigManager;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config_file() {
    let file = write_config(
        r#"
[server]
bind_addr = "0.0.0.0:7000"
max_connections = 64
buffer_size = 4096
max_packet_size = 65536
shutdown_timeout = "5s"
nodelay = false

[client]
remote_addr = "10.0.0.2:7000"
connect_timeout = "250ms"

[logging]
log_level = "debug"

[application]
greeting = "hello"
room_limit = 12
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();

    assert_eq!(config.server.bind_addr, "0.0.0.0:7000".parse().unwrap());
    assert_eq!(config.server.max_connections, 64);
    assert_eq!(config.server.buffer_size, 4096);
    assert_eq!(config.server.max_packet_size, 65536);
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
    assert!(!config.server.nodelay);

    assert_eq!(config.client.remote_addr, "10.0.0.2:7000".parse().unwrap());
    assert_eq!(config.client.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.client.buffer_size, 8192);

    assert_eq!(config.logging.log_level, "debug");

    assert_eq!(
        config.application.get("greeting").and_then(|v| v.as_str()),
        Some("hello")
    );
    assert_eq!(
        config.application.get("room_limit").and_then(|v| v.as_integer()),
        Some(12)
    );
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[server]
max_connections = 10
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();

    assert_eq!(config.server.max_connections, 10);
    assert_eq!(config.server.bind_addr, "127.0.0.1:4444".parse().unwrap());
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
    assert_eq!(config.logging.log_level, "info");
    assert!(config.application.is_empty());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.server.max_connections, 1000);
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
[server]
buffer_size = 8
"#,
    );

    let err = ConfigManager::load_from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("buffer_size"));
}

#[test]
fn test_malformed_file_is_rejected() {
    let file = write_config("[server\nmax_connections = ");

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}
