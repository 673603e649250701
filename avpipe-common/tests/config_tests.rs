//! Configuration file loading tests
//!
//! Exercise the file resolution order and TOML parsing against real files
//! in a temporary directory.

use avpipe_common::config::{resolve_config_path, PipelineConfig, CONFIG_ENV_VAR};
use avpipe_common::Error;
use serial_test::serial;
use std::io::Write;

// ============================================================================
// Test Helpers
// ============================================================================

fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[limits]
max_ring_size = 256
max_event_records = 8

[coded_buffers.audio]
frame_count = 12

[logging]
level = "debug"
"#,
    );

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.limits.max_ring_size, 256);
    assert_eq!(config.limits.max_event_records, 8);
    assert_eq!(config.coded_buffers.audio.frame_count, 12);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[limits\nmax_ring_size = ");

    let result = PipelineConfig::load(&path);
    assert!(matches!(result, Err(Error::ConfigParse(_))), "got {:?}", result);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = PipelineConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

// ============================================================================
// Resolution order
// ============================================================================

#[test]
#[serial]
fn test_cli_path_beats_environment() {
    let dir = tempfile::tempdir().unwrap();
    let cli = write_config(&dir, "");
    std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/from-env.toml");

    let resolved = resolve_config_path(Some(&cli), CONFIG_ENV_VAR);
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(cli));
}

#[test]
#[serial]
fn test_environment_variable_used_without_cli() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[limits]\nmax_ring_size = 999\n");
    std::env::set_var(CONFIG_ENV_VAR, &path);

    let config = PipelineConfig::load_or_default(None);
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.unwrap().limits.max_ring_size, 999);
}
