//! Loading droidpush.toml from explicit and default locations.

use std::path::PathBuf;

use droidpush_core::config::{ConfigOverrides, ConfigStore, DroidpushConfig};
use tempfile::TempDir;

#[test]
fn explicit_file_is_loaded() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("droidpush.toml");
    std::fs::write(
        &path,
        "adb_path = \"/opt/platform-tools/adb\"\nmax_cycles = 5\n",
    )
    .expect("Failed to write config");

    let config = ConfigStore::from_path(&path).load().unwrap();

    assert_eq!(config.adb_path, PathBuf::from("/opt/platform-tools/adb"));
    assert_eq!(config.max_cycles, 5);
    assert_eq!(config.install_timeout_secs, 300);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = ConfigStore::resolve(Some(temp.path().join("absent.toml"))).unwrap();

    let err = store.load().unwrap_err();

    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn unknown_key_reports_its_line() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("droidpush.toml");
    std::fs::write(&path, "max_cycles = 2\nretries = 4\n").expect("Failed to write config");

    let err = ConfigStore::from_path(&path).load().unwrap_err();

    assert!(format!("{err:#}").contains("line 2"));
}

#[test]
fn loaded_file_is_validated() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("droidpush.toml");
    std::fs::write(&path, "command_timeout_secs = 0\n").expect("Failed to write config");

    assert!(ConfigStore::from_path(&path).load().is_err());
}

#[test]
fn overrides_apply_on_top_of_file_values() {
    let config = DroidpushConfig::default()
        .with_overrides(ConfigOverrides {
            command_timeout_secs: Some(12),
            ..ConfigOverrides::default()
        })
        .unwrap();

    assert_eq!(config.command_timeout_secs, 12);
    assert_eq!(config.max_cycles, 3);
}
