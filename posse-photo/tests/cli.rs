//! Command-line behavior of posse-photo

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

fn posse_photo(temp: &TempDir) -> Command {
    let config = temp.path().join("config.toml");
    fs::write(&config, "").unwrap();

    let mut cmd = Command::cargo_bin("posse-photo").unwrap();
    cmd.current_dir(temp.path())
        .env("POSSE_CONFIG", &config)
        .env("MASTODON_INSTANCE", "mastodon.example")
        .env("MASTODON_ACCESS_TOKEN", "token")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_mentions_throttle() {
    let temp = TempDir::new().unwrap();
    posse_photo(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--min-interval"))
        .stdout(predicate::str::contains("--seed"));
}

#[test]
fn test_recent_publish_is_too_soon() {
    let temp = TempDir::new().unwrap();
    let timestamp = temp.path().join("timestamp.json");
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    fs::write(&timestamp, format!("{{\"timestamp\": {}}}", now_ms)).unwrap();

    posse_photo(&temp)
        .args(["--feed", "https://example.com/feeds/photos.json"])
        .arg("--timestamp")
        .arg(&timestamp)
        .assert()
        .success()
        .stdout(predicate::str::diff("[200] Too soon\n"));

    // Nothing else was written
    assert!(!temp.path().join("cache").exists());
}

#[test]
fn test_invalid_interval_is_rejected() {
    let temp = TempDir::new().unwrap();
    posse_photo(&temp)
        .args(["--min-interval", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--min-interval"));
}

#[test]
fn test_missing_config_file_fails_with_status_line() {
    let temp = TempDir::new().unwrap();
    posse_photo(&temp)
        .env("POSSE_CONFIG", temp.path().join("absent.toml"))
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with(
            "[500] Configuration error: Failed to read config file",
        ));
}
