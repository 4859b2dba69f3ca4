use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn wpectl(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wpectl"))
        .env("WPECTL_CONFIG_DIR", root.join("config"))
        .env("WPECTL_CACHE_DIR", root.join("cache"))
        .env_remove("STEAM_SESSIONID")
        .env_remove("STEAM_LOGIN_SECURE")
        .env_remove("STEAM_COOKIES")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run wpectl")
}

#[test]
fn where_reports_overridden_directories() {
    let root = TempDir::new().unwrap();
    let output = wpectl(root.path(), &["where"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let settings = root.path().join("config/settings.toml");
    let cache = root.path().join("cache/wallpapers.json");
    assert!(stdout.contains(&settings.display().to_string()));
    assert!(stdout.contains(&cache.display().to_string()));
}

#[test]
fn wallpapers_lists_the_cache() {
    let root = TempDir::new().unwrap();
    let cache_dir = root.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join("wallpapers.json"),
        r#"[{"id":"1234","preview_url":"https://images.example/1234.gif"},{"id":"5678"}]"#,
    )
    .unwrap();

    let output = wpectl(root.path(), &["wallpapers"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("1234  https://images.example/1234.gif"));
    assert!(lines[1].starts_with("5678"));
}

#[test]
fn empty_cache_suggests_a_refresh() {
    let root = TempDir::new().unwrap();
    let output = wpectl(root.path(), &["wallpapers"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--refresh"));
}

#[test]
fn refresh_needs_a_username() {
    let root = TempDir::new().unwrap();
    let output = wpectl(root.path(), &["wallpapers", "--refresh"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Steam username"));
}

#[test]
fn refresh_needs_session_cookies() {
    let root = TempDir::new().unwrap();
    let output = wpectl(root.path(), &["wallpapers", "--refresh", "--user", "someone"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("STEAM_SESSIONID"));
    assert!(!root.path().join("cache/wallpapers.json").exists());
}

#[test]
fn restore_without_saved_assignments_fails() {
    let root = TempDir::new().unwrap();
    let output = wpectl(root.path(), &["restore"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no saved assignments"));
}

#[test]
fn invalid_settings_are_rejected() {
    let root = TempDir::new().unwrap();
    let config_dir = root.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("settings.toml"), "version = 99\n").unwrap();

    let output = wpectl(root.path(), &["wallpapers", "--refresh", "--user", "someone"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("settings"));
}
