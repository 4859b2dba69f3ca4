use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use procman::ManagedProcessInfo;
use serde::{Deserialize, Serialize};

/// Values remembered between runs. Session cookies never land here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    /// Last silent-mode choice made at runtime (SIGUSR1 or `--silent`).
    pub silent: Option<bool>,
    /// Display name to wallpaper id, as last shown.
    pub assignments: BTreeMap<String, String>,
    /// Epoch seconds of the last successful subscription refresh.
    pub last_refresh: Option<u64>,
}

impl AppState {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read {}", path.display()))
            }
        };
        toml::from_str(&raw).with_context(|| format!("{} is not a valid state file", path.display()))
    }

    /// Writes next to the target first so a crash never leaves half a file.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }
        let body = toml::to_string_pretty(self).context("cannot encode state as TOML")?;
        let staging = path.with_extension("toml.tmp");
        fs::write(&staging, body)
            .with_context(|| format!("cannot write {}", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("cannot replace {}", path.display()))
    }

    /// Remembers what each display shows; displays not in `running` keep
    /// their previous entry.
    pub fn record_assignments(&mut self, running: &[ManagedProcessInfo]) {
        self.assignments.extend(running.iter().map(|process| {
            (
                process.display.as_str().to_string(),
                process.wallpaper.as_str().to_string(),
            )
        }));
    }

    pub fn mark_refreshed(&mut self) {
        self.last_refresh = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procman::{DisplayId, ProcessGroupId, WallpaperId};

    fn running(display: &str, wallpaper: &str) -> ManagedProcessInfo {
        ManagedProcessInfo {
            display: DisplayId::new(display),
            wallpaper: WallpaperId::new(wallpaper),
            pgid: ProcessGroupId::new(4242),
            launched_at: SystemTime::now(),
        }
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.toml");

        let mut state = AppState {
            silent: Some(false),
            ..AppState::default()
        };
        state.record_assignments(&[running("HDMI-1", "123")]);
        state.mark_refreshed();
        state.persist(&path).unwrap();

        let loaded = AppState::load_or_default(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.assignments.get("HDMI-1").map(String::as_str), Some("123"));
        assert!(loaded.last_refresh.is_some());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn later_sessions_only_overwrite_their_displays() {
        let mut state = AppState::default();
        state.record_assignments(&[running("HDMI-1", "1"), running("DP-1", "2")]);
        state.record_assignments(&[running("DP-1", "3")]);
        assert_eq!(state.assignments["HDMI-1"], "1");
        assert_eq!(state.assignments["DP-1"], "3");
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::load_or_default(&dir.path().join("state.toml")).unwrap();
        assert_eq!(state, AppState::default());
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "assignments = 3").unwrap();
        assert!(AppState::load_or_default(&path).is_err());
    }
}
