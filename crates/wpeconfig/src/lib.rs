//! Settings file for `wpectl`: renderer invocation, lifecycle timings, the
//! Steam account to scrape, and auto-switch playlists bound to displays.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const SETTINGS_VERSION: u32 = 1;
pub const DEFAULT_RENDERER: &str = "linux-wallpaperengine";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMode {
    #[default]
    Continuous,
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSetting {
    #[default]
    Discard,
    Inherit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub renderer: RendererSettings,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub steam: SteamSettings,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub playlists: BTreeMap<String, Playlist>,
    /// Display name to playlist name.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            renderer: RendererSettings::default(),
            lifecycle: LifecycleSettings::default(),
            steam: SteamSettings::default(),
            defaults: Defaults::default(),
            playlists: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub binary: PathBuf,
    pub silent: bool,
    pub output: OutputSetting,
    pub extra_args: Vec<String>,
    /// Kill every process named like the renderer at startup and after
    /// teardown. Off by default: it also hits renderers owned by another
    /// running session.
    pub sweep_strays: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_RENDERER),
            silent: true,
            output: OutputSetting::Discard,
            extra_args: Vec::new(),
            sweep_strays: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LifecycleSettings {
    #[serde(default = "default_grace", deserialize_with = "deserialize_duration")]
    pub grace: Duration,
    #[serde(
        default = "default_batch_grace",
        deserialize_with = "deserialize_duration"
    )]
    pub batch_grace: Duration,
    #[serde(
        default = "default_launch_spacing",
        deserialize_with = "deserialize_duration"
    )]
    pub launch_spacing: Duration,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(
        default = "default_request_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    pub request_cooldown: Duration,
    #[serde(
        default = "default_startup_check",
        deserialize_with = "deserialize_duration"
    )]
    pub startup_check: Duration,
    #[serde(
        default = "default_kill_after",
        deserialize_with = "deserialize_duration"
    )]
    pub kill_after: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            grace: default_grace(),
            batch_grace: default_batch_grace(),
            launch_spacing: default_launch_spacing(),
            poll_interval: default_poll_interval(),
            request_cooldown: default_request_cooldown(),
            startup_check: default_startup_check(),
            kill_after: default_kill_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SteamSettings {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for SteamSettings {
    fn default() -> Self {
        Self {
            username: None,
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Defaults {
    pub playlist: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub mode: PlaylistMode,
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
    /// Wallpaper ids. Empty means every cached wallpaper.
    #[serde(default)]
    pub items: Vec<String>,
}

impl Playlist {
    pub fn uses_cache(&self) -> bool {
        self.items.is_empty()
    }
}

fn default_grace() -> Duration {
    Duration::from_millis(100)
}

fn default_batch_grace() -> Duration {
    Duration::from_millis(200)
}

fn default_launch_spacing() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_cooldown() -> Duration {
    Duration::from_secs(1)
}

fn default_startup_check() -> Duration {
    Duration::from_millis(50)
}

fn default_kill_after() -> Duration {
    Duration::from_secs(2)
}

pub fn default_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_max_pages() -> u32 {
    20
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_duration(v).map_err(E::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v)
                .map_err(|err| E::custom(format!("duration {v} out of range: {err}")))
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Parses `"90"` as seconds, anything else through `humantime`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: Settings = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn playlist(&self, name: &str) -> Option<&Playlist> {
        self.playlists.get(name)
    }

    pub fn default_playlist(&self) -> Option<&str> {
        self.defaults.playlist.as_deref()
    }

    /// Playlist bound to `display`, falling back to `defaults.playlist`.
    pub fn playlist_for_display(&self, display: &str) -> Option<&str> {
        self.targets
            .get(display)
            .map(String::as_str)
            .or_else(|| self.default_playlist())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SETTINGS_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {SETTINGS_VERSION}",
                self.version
            )));
        }

        if self.renderer.binary.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("renderer.binary may not be empty".into()));
        }

        if self.lifecycle.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "lifecycle.poll_interval must be greater than zero".into(),
            ));
        }

        if self.steam.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "steam.max_pages must be at least 1".into(),
            ));
        }

        if let Some(username) = &self.steam.username {
            if username.trim().is_empty() {
                return Err(ConfigError::Invalid("steam.username may not be empty".into()));
            }
        }

        for (name, playlist) in &self.playlists {
            if playlist.interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "playlist '{name}' interval must be greater than zero"
                )));
            }

            if playlist.items.iter().any(|item| item.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "playlist '{name}' contains an empty wallpaper id"
                )));
            }
        }

        if let Some(default_playlist) = &self.defaults.playlist {
            if !self.playlists.contains_key(default_playlist) {
                return Err(ConfigError::Invalid(format!(
                    "defaults.playlist references unknown playlist '{default_playlist}'"
                )));
            }
        }

        for (display, playlist) in &self.targets {
            if display.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "target display name may not be empty".into(),
                ));
            }

            if !self.playlists.contains_key(playlist) {
                return Err(ConfigError::Invalid(format!(
                    "target '{display}' references unknown playlist '{playlist}'"
                )));
            }
        }

        Ok(())
    }
}
