//! Locates wpectl's config and cache roots. Environment overrides let tests
//! and packagers relocate them. Nothing is created here; see
//! `bootstrap::bootstrap_filesystem`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "WPECTL_CONFIG_DIR";
pub const ENV_CACHE_DIR: &str = "WPECTL_CACHE_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    cache_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let config_override = override_from(ENV_CONFIG_DIR);
        let cache_override = override_from(ENV_CACHE_DIR);
        if let (Some(config_dir), Some(cache_dir)) = (&config_override, &cache_override) {
            return Ok(Self::from_roots(config_dir.clone(), cache_dir.clone()));
        }

        let dirs = ProjectDirs::from("org", "wpectl", "wpectl")
            .context("no home directory to place wpectl's config and cache in")?;
        Ok(Self::from_roots(
            config_override.unwrap_or_else(|| dirs.config_dir().to_path_buf()),
            cache_override.unwrap_or_else(|| dirs.cache_dir().to_path_buf()),
        ))
    }

    pub(crate) fn from_roots(config_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            config_dir,
            cache_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    /// Runtime choices remembered between sessions.
    pub fn state_file(&self) -> PathBuf {
        self.config_dir.join("state.toml")
    }

    pub fn wallpaper_cache_file(&self) -> PathBuf {
        self.cache_dir.join("wallpapers.json")
    }
}

/// Empty values count as unset.
fn override_from(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Restores the variable on drop.
    struct EnvGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.previous.take() {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn overrides_relocate_every_file() {
        let _lock = env_lock().lock().unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = root.path().join("cfg");
        let cache = root.path().join("cache");
        let _config = EnvGuard::set(ENV_CONFIG_DIR, &config);
        let _cache = EnvGuard::set(ENV_CACHE_DIR, &cache);

        let paths = AppPaths::discover().unwrap();
        assert_eq!(paths.settings_file(), config.join("settings.toml"));
        assert_eq!(paths.state_file(), config.join("state.toml"));
        assert_eq!(paths.wallpaper_cache_file(), cache.join("wallpapers.json"));
        assert!(!config.exists(), "discovery must not create directories");
    }

    #[test]
    fn empty_override_counts_as_unset() {
        let _lock = env_lock().lock().unwrap();
        let _config = EnvGuard::set(ENV_CONFIG_DIR, "");
        assert_eq!(override_from(ENV_CONFIG_DIR), None);

        let _cache = EnvGuard::set(ENV_CACHE_DIR, "/tmp/wpectl-cache");
        assert_eq!(
            override_from(ENV_CACHE_DIR),
            Some(PathBuf::from("/tmp/wpectl-cache"))
        );
    }
}
