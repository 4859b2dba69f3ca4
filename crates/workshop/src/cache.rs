use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::WallpaperInfo;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to write wallpaper cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode wallpaper cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON array of `{id, preview_url}` objects, kept in listing order.
#[derive(Debug, Clone)]
pub struct WallpaperCache {
    path: PathBuf,
}

impl WallpaperCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// A missing file is an empty list; an unreadable or corrupt one is
    /// logged and also treated as empty.
    pub fn load(&self) -> Vec<WallpaperInfo> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no wallpaper cache yet");
                return Vec::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read wallpaper cache");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<WallpaperInfo>>(&contents) {
            Ok(wallpapers) => {
                debug!(
                    path = %self.path.display(),
                    count = wallpapers.len(),
                    "loaded wallpaper cache"
                );
                wallpapers
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt wallpaper cache");
                Vec::new()
            }
        }
    }

    /// Replaces the cache contents. Written to a sibling file first so a
    /// crash never leaves a truncated cache behind.
    pub fn store(&self, wallpapers: &[WallpaperInfo]) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let encoded = serde_json::to_string_pretty(wallpapers)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(io_err)?;
        fs::rename(&staging, &self.path).map_err(io_err)?;
        debug!(
            path = %self.path.display(),
            count = wallpapers.len(),
            "stored wallpaper cache"
        );
        Ok(())
    }
}
