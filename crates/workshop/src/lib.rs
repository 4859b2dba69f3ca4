//! Steam Workshop subscriptions for Wallpaper Engine (app 431960): session
//! credentials, the subscription scraper, and the JSON list cached between
//! runs.

mod cache;
mod credentials;
mod steam;

pub use cache::{CacheError, WallpaperCache};
pub use credentials::{AuthError, SessionCredentials, LOGIN_SECURE_COOKIE, SESSION_ID_COOKIE};
pub use steam::{
    parse_subscriptions, subscriptions_url, FetchError, SteamWorkshopClient, SubscriptionParser,
    WALLPAPER_ENGINE_APP_ID,
};

use serde::{Deserialize, Serialize};

/// A subscribed wallpaper as listed by the source and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallpaperInfo {
    pub id: String,
    #[serde(default)]
    pub preview_url: String,
}

impl WallpaperInfo {
    pub fn new(id: impl Into<String>, preview_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            preview_url: preview_url.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Lists the wallpapers a logged-in user is subscribed to.
pub trait WallpaperSource {
    fn list_wallpapers(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Vec<WallpaperInfo>, SourceError>;
}

/// Ids in list order, for the rotation and CLI listings.
pub fn wallpaper_ids(wallpapers: &[WallpaperInfo]) -> Vec<String> {
    wallpapers.iter().map(|w| w.id.clone()).collect()
}
