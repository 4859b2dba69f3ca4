use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use crate::credentials::{AuthError, SessionCredentials};
use crate::{SourceError, WallpaperInfo, WallpaperSource};

/// Steam app id of Wallpaper Engine.
pub const WALLPAPER_ENGINE_APP_ID: u32 = 431960;

const COMMUNITY_BASE: &str = "https://steamcommunity.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid Steam username '{0}'")]
    InvalidUsername(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("subscription page {url} could not be parsed: {reason}")]
    Parse { url: String, reason: String },
    #[error("invalid scraper pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Builds the subscription listing URL for `username`, page `page` (1-based).
pub fn subscriptions_url(username: &str, page: u32) -> Result<Url, FetchError> {
    let trimmed = username.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(FetchError::InvalidUsername(username.to_string()));
    }
    let mut url = Url::parse(COMMUNITY_BASE)
        .map_err(|_| FetchError::InvalidUsername(username.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidUsername(username.to_string()))?
        .pop_if_empty()
        .extend(["id", trimmed, "myworkshopfiles", ""]);
    url.query_pairs_mut()
        .append_pair("appid", &WALLPAPER_ENGINE_APP_ID.to_string())
        .append_pair("browsefilter", "mysubscriptions")
        .append_pair("p", &page.to_string());
    Ok(url)
}

/// Extracts subscribed items from a `myworkshopfiles` page.
///
/// Each subscription is rendered as a block whose element id is
/// `Subscription<publishedfileid>`; the preview is the first image in the
/// block, preferring the one tagged `workshopItemPreviewImage`.
#[derive(Debug, Clone)]
pub struct SubscriptionParser {
    details_link: Regex,
    image_tag: Regex,
    image_src: Regex,
}

impl SubscriptionParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            details_link: Regex::new(r"filedetails/\?id=([0-9]+)")?,
            image_tag: Regex::new(r"<img[^>]*>")?,
            image_src: Regex::new(r#"src="([^"]+)""#)?,
        })
    }

    pub fn parse(&self, html: &str) -> Vec<WallpaperInfo> {
        let mut items = Vec::new();
        for block in html.split("id=\"Subscription").skip(1) {
            let leading: String = block.chars().take_while(char::is_ascii_digit).collect();
            let id = if leading.is_empty() {
                match self.details_link.captures(block) {
                    Some(caps) => caps[1].to_string(),
                    None => continue,
                }
            } else {
                leading
            };
            items.push(WallpaperInfo::new(id, self.preview_url(block)));
        }
        items
    }

    fn preview_url(&self, block: &str) -> String {
        let mut fallback = None;
        for tag in self.image_tag.find_iter(block) {
            let Some(src) = self.image_src.captures(tag.as_str()) else {
                continue;
            };
            let src = decode_entities(&src[1]);
            if tag.as_str().contains("workshopItemPreviewImage") {
                return src;
            }
            fallback.get_or_insert(src);
        }
        fallback.unwrap_or_default()
    }
}

/// Convenience wrapper for one-off parsing.
pub fn parse_subscriptions(html: &str) -> Result<Vec<WallpaperInfo>, FetchError> {
    Ok(SubscriptionParser::new()?.parse(html))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn looks_logged_out(final_url: &Url, body: &str) -> bool {
    final_url.path().starts_with("/login") || body.contains("g_steamID = false")
}

#[derive(Debug, Clone)]
pub struct SteamWorkshopClient {
    http: Client,
    username: String,
    max_pages: u32,
    parser: SubscriptionParser,
}

impl SteamWorkshopClient {
    pub fn new(username: impl Into<String>, max_pages: u32) -> Result<Self, FetchError> {
        let username = username.into();
        subscriptions_url(&username, 1)?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            http,
            username,
            max_pages: max_pages.max(1),
            parser: SubscriptionParser::new()?,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn fetch_page(
        &self,
        credentials: &SessionCredentials,
        page: u32,
    ) -> Result<String, SourceError> {
        let url = subscriptions_url(&self.username, page)?;
        debug!(%url, page, "requesting workshop subscriptions");
        let response = self
            .http
            .get(url.clone())
            .header(COOKIE, credentials.cookie_header())
            .header(USER_AGENT, concat!("wpectl/", env!("CARGO_PKG_VERSION")))
            .send()
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AuthError::Rejected(format!("HTTP {}", status.as_u16())).into());
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let final_url = response.url().clone();
        let body = response.text().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        if looks_logged_out(&final_url, &body) {
            return Err(AuthError::Rejected("redirected to the login page".into()).into());
        }
        Ok(body)
    }
}

impl WallpaperSource for SteamWorkshopClient {
    fn list_wallpapers(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Vec<WallpaperInfo>, SourceError> {
        let mut seen = HashSet::new();
        let mut wallpapers = Vec::new();
        for page in 1..=self.max_pages {
            let body = self.fetch_page(credentials, page)?;
            let items = self.parser.parse(&body);
            if page == 1 && items.is_empty() && !body.contains("myworkshopfiles") {
                return Err(FetchError::Parse {
                    url: subscriptions_url(&self.username, page)?.to_string(),
                    reason: "no subscription listing found".into(),
                }
                .into());
            }

            let before = wallpapers.len();
            for item in items {
                if seen.insert(item.id.clone()) {
                    wallpapers.push(item);
                }
            }
            let added = wallpapers.len() - before;
            debug!(page, added, "parsed subscription page");

            let has_next = body.contains(&format!("p={}", page + 1));
            if added == 0 || !has_next {
                break;
            }
        }
        info!(
            user = %self.username,
            count = wallpapers.len(),
            "fetched workshop subscriptions"
        );
        Ok(wallpapers)
    }
}
