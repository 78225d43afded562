use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const THUMBNAIL_WIDTH: u32 = 716;
pub const THUMBNAIL_HEIGHT: u32 = 404;
pub const STREAM_URL_BASE: &str = "https://twitch.tv/";

/// Payload handed to the notifier when a configured streamer goes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLiveEvent {
    pub game: String,
    pub title: String,
    #[serde(rename = "thumbnailURL")]
    pub thumbnail_url: String,
    #[serde(rename = "streamerName")]
    pub streamer_name: String,
    #[serde(rename = "streamStart")]
    pub stream_start: DateTime<Utc>,
    #[serde(rename = "profileURL")]
    pub profile_url: String,
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    #[serde(rename = "goingLiveMessage")]
    pub going_live_message: String,
}

/// Stream and user fields needed to assemble a [`NormalizedLiveEvent`].
#[derive(Debug, Clone, Copy)]
pub struct LiveEventParts<'a> {
    pub game_name: &'a str,
    pub title: &'a str,
    /// Helix thumbnail template containing `{width}` and `{height}`.
    pub thumbnail_template: &'a str,
    pub user_login: &'a str,
    pub started_at: DateTime<Utc>,
    pub profile_image_url: &'a str,
    pub going_live_message: &'a str,
}

impl NormalizedLiveEvent {
    pub fn assemble(parts: LiveEventParts<'_>) -> Self {
        Self {
            game: parts.game_name.to_string(),
            title: parts.title.to_string(),
            thumbnail_url: sized_thumbnail(parts.thumbnail_template),
            streamer_name: parts.user_login.to_string(),
            stream_start: parts.started_at,
            profile_url: parts.profile_image_url.to_string(),
            stream_url: format!("{STREAM_URL_BASE}{}", parts.user_login),
            going_live_message: parts.going_live_message.to_string(),
        }
    }
}

/// Fills the Helix thumbnail template with the embed dimensions.
pub fn sized_thumbnail(template: &str) -> String {
    template
        .replace("{width}", &THUMBNAIL_WIDTH.to_string())
        .replace("{height}", &THUMBNAIL_HEIGHT.to_string())
}
