use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;
use twi_relay_core::NormalizedLiveEvent;
use url::Url;

pub const EMBED_COLOR: u32 = 9_455_359;
pub const EMBED_FOOTER: &str = "Memerson's Notifs";
pub const WEBHOOK_USERNAME: &str = "BookDub Stream Notifications";
pub const WEBHOOK_AVATAR_URL: &str =
    "https://cdn.discordapp.com/icons/1123463570445844480/6211998a5621eb19fe58701d30def49d.webp?size=240";

/// Sink for live announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NormalizedLiveEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("discord rejected the message: unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Posts announcements to a Discord channel webhook.
#[derive(Clone)]
pub struct DiscordNotifier {
    http: Client,
    webhook_url: Url,
}

impl DiscordNotifier {
    pub fn new(http: Client, webhook_url: Url) -> Self {
        Self { http, webhook_url }
    }

    async fn post(&self, payload: &Value) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.webhook_url.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(NotifyError::Status { status, body });
        }
        info!(stage = "notify", status = status.as_u16(), "discord accepted message");
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, event: &NormalizedLiveEvent) -> Result<(), NotifyError> {
        self.post(&discord_message(event)).await
    }
}

/// Webhook body for a live announcement.
pub fn discord_message(event: &NormalizedLiveEvent) -> Value {
    json!({
        "content": event.going_live_message,
        "tts": false,
        "embeds": [{
            "description": "",
            "fields": [
                { "name": "Game", "value": event.game, "inline": true },
                { "name": "Viewers", "value": "Yes Please", "inline": true },
            ],
            "author": {
                "name": format!("{} is live now on Twitch!", event.streamer_name),
                "url": event.stream_url,
                "icon_url": event.profile_url,
            },
            "title": event.title,
            "image": { "url": event.thumbnail_url },
            "url": event.stream_url,
            "color": EMBED_COLOR,
            "footer": { "text": EMBED_FOOTER },
            "timestamp": event.stream_start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }],
        "components": [],
        "username": WEBHOOK_USERNAME,
        "avatar_url": WEBHOOK_AVATAR_URL,
    })
}
