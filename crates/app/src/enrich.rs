use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use twi_relay_core::{LiveEventParts, NormalizedLiveEvent, StreamerRoster};
use twi_relay_twitch::{
    HelixStream, HelixUser, RetryError, RetryPolicy, TwitchApi, TwitchApiError, STREAM_ONLINE,
};

use crate::notifier::{Notifier, NotifyError};
use crate::readiness::Readiness;

/// Remote lookups needed to turn a `stream.online` event into an announcement.
#[async_trait]
pub trait LiveLookup: Send + Sync {
    async fn user(&self, login: &str) -> Result<HelixUser, RetryError<TwitchApiError>>;
    async fn live_stream(&self, login: &str) -> Result<HelixStream, RetryError<TwitchApiError>>;
}

/// [`LiveLookup`] backed by Helix with backoff on both calls.
pub struct TwitchLookup {
    api: TwitchApi,
    policy: RetryPolicy,
}

impl TwitchLookup {
    pub fn new(api: TwitchApi, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl LiveLookup for TwitchLookup {
    async fn user(&self, login: &str) -> Result<HelixUser, RetryError<TwitchApiError>> {
        self.api.get_user_by_name_with_retry(login, &self.policy).await
    }

    async fn live_stream(&self, login: &str) -> Result<HelixStream, RetryError<TwitchApiError>> {
        self.api
            .get_stream_by_name_with_retry(login, &self.policy)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    subscription: NotificationSubscription,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct NotificationSubscription {
    #[serde(rename = "type")]
    subscription_type: String,
}

/// `event` block of a `stream.online` notification.
#[derive(Debug, Deserialize)]
struct StreamOnlineEvent {
    broadcaster_user_id: String,
    broadcaster_user_login: String,
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("malformed notification payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("unsupported subscription type {0}")]
    UnsupportedSubscription(String),
    #[error("{0} is not in the streamer roster")]
    UnknownStreamer(String),
    #[error(transparent)]
    Lookup(#[from] RetryError<TwitchApiError>),
    #[error("notifier failed: {0}")]
    Notify(#[from] NotifyError),
}

impl EnrichError {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Payload(_) => "invalid_payload",
            Self::UnsupportedSubscription(_) => "unsupported",
            Self::UnknownStreamer(_) => "unknown_streamer",
            Self::Lookup(_) => "lookup_failed",
            Self::Notify(_) => "notify_failed",
        }
    }
}

/// Turns verified notifications into announcements, off the request path.
#[derive(Clone)]
pub struct Enricher {
    lookup: Arc<dyn LiveLookup>,
    notifier: Arc<dyn Notifier>,
    roster: Arc<StreamerRoster>,
    readiness: Readiness,
}

impl Enricher {
    pub fn new(
        lookup: Arc<dyn LiveLookup>,
        notifier: Arc<dyn Notifier>,
        roster: Arc<StreamerRoster>,
        readiness: Readiness,
    ) -> Self {
        Self {
            lookup,
            notifier,
            roster,
            readiness,
        }
    }

    /// Spawns [`Enricher::process`] and logs its outcome inside the task.
    pub fn dispatch(&self, message_id: String, payload: Value) -> JoinHandle<()> {
        let enricher = self.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let result = enricher.process(payload).await;
            histogram!("enrichment_latency_seconds").record(start.elapsed().as_secs_f64());

            match result {
                Ok(event) => {
                    counter!("enrichment_total", "result" => "sent").increment(1);
                    counter!("notifier_deliveries_total", "result" => "sent").increment(1);
                    info!(
                        stage = "enrich",
                        %message_id,
                        streamer = %event.streamer_name,
                        game = %event.game,
                        "live announcement delivered"
                    );
                }
                Err(err) => {
                    counter!("enrichment_total", "result" => err.metric_label()).increment(1);
                    if matches!(err, EnrichError::Notify(_)) {
                        counter!("notifier_deliveries_total", "result" => "failed").increment(1);
                    }
                    if matches!(err, EnrichError::UnsupportedSubscription(_)) {
                        warn!(stage = "enrich", %message_id, error = %err, "notification skipped");
                    } else {
                        error!(stage = "enrich", %message_id, error = %err, "enrichment failed");
                    }
                }
            }
        })
    }

    /// Resolves the stream behind a `stream.online` notification and hands the
    /// assembled event to the notifier. Waits for startup readiness first.
    pub async fn process(&self, payload: Value) -> Result<NormalizedLiveEvent, EnrichError> {
        let envelope: NotificationEnvelope = serde_json::from_value(payload)?;
        if envelope.subscription.subscription_type != STREAM_ONLINE {
            return Err(EnrichError::UnsupportedSubscription(
                envelope.subscription.subscription_type,
            ));
        }
        let event: StreamOnlineEvent = serde_json::from_value(envelope.event)?;
        let login = event.broadcaster_user_login.as_str();

        self.readiness.wait().await;

        let going_live_message = self
            .roster
            .going_live_message(login)
            .ok_or_else(|| EnrichError::UnknownStreamer(login.to_string()))?;

        let user = self.lookup.user(login).await?;
        if user.id != event.broadcaster_user_id {
            // The roster is keyed by login, so the announcement still goes out.
            warn!(
                stage = "enrich",
                %login,
                event_user_id = %event.broadcaster_user_id,
                helix_user_id = %user.id,
                "broadcaster id differs from helix user"
            );
        }
        let stream = self.lookup.live_stream(login).await?;

        let live_event = NormalizedLiveEvent::assemble(LiveEventParts {
            game_name: &stream.game_name,
            title: &stream.title,
            thumbnail_template: &stream.thumbnail_url,
            user_login: &stream.user_login,
            started_at: stream.started_at,
            profile_image_url: &user.profile_image_url,
            going_live_message,
        });

        self.notifier.notify(&live_event).await?;
        Ok(live_event)
    }
}
