use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use twi_relay_core::{DesiredSubscription, ExistingSubscription, ReconcilePlan, StreamerRoster};
use twi_relay_twitch::{EventSubSubscription, HelixUser, TwitchApi, TwitchApiError};

/// Twitch calls the startup reconciliation needs.
#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    async fn list_subscriptions(&self) -> Result<Vec<EventSubSubscription>, TwitchApiError>;
    async fn get_user_by_name(&self, login: &str) -> Result<Option<HelixUser>, TwitchApiError>;
    async fn get_users_by_ids(&self, ids: &[&str]) -> Result<Vec<HelixUser>, TwitchApiError>;
    async fn create_online_subscription(
        &self,
        user_id: &str,
        callback_url: &str,
        secret: &str,
    ) -> Result<EventSubSubscription, TwitchApiError>;
    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), TwitchApiError>;
}

#[async_trait]
impl SubscriptionBackend for TwitchApi {
    async fn list_subscriptions(&self) -> Result<Vec<EventSubSubscription>, TwitchApiError> {
        TwitchApi::list_subscriptions(self).await
    }

    async fn get_user_by_name(&self, login: &str) -> Result<Option<HelixUser>, TwitchApiError> {
        TwitchApi::get_user_by_name(self, login).await
    }

    async fn get_users_by_ids(&self, ids: &[&str]) -> Result<Vec<HelixUser>, TwitchApiError> {
        TwitchApi::get_users_by_ids(self, ids).await
    }

    async fn create_online_subscription(
        &self,
        user_id: &str,
        callback_url: &str,
        secret: &str,
    ) -> Result<EventSubSubscription, TwitchApiError> {
        TwitchApi::create_online_subscription(self, user_id, callback_url, secret).await
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), TwitchApiError> {
        TwitchApi::delete_subscription(self, subscription_id).await
    }
}

/// Where new subscriptions should deliver, and the secret they sign with.
#[derive(Clone)]
pub struct CallbackTarget {
    pub callback_url: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Streamer names that got a new subscription.
    pub created: Vec<String>,
    /// Streamer names whose subscription already existed.
    pub kept: Vec<String>,
    /// Ids of deleted subscriptions.
    pub deleted: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list subscriptions: {0}")]
    List(#[source] TwitchApiError),
    #[error("failed to resolve streamer {streamer}: {source}")]
    Lookup {
        streamer: String,
        #[source]
        source: TwitchApiError,
    },
    #[error("streamer {0} does not exist on twitch")]
    UnknownUser(String),
    #[error("failed to subscribe to {streamer}: {source}")]
    Create {
        streamer: String,
        #[source]
        source: TwitchApiError,
    },
    #[error("failed to delete subscription {id}: {source}")]
    Delete {
        id: String,
        #[source]
        source: TwitchApiError,
    },
}

/// Converges Twitch's `stream.online` subscriptions onto the roster.
///
/// Every streamer is resolved before anything is created or deleted, so an
/// unknown login or a failed lookup leaves the remote state untouched.
pub async fn reconcile(
    backend: &dyn SubscriptionBackend,
    roster: &StreamerRoster,
    target: &CallbackTarget,
) -> Result<ReconcileReport, ReconcileError> {
    let actual = backend
        .list_subscriptions()
        .await
        .map_err(ReconcileError::List)?;
    info!(
        stage = "reconcile",
        existing = actual.len(),
        configured = roster.len(),
        "fetched current subscriptions"
    );

    let mut desired = Vec::with_capacity(roster.len());
    for streamer in roster.streamers() {
        let name = streamer.streamer_name.as_str();
        let user = backend
            .get_user_by_name(name)
            .await
            .map_err(|source| ReconcileError::Lookup {
                streamer: name.to_string(),
                source,
            })?
            .ok_or_else(|| ReconcileError::UnknownUser(name.to_string()))?;
        desired.push(DesiredSubscription {
            streamer_name: name.to_string(),
            broadcaster_id: user.id,
        });
    }

    let existing = actual
        .into_iter()
        .map(|subscription| ExistingSubscription {
            broadcaster_id: subscription
                .broadcaster_user_id()
                .unwrap_or_default()
                .to_string(),
            id: subscription.id,
        })
        .collect();
    let plan = ReconcilePlan::compute(&desired, existing);

    let mut report = ReconcileReport::default();
    for kept in &plan.keep {
        info!(
            stage = "reconcile",
            streamer = %kept.streamer_name,
            subscription_id = %kept.subscription_id,
            "subscription already exists"
        );
        counter!("reconcile_actions_total", "action" => "keep").increment(1);
        report.kept.push(kept.streamer_name.clone());
    }

    for wanted in &plan.create {
        let created = backend
            .create_online_subscription(
                &wanted.broadcaster_id,
                &target.callback_url,
                &target.secret,
            )
            .await
            .map_err(|source| ReconcileError::Create {
                streamer: wanted.streamer_name.clone(),
                source,
            })?;
        info!(
            stage = "reconcile",
            streamer = %wanted.streamer_name,
            broadcaster_id = %wanted.broadcaster_id,
            subscription_id = %created.id,
            status = %created.status,
            "created subscription"
        );
        counter!("reconcile_actions_total", "action" => "create").increment(1);
        report.created.push(wanted.streamer_name.clone());
    }

    let names = orphan_names(backend, &plan.delete).await;
    for orphan in &plan.delete {
        let name = names
            .get(orphan.broadcaster_id.as_str())
            .map(String::as_str)
            .unwrap_or("<unknown>");
        backend
            .delete_subscription(&orphan.id)
            .await
            .map_err(|source| ReconcileError::Delete {
                id: orphan.id.clone(),
                source,
            })?;
        info!(
            stage = "reconcile",
            streamer = name,
            broadcaster_id = %orphan.broadcaster_id,
            subscription_id = %orphan.id,
            "deleted orphaned subscription"
        );
        counter!("reconcile_actions_total", "action" => "delete").increment(1);
        report.deleted.push(orphan.id.clone());
    }

    info!(
        stage = "reconcile",
        created = report.created.len(),
        kept = report.kept.len(),
        deleted = report.deleted.len(),
        "finished subscription setup"
    );
    Ok(report)
}

/// Display names for the orphans' broadcasters, keyed by id. Only used for
/// logging, so a failed lookup yields an empty map.
async fn orphan_names(
    backend: &dyn SubscriptionBackend,
    orphans: &[ExistingSubscription],
) -> HashMap<String, String> {
    let mut ids: Vec<&str> = orphans
        .iter()
        .map(|orphan| orphan.broadcaster_id.as_str())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return HashMap::new();
    }

    match backend.get_users_by_ids(&ids).await {
        Ok(users) => users
            .into_iter()
            .map(|user| (user.id, user.display_name))
            .collect(),
        Err(err) => {
            warn!(stage = "reconcile", error = %err, "could not resolve orphan broadcaster names");
            HashMap::new()
        }
    }
}
