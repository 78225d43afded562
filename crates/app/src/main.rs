mod enrich;
mod notifier;
mod problem;
mod readiness;
mod reconcile;
mod router;
mod signature;
mod telemetry;
mod webhook;

use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info, warn};
use twi_relay_core::StreamerRoster;
use twi_relay_twitch::{HelixClient, RetryPolicy, TwitchApi, TwitchOAuthClient};
use twi_relay_util::{load_env_file, AppConfig};

use crate::enrich::{Enricher, TwitchLookup};
use crate::notifier::DiscordNotifier;
use crate::readiness::Readiness;
use crate::reconcile::CallbackTarget;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let roster = Arc::new(StreamerRoster::load(&config.streamers_path)?);
    info!(
        stage = "app",
        path = %config.streamers_path.display(),
        streamers = roster.len(),
        "loaded streamer roster"
    );
    if roster.is_empty() {
        warn!(stage = "app", "streamer roster is empty, every subscription will be removed");
    }

    let http = reqwest::Client::builder().build()?;
    let oauth = TwitchOAuthClient::new(
        config.twitch_client_id.clone(),
        config.twitch_client_secret.clone(),
        config.twitch_oauth_base_url.clone(),
        http.clone(),
    );
    let helix = HelixClient::new(
        config.twitch_client_id.clone(),
        config.twitch_api_base_url.clone(),
        http.clone(),
    );
    let api = TwitchApi::new(oauth, helix);
    api.authenticate().await?;
    info!(stage = "app", "twitch client connected");

    let readiness = Readiness::new();
    let policy = RetryPolicy::new(config.notify_retry_max, config.notify_retry_base);
    let enricher = Enricher::new(
        Arc::new(TwitchLookup::new(api.clone(), policy)),
        Arc::new(DiscordNotifier::new(http, config.discord_webhook.clone())),
        roster.clone(),
        readiness.clone(),
    );
    let secret: Arc<[u8]> = Arc::from(config.hook_secret.as_bytes());
    let state = router::AppState::new(metrics, secret, enricher, readiness.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = tokio::spawn(async move {
        axum::serve(listener, router::app_router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let target = CallbackTarget {
        callback_url: config.callback_url.to_string(),
        secret: config.hook_secret.clone(),
    };
    match reconcile::reconcile(&api, &roster, &target).await {
        Ok(_) => {
            readiness.mark_ready();
            info!(stage = "app", "listening for twitch hooks");
        }
        Err(err) => {
            error!(stage = "app", error = %err, "subscription setup failed, shutting down");
            server.abort();
            return Err(err.into());
        }
    }

    server.await??;
    info!(stage = "app", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(stage = "app", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(stage = "app", "shutdown signal received");
}
