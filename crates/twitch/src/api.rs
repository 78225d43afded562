use std::{future::Future, sync::Arc};

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::helix::{
    CreateSubscriptionRequest, EventSubSubscription, HelixClient, HelixError, HelixStream,
    HelixUser, StreamQuery, UserQuery,
};
use crate::oauth::{OAuthError, TwitchOAuthClient};
use crate::retry::{RetryError, RetryPolicy};
use crate::token::TokenCell;

/// Authenticated Twitch client owning the app access token.
///
/// Every Helix call is retried exactly once after re-authenticating when
/// Twitch answers 401. A second 401 is returned to the caller.
#[derive(Clone)]
pub struct TwitchApi {
    oauth: TwitchOAuthClient,
    helix: HelixClient,
    token: Arc<TokenCell>,
}

impl TwitchApi {
    pub fn new(oauth: TwitchOAuthClient, helix: HelixClient) -> Self {
        Self {
            oauth,
            helix,
            token: Arc::new(TokenCell::new()),
        }
    }

    /// Exchanges the client credentials for a fresh app token.
    ///
    /// Rejected credentials are returned as [`TwitchApiError::Auth`] without retrying.
    pub async fn authenticate(&self) -> Result<(), TwitchApiError> {
        self.token.replace_with(|| self.fetch_token()).await?;
        Ok(())
    }

    pub async fn get_user_by_name(
        &self,
        login: &str,
    ) -> Result<Option<HelixUser>, TwitchApiError> {
        Ok(self.get_users_by_names(&[login]).await?.into_iter().next())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<HelixUser>, TwitchApiError> {
        Ok(self.get_users_by_ids(&[id]).await?.into_iter().next())
    }

    /// Batched lookup. Results come back in Twitch's order, not input order.
    pub async fn get_users_by_names(
        &self,
        logins: &[&str],
    ) -> Result<Vec<HelixUser>, TwitchApiError> {
        if logins.is_empty() {
            return Ok(Vec::new());
        }
        self.authorized(|token| async move {
            self.helix
                .get_users(&token, UserQuery::Logins(logins))
                .await
        })
        .await
    }

    /// Batched lookup. Results come back in Twitch's order, not input order.
    pub async fn get_users_by_ids(&self, ids: &[&str]) -> Result<Vec<HelixUser>, TwitchApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.authorized(|token| async move {
            self.helix.get_users(&token, UserQuery::Ids(ids)).await
        })
        .await
    }

    /// Current live stream for `login`, `None` while offline.
    pub async fn get_stream_by_name(
        &self,
        login: &str,
    ) -> Result<Option<HelixStream>, TwitchApiError> {
        let streams = self
            .authorized(|token| async move {
                self.helix
                    .get_streams(&token, StreamQuery::UserLogin(login))
                    .await
            })
            .await?;
        Ok(streams.into_iter().next())
    }

    pub async fn get_stream_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<HelixStream>, TwitchApiError> {
        let streams = self
            .authorized(|token| async move {
                self.helix
                    .get_streams(&token, StreamQuery::UserId(user_id))
                    .await
            })
            .await?;
        Ok(streams.into_iter().next())
    }

    /// User lookup for the notification path. A missing user counts as a
    /// failed attempt.
    pub async fn get_user_by_name_with_retry(
        &self,
        login: &str,
        policy: &RetryPolicy,
    ) -> Result<HelixUser, RetryError<TwitchApiError>> {
        policy
            .run("get_user_by_name", || async move {
                self.get_user_by_name(login)
                    .await?
                    .ok_or_else(|| TwitchApiError::UserNotFound(login.to_string()))
            })
            .await
    }

    /// Stream lookup for the notification path. Helix can lag behind the
    /// `stream.online` event, so an empty result counts as a failed attempt.
    pub async fn get_stream_by_name_with_retry(
        &self,
        login: &str,
        policy: &RetryPolicy,
    ) -> Result<HelixStream, RetryError<TwitchApiError>> {
        policy
            .run("get_stream_by_name", || async move {
                self.get_stream_by_name(login)
                    .await?
                    .ok_or_else(|| TwitchApiError::StreamOffline(login.to_string()))
            })
            .await
    }

    /// Lists every subscription owned by this client id, following pagination.
    pub async fn list_subscriptions(&self) -> Result<Vec<EventSubSubscription>, TwitchApiError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let after = cursor.as_deref();
            let page = self
                .authorized(|token| async move {
                    self.helix.list_subscriptions(&token, after).await
                })
                .await?;
            subscriptions.extend(page.data);

            match page.cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(subscriptions)
    }

    pub async fn create_online_subscription(
        &self,
        user_id: &str,
        callback_url: &str,
        secret: &str,
    ) -> Result<EventSubSubscription, TwitchApiError> {
        let request =
            CreateSubscriptionRequest::stream_online_webhook(user_id, callback_url, secret);
        let request = &request;
        self.authorized(|token| async move {
            self.helix.create_subscription(&token, request).await
        })
        .await
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<(), TwitchApiError> {
        self.authorized(|token| async move {
            self.helix.delete_subscription(&token, subscription_id).await
        })
        .await
    }

    async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, TwitchApiError>
    where
        F: Fn(Arc<str>) -> Fut,
        Fut: Future<Output = Result<T, HelixError>>,
    {
        let token = match self.token.current().await {
            Some(token) => token,
            None => {
                self.token
                    .refresh_if_stale(None, || self.fetch_token())
                    .await?
            }
        };

        match call(token.clone()).await {
            Err(err) if err.is_unauthorized() => {
                warn!(stage = "twitch", "access token rejected, re-authenticating");
                counter!("twitch_reauth_total").increment(1);
                let fresh = self
                    .token
                    .refresh_if_stale(Some(&*token), || self.fetch_token())
                    .await?;
                Ok(call(fresh).await?)
            }
            other => Ok(other?),
        }
    }

    async fn fetch_token(&self) -> Result<String, TwitchApiError> {
        let token = self.oauth.client_credentials().await?;
        info!(
            stage = "twitch",
            expires_in = ?token.expires_in,
            "obtained app access token"
        );
        Ok(token.access_token)
    }
}

/// Errors produced by [`TwitchApi`].
#[derive(Debug, Error)]
pub enum TwitchApiError {
    #[error("authentication failed: {0}")]
    Auth(#[from] OAuthError),
    #[error("request failed: {0}")]
    Helix(#[from] HelixError),
    #[error("twitch user {0} not found")]
    UserNotFound(String),
    #[error("{0} has no live stream")]
    StreamOffline(String),
}

impl TwitchApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Helix(err) if err.is_unauthorized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::{Client, StatusCode};
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    fn api(server: &MockServer) -> TwitchApi {
        let http = Client::builder().build().expect("client");
        let oauth = TwitchOAuthClient::new(
            "client-id",
            "client-secret",
            Url::parse(&server.url("/oauth2/")).expect("url"),
            http.clone(),
        );
        let helix = HelixClient::new(
            "client-id",
            Url::parse(&server.url("/helix/")).expect("url"),
            http,
        );
        TwitchApi::new(oauth, helix)
    }

    fn user_body(id: &str, login: &str) -> serde_json::Value {
        json!({
            "data": [{
                "id": id,
                "login": login,
                "display_name": login.to_uppercase(),
                "profile_image_url": format!("https://cdn/{login}.png")
            }]
        })
    }

    async fn mock_token<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
        let token = token.to_string();
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200).json_body(json!({
                    "access_token": token,
                    "expires_in": 3600,
                    "token_type": "bearer"
                }));
            })
            .await
    }

    #[tokio::test]
    async fn first_request_authenticates_lazily() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        let token = mock_token(&server, "fresh").await;
        let users = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .query_param("login", "alpha")
                    .header("Authorization", "Bearer fresh");
                then.status(200).json_body(user_body("1", "alpha"));
            })
            .await;

        let user = api
            .get_user_by_name("alpha")
            .await
            .expect("lookup")
            .expect("user");

        assert_eq!(user.id, "1");
        token.assert_hits_async(1).await;
        users.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn unauthorized_call_reauthenticates_once_and_retries() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("stale").await;
        let token = mock_token(&server, "fresh").await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .header("Authorization", "Bearer stale");
                then.status(401).body("invalid oauth token");
            })
            .await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .header("Authorization", "Bearer fresh");
                then.status(200).json_body(user_body("7", "alpha"));
            })
            .await;

        let user = api
            .get_user_by_id("7")
            .await
            .expect("lookup")
            .expect("user");

        assert_eq!(user.login, "alpha");
        token.assert_hits_async(1).await;
        rejected.assert_hits_async(1).await;
        accepted.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn second_unauthorized_propagates_without_third_attempt() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("stale").await;
        let token = mock_token(&server, "fresh").await;
        let users = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/users");
                then.status(401).body("invalid oauth token");
            })
            .await;

        let err = api
            .get_user_by_name("alpha")
            .await
            .expect_err("should fail");

        assert!(err.is_unauthorized());
        match err {
            TwitchApiError::Helix(HelixError::Status { status, body }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "invalid oauth token");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        token.assert_hits_async(1).await;
        users.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_reauthentication() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("stale").await;
        let token = mock_token(&server, "fresh").await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .header("Authorization", "Bearer stale");
                then.status(401);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .header("Authorization", "Bearer fresh");
                then.status(200).json_body(user_body("1", "alpha"));
            })
            .await;

        let (first, second, third) = tokio::join!(
            api.get_user_by_name("alpha"),
            api.get_user_by_name("alpha"),
            api.get_user_by_name("alpha"),
        );

        assert!(first.expect("first").is_some());
        assert!(second.expect("second").is_some());
        assert!(third.expect("third").is_some());
        token.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn rejected_credentials_fail_authentication() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(400).body("invalid client");
            })
            .await;

        let err = api.authenticate().await.expect_err("should fail");
        assert!(matches!(err, TwitchApiError::Auth(OAuthError::Status { .. })));
    }

    #[tokio::test]
    async fn other_error_statuses_are_not_retried() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("token").await;
        let token = mock_token(&server, "fresh").await;
        let streams = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/streams");
                then.status(400).body("bad request");
            })
            .await;

        let err = api
            .get_stream_by_user_id("1")
            .await
            .expect_err("should fail");

        assert!(err.to_string().contains("bad request"));
        token.assert_hits_async(0).await;
        streams.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn stream_lookup_retries_then_wraps_last_error() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("token").await;
        let streams = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .query_param("user_login", "alpha");
                then.status(503).body("upstream down");
            })
            .await;

        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let err = api
            .get_stream_by_name_with_retry("alpha", &policy)
            .await
            .expect_err("should exhaust retries");

        streams.assert_hits_async(4).await;
        assert_eq!(err.attempts, 4);
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn offline_stream_counts_as_failed_attempt() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("token").await;
        let streams = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/streams");
                then.status(200).json_body(json!({ "data": [], "pagination": {} }));
            })
            .await;

        let policy = RetryPolicy::new(1, Duration::from_millis(1));
        let err = api
            .get_stream_by_name_with_retry("alpha", &policy)
            .await
            .expect_err("offline");

        streams.assert_hits_async(2).await;
        assert!(matches!(err.last, TwitchApiError::StreamOffline(ref login) if login == "alpha"));
    }

    #[tokio::test]
    async fn list_subscriptions_follows_cursor() {
        let server = MockServer::start_async().await;
        let api = api(&server);
        api.token.set("token").await;
        // Mocks are matched in creation order, so the cursor-specific page goes first.
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/eventsub/subscriptions")
                    .query_param("after", "cursor-1");
                then.status(200).json_body(json!({
                    "data": [{
                        "id": "sub-2",
                        "type": "stream.online",
                        "version": "1",
                        "status": "enabled",
                        "condition": { "broadcaster_user_id": "2" },
                        "transport": { "method": "webhook", "callback": "https://relay/" }
                    }],
                    "pagination": {}
                }));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/eventsub/subscriptions");
                then.status(200).json_body(json!({
                    "data": [{
                        "id": "sub-1",
                        "type": "stream.online",
                        "version": "1",
                        "status": "enabled",
                        "condition": { "broadcaster_user_id": "1" },
                        "transport": { "method": "webhook", "callback": "https://relay/" }
                    }],
                    "pagination": { "cursor": "cursor-1" }
                }));
            })
            .await;

        let subscriptions = api.list_subscriptions().await.expect("list");

        let ids: Vec<&str> = subscriptions.iter().map(|sub| sub.id.as_str()).collect();
        assert_eq!(ids, vec!["sub-1", "sub-2"]);
        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        let server = MockServer::start_async().await;
        let api = api(&server);

        let users = api.get_users_by_ids(&[]).await.expect("empty batch");
        assert!(users.is_empty());
    }
}
