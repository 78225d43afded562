use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const STREAM_ONLINE: &str = "stream.online";
const SUBSCRIPTIONS_PATH: &str = "eventsub/subscriptions";

/// Client for the Helix endpoints the relay uses: users, streams and
/// EventSub subscriptions. Tokens are passed per call; see [`crate::TwitchApi`]
/// for the authenticated wrapper.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Fetches users by login or id. Twitch does not preserve input order.
    pub async fn get_users(
        &self,
        access_token: &str,
        query: UserQuery<'_>,
    ) -> Result<Vec<HelixUser>, HelixError> {
        let mut url = self.base_url.join("users")?;
        {
            let mut pairs = url.query_pairs_mut();
            let (key, values) = match query {
                UserQuery::Logins(logins) => ("login", logins),
                UserQuery::Ids(ids) => ("id", ids),
            };
            for value in values {
                pairs.append_pair(key, value);
            }
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataEnvelope<HelixUser>>(response)
            .await
            .map(|envelope| envelope.data)
    }

    /// Fetches live streams for a single user. Offline users yield an empty list.
    pub async fn get_streams(
        &self,
        access_token: &str,
        query: StreamQuery<'_>,
    ) -> Result<Vec<HelixStream>, HelixError> {
        let mut url = self.base_url.join("streams")?;
        {
            let mut pairs = url.query_pairs_mut();
            match query {
                StreamQuery::UserLogin(login) => pairs.append_pair("user_login", login),
                StreamQuery::UserId(id) => pairs.append_pair("user_id", id),
            };
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataEnvelope<HelixStream>>(response)
            .await
            .map(|envelope| envelope.data)
    }

    /// Fetches one page of EventSub subscriptions owned by this client id.
    pub async fn list_subscriptions(
        &self,
        access_token: &str,
        after: Option<&str>,
    ) -> Result<SubscriptionPage, HelixError> {
        let mut url = self.base_url.join(SUBSCRIPTIONS_PATH)?;
        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", after);
        }

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataEnvelope<EventSubSubscription>>(response)
            .await
            .map(SubscriptionPage::from)
    }

    /// Creates an EventSub subscription and returns the pending record.
    pub async fn create_subscription(
        &self,
        access_token: &str,
        request: &CreateSubscriptionRequest<'_>,
    ) -> Result<EventSubSubscription, HelixError> {
        let url = self.base_url.join(SUBSCRIPTIONS_PATH)?;
        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(request)
            .send()
            .await?;

        parse_json::<DataEnvelope<EventSubSubscription>>(response)
            .await?
            .data
            .into_iter()
            .next()
            .ok_or(HelixError::EmptyResponse("create subscription"))
    }

    /// Deletes an EventSub subscription. Twitch answers 204 on success.
    pub async fn delete_subscription(
        &self,
        access_token: &str,
        subscription_id: &str,
    ) -> Result<(), HelixError> {
        let mut url = self.base_url.join(SUBSCRIPTIONS_PATH)?;
        url.query_pairs_mut().append_pair("id", subscription_id);

        let response = self
            .authorized_request(Method::DELETE, url, access_token)
            .send()
            .await?;

        ensure_success(response).await
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// Selector for the users endpoint.
#[derive(Debug, Clone, Copy)]
pub enum UserQuery<'a> {
    Logins(&'a [&'a str]),
    Ids(&'a [&'a str]),
}

/// Selector for the streams endpoint.
#[derive(Debug, Clone, Copy)]
pub enum StreamQuery<'a> {
    UserLogin(&'a str),
    UserId(&'a str),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EventSubSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub condition: SubscriptionCondition,
    pub transport: SubscriptionTransport,
}

impl EventSubSubscription {
    pub fn broadcaster_user_id(&self) -> Option<&str> {
        self.condition.broadcaster_user_id.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SubscriptionCondition {
    #[serde(default)]
    pub broadcaster_user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubscriptionTransport {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
}

/// Page of subscription results.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPage {
    pub data: Vec<EventSubSubscription>,
    pub cursor: Option<String>,
}

impl From<DataEnvelope<EventSubSubscription>> for SubscriptionPage {
    fn from(value: DataEnvelope<EventSubSubscription>) -> Self {
        Self {
            data: value.data,
            cursor: value
                .pagination
                .and_then(|p| p.cursor)
                .filter(|cursor| !cursor.is_empty()),
        }
    }
}

/// Body for `POST eventsub/subscriptions`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionRequest<'a> {
    #[serde(rename = "type")]
    pub subscription_type: &'a str,
    pub version: &'a str,
    pub condition: CreateCondition<'a>,
    pub transport: CreateTransport<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCondition<'a> {
    pub broadcaster_user_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTransport<'a> {
    pub method: &'a str,
    pub callback: &'a str,
    pub secret: &'a str,
}

impl<'a> CreateSubscriptionRequest<'a> {
    /// `stream.online` v1 delivered to a signed webhook callback.
    pub fn stream_online_webhook(
        broadcaster_user_id: &'a str,
        callback: &'a str,
        secret: &'a str,
    ) -> Self {
        Self {
            subscription_type: STREAM_ONLINE,
            version: "1",
            condition: CreateCondition {
                broadcaster_user_id,
            },
            transport: CreateTransport {
                method: "webhook",
                callback,
                secret,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("{0} returned no data")]
    EmptyResponse(&'static str),
}

impl HelixError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

async fn ensure_success(response: Response) -> Result<(), HelixError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}
