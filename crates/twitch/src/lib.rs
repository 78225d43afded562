pub mod api;
pub mod helix;
pub mod oauth;
pub mod retry;
pub mod token;

pub use api::{TwitchApi, TwitchApiError};
pub use helix::{
    CreateSubscriptionRequest, EventSubSubscription, HelixClient, HelixError, HelixStream,
    HelixUser, StreamQuery, SubscriptionPage, UserQuery, STREAM_ONLINE,
};
pub use oauth::{AppAccessToken, OAuthError, TwitchOAuthClient};
pub use retry::{RetryError, RetryPolicy};
pub use token::TokenCell;
