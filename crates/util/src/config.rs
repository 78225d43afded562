use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_STREAMERS_PATH: &str = "./streamers.json";
pub const DEFAULT_TWITCH_API_BASE_URL: &str = "https://api.twitch.tv/helix/";
pub const DEFAULT_TWITCH_OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2/";
pub const DEFAULT_NOTIFY_RETRY_MAX: u32 = 3;
pub const DEFAULT_NOTIFY_RETRY_BASE_MS: u64 = 1000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    /// Shared secret for EventSub signatures; also handed to Twitch when subscribing.
    pub hook_secret: String,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub callback_url: Url,
    pub discord_webhook: Url,
    pub streamers_path: PathBuf,
    pub twitch_api_base_url: Url,
    pub twitch_oauth_base_url: Url,
    pub notify_retry_max: u32,
    pub notify_retry_base: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address()?;

        let hook_secret = required("HOOK_SECRET")?;
        let twitch_client_id = required("TWITCH_CLIENT_ID")?;
        let twitch_client_secret = required("TWITCH_CLIENT_SECRET")?;
        let callback_url = parse_url("CALLBACK_URL", &required("CALLBACK_URL")?)?;
        let discord_webhook = parse_url("DISCORD_WEBHOOK", &required("DISCORD_WEBHOOK")?)?;

        let streamers_path = env::var("STREAMERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STREAMERS_PATH));

        let twitch_api_base_url = base_url("TWITCH_API_BASE_URL", DEFAULT_TWITCH_API_BASE_URL)?;
        let twitch_oauth_base_url =
            base_url("TWITCH_OAUTH_BASE_URL", DEFAULT_TWITCH_OAUTH_BASE_URL)?;

        let notify_retry_max = number("NOTIFY_RETRY_MAX", u64::from(DEFAULT_NOTIFY_RETRY_MAX))?;
        let notify_retry_max = u32::try_from(notify_retry_max).map_err(|_| {
            ConfigError::InvalidNumber {
                name: "NOTIFY_RETRY_MAX",
                value: notify_retry_max.to_string(),
            }
        })?;
        let notify_retry_base =
            Duration::from_millis(number("NOTIFY_RETRY_BASE_MS", DEFAULT_NOTIFY_RETRY_BASE_MS)?);

        Ok(Self {
            bind_addr,
            environment,
            hook_secret,
            twitch_client_id,
            twitch_client_secret,
            callback_url,
            discord_webhook,
            streamers_path,
            twitch_api_base_url,
            twitch_oauth_base_url,
            notify_retry_max,
            notify_retry_base,
        })
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("environment", &self.environment)
            .field("hook_secret", &"<redacted>")
            .field("twitch_client_id", &self.twitch_client_id)
            .field("twitch_client_secret", &"<redacted>")
            .field("callback_url", &self.callback_url.as_str())
            .field("discord_webhook", &"<redacted>")
            .field("streamers_path", &self.streamers_path)
            .field("twitch_api_base_url", &self.twitch_api_base_url.as_str())
            .field("twitch_oauth_base_url", &self.twitch_oauth_base_url.as_str())
            .field("notify_retry_max", &self.notify_retry_max)
            .field("notify_retry_base", &self.notify_retry_base)
            .finish()
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { name, source })
}

/// Base URLs are joined with relative paths, so they must end with `/`.
fn base_url(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let mut value = env::var(name).unwrap_or_else(|_| default.to_string());
    if !value.ends_with('/') {
        value.push('/');
    }
    parse_url(name, &value)
}

fn number(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidPort(String),
    Missing(&'static str),
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        name: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidPort(value) => write!(f, "PORT must be a port number (got {value})"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidUrl { name, source } => write!(f, "{name} is not a valid URL: {source}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::ENV_GUARD;
    use crate::DEFAULT_BIND_ADDR;

    const REQUIRED: &[(&str, &str)] = &[
        ("HOOK_SECRET", "hook-secret"),
        ("TWITCH_CLIENT_ID", "client-id"),
        ("TWITCH_CLIENT_SECRET", "client-secret"),
        ("CALLBACK_URL", "https://relay.example.com/"),
        ("DISCORD_WEBHOOK", "https://discord.com/api/webhooks/1/abc"),
    ];

    const OPTIONAL: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "PORT",
        "STREAMERS_PATH",
        "TWITCH_API_BASE_URL",
        "TWITCH_OAUTH_BASE_URL",
        "NOTIFY_RETRY_MAX",
        "NOTIFY_RETRY_BASE_MS",
    ];

    fn reset_env() {
        for (name, value) in REQUIRED {
            env::set_var(name, value);
        }
        for name in OPTIONAL {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.streamers_path, PathBuf::from(DEFAULT_STREAMERS_PATH));
        assert_eq!(config.twitch_api_base_url.as_str(), DEFAULT_TWITCH_API_BASE_URL);
        assert_eq!(config.notify_retry_max, 3);
        assert_eq!(config.notify_retry_base, Duration::from_millis(1000));
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::remove_var("HOOK_SECRET");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::Missing("HOOK_SECRET")));
        assert_eq!(err.to_string(), "HOOK_SECRET must be set");
    }

    #[test]
    fn base_urls_gain_trailing_slash() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("TWITCH_API_BASE_URL", "http://127.0.0.1:9999/helix");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(
            config.twitch_api_base_url.as_str(),
            "http://127.0.0.1:9999/helix/"
        );

        env::remove_var("TWITCH_API_BASE_URL");
    }

    #[test]
    fn parses_production_environment_and_retry_overrides() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("NOTIFY_RETRY_MAX", "5");
        env::set_var("NOTIFY_RETRY_BASE_MS", "250");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.notify_retry_max, 5);
        assert_eq!(config.notify_retry_base, Duration::from_millis(250));

        reset_env();
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();

        let config = AppConfig::from_env().expect("config should load");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hook-secret"));
        assert!(!rendered.contains("client-secret"));
        assert!(rendered.contains("client-id"));
    }
}
