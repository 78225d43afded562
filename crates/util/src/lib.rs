pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, ConfigError, Environment};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// `APP_BIND_ADDR` wins when set. Otherwise a bare `PORT` binds every
/// interface on that port, and [`DEFAULT_BIND_ADDR`] is the final fallback.
pub fn server_bind_address() -> Result<SocketAddr, ConfigError> {
    if let Ok(value) = env::var("APP_BIND_ADDR") {
        return value.parse().map_err(ConfigError::BindAddress);
    }

    if let Ok(port) = env::var("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    DEFAULT_BIND_ADDR.parse().map_err(ConfigError::BindAddress)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::ENV_GUARD;
    use std::env;

    #[test]
    fn returns_default_address_when_env_missing() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::remove_var("APP_BIND_ADDR");
        env::remove_var("PORT");
        let addr = server_bind_address().expect("default address is valid");
        assert_eq!(addr.to_string(), DEFAULT_BIND_ADDR);
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn parses_custom_address_from_env() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("PORT", "7000");
        let addr = server_bind_address().expect("custom address should parse");
        assert_eq!(addr.to_string(), "0.0.0.0:9000");
        env::remove_var("APP_BIND_ADDR");
        env::remove_var("PORT");
    }

    #[test]
    fn port_binds_all_interfaces() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::remove_var("APP_BIND_ADDR");
        env::set_var("PORT", "8000");
        let addr = server_bind_address().expect("port should parse");
        assert_eq!(addr.to_string(), "0.0.0.0:8000");
        env::remove_var("PORT");
    }

    #[test]
    fn rejects_non_numeric_port() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::remove_var("APP_BIND_ADDR");
        env::set_var("PORT", "eighty");
        let err = server_bind_address().expect_err("port should be rejected");
        assert!(matches!(err, ConfigError::InvalidPort(value) if value == "eighty"));
        env::remove_var("PORT");
    }
}
