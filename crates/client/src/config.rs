//! Client configuration from environment variables.

use std::time::Duration;

use crate::session::{AuthSession, Role};
use crate::ws::ReconnectConfig;

/// Endpoints and connection timings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker WebSocket URL
    pub broker_url: String,
    /// Base URL of the REST API
    pub api_url: String,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `BAZAAR_BROKER_URL`: broker WebSocket URL (default: "ws://localhost:8080/ws")
    /// - `BAZAAR_API_URL`: REST base URL (default: "http://localhost:8080")
    /// - `BAZAAR_RECONNECT_DELAY_MS`: delay before each retry (default: 5000)
    /// - `BAZAAR_MAX_RECONNECT_ATTEMPTS`: retries before giving up (default: 5)
    /// - `BAZAAR_HEARTBEAT_MS`: heart-beat interval, 0 disables (default: 4000)
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ReconnectConfig::default();
        let millis = |key: &str, default: Duration| {
            var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            broker_url: var("BAZAAR_BROKER_URL")
                .unwrap_or_else(|| "ws://localhost:8080/ws".to_string()),
            api_url: var("BAZAAR_API_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            reconnect: ReconnectConfig {
                max_attempts: var("BAZAAR_MAX_RECONNECT_ATTEMPTS")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(defaults.max_attempts),
                delay: millis("BAZAAR_RECONNECT_DELAY_MS", defaults.delay),
                heartbeat: millis("BAZAAR_HEARTBEAT_MS", defaults.heartbeat),
            },
        }
    }
}

/// Session handed to the binary through the environment.
///
/// - `BAZAAR_TOKEN`: bearer credential (required)
/// - `BAZAAR_USER_ID`: user id (default: "me")
/// - `BAZAAR_ROLE`: CUSTOMER | SELLER | ADMIN (default: CUSTOMER)
pub fn session_from_env() -> Option<AuthSession> {
    session_from_vars(|key| std::env::var(key).ok())
}

pub fn session_from_vars(var: impl Fn(&str) -> Option<String>) -> Option<AuthSession> {
    let token = var("BAZAAR_TOKEN").filter(|t| !t.trim().is_empty())?;
    let user_id = var("BAZAAR_USER_ID").unwrap_or_else(|| "me".to_string());
    let role = var("BAZAAR_ROLE")
        .and_then(|r| Role::parse(&r))
        .unwrap_or(Role::Customer);
    Some(AuthSession::new(user_id, token, role))
}
