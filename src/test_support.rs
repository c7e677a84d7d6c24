//! Test utilities shared across crate-level unit tests.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use httpmock::MockServer;
use serde_json::json;

use crate::auth::TokenSnapshot;
use crate::config::Config;

/// Start a fresh `httpmock::MockServer` instance for use in unit tests.
pub fn start_mock_server() -> MockServer {
    MockServer::start()
}

/// Build a [`Config`] that points both the identity provider and the API
/// host at `server`, with the login settle delay zeroed so flow tests run
/// instantly.
pub fn test_config(server: &MockServer) -> Config {
    Config {
        auth_base_url: server.base_url(),
        api_base_url: server.base_url(),
        request_timeout: Duration::from_secs(5),
        login_settle_delay: Duration::ZERO,
        ..Config::default()
    }
}

/// A token blob that is valid for another hour.
pub fn valid_snapshot() -> TokenSnapshot {
    TokenSnapshot {
        access_token: "valid-access".into(),
        refresh_token: Some("valid-refresh".into()),
        expires_at: unix_now() + 3_600,
        claims: json!({"azp": "test-client"}),
    }
}

/// A token blob that expired long ago, optionally still holding a refresh
/// token.
pub fn expired_snapshot(refresh_token: Option<&str>) -> TokenSnapshot {
    TokenSnapshot {
        access_token: "expired-access".into(),
        refresh_token: refresh_token.map(str::to_owned),
        expires_at: 1,
        claims: json!({"azp": "test-client"}),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
