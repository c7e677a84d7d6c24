//! Shared HTTP plumbing for the auth flow and the API connection.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{redirect, Client};

use crate::config::{Config, USER_AGENT as USER_AGENT_VALUE, X_CLIENT_ID};

/// Builds the HTTP client shared by the login flow and the API dispatcher.
///
/// Redirects are never followed: the login flow reads authorization codes
/// out of `Location` headers, so the client must surface 302s as-is.
pub(crate) fn build_client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .expect("failed to construct HTTP client")
}

/// Headers sent with every request to the identity provider and the API.
pub(crate) fn base_headers(config: &Config) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert("X-Client-ID", HeaderValue::from_static(X_CLIENT_ID));
    if let Ok(country) = HeaderValue::from_str(&config.country) {
        headers.insert("x-country", country);
    }
    if let Ok(language) = HeaderValue::from_str(&config.language) {
        headers.insert("x-language", language);
    }
    headers
}

/// Random 128-bit hex id used for request tracing and wake-up jobs.
pub(crate) fn random_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
