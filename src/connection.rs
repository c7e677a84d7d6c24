//! Authenticated access to the vendor API host.
//!
//! One `Connection` per account: it owns the token lifecycle, serializes
//! refresh/login behind a single-flight lock, and stamps every outbound
//! request with the auth and vendor headers.

use std::sync::Arc;

use async_lock::Mutex as AsyncMutex;
use reqwest::header::HeaderValue;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::auth::{Captcha, Credentials, OAuth2Client, OAuth2Token, TokenSnapshot};
use crate::config::Config;
use crate::error::{PorscheError, PorscheResult};
use crate::http;

pub struct Connection {
    client: Client,
    config: Arc<Config>,
    oauth2_client: OAuth2Client,
    token: OAuth2Token,
    refresh_lock: AsyncMutex<()>,
}

impl Connection {
    /// Creates a connection against the production vendor endpoints.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_config(credentials, Config::default())
    }

    /// Creates a connection with explicit settings, e.g. to point at a mock
    /// server or to tune timeouts.
    pub fn with_config(credentials: Credentials, config: Config) -> Self {
        let config = Arc::new(config);
        let client = http::build_client();
        let oauth2_client = OAuth2Client::new(client.clone(), config.clone(), credentials);
        Self {
            client,
            config,
            oauth2_client,
            token: OAuth2Token::default(),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Restores a previously saved token blob. The blob may already be
    /// expired; the first request then refreshes or logs in as needed.
    pub fn restore_token(&self, snapshot: TokenSnapshot) {
        self.token.restore(snapshot);
    }

    /// Returns the current token blob for saving, if a token was acquired.
    pub fn token_snapshot(&self) -> Option<TokenSnapshot> {
        self.token.snapshot()
    }

    /// Hands a solved captcha to the login flow; consumed by the next login
    /// attempt.
    pub fn set_captcha(&self, captcha: Captcha) {
        self.oauth2_client.set_captcha(captcha);
    }

    /// Makes sure a valid access token is held, refreshing or logging in
    /// when necessary.
    ///
    /// Single-flight: concurrent callers block on the same lock and observe
    /// the result of the in-flight refresh instead of starting their own
    /// login, which would race against the provider's session state. The
    /// lock covers only this check-then-refresh section, not the subsequent
    /// request.
    pub async fn ensure_valid_token(&self) -> PorscheResult<()> {
        let _guard = self.refresh_lock.lock().await;
        // re-check under the lock: the previous holder may have just
        // finished refreshing
        if self.token.is_expired(self.config.leeway) == Some(false) {
            return Ok(());
        }
        self.oauth2_client.ensure_valid_token(&self.token).await
    }

    pub async fn get(&self, path: &str) -> PorscheResult<Value> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> PorscheResult<Value> {
        self.request(Method::POST, path, body).await
    }

    pub async fn put(&self, path: &str, body: Option<&Value>) -> PorscheResult<Value> {
        self.request(Method::PUT, path, body).await
    }

    pub async fn delete(&self, path: &str, body: Option<&Value>) -> PorscheResult<Value> {
        self.request(Method::DELETE, path, body).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> PorscheResult<Value> {
        self.ensure_valid_token().await?;
        let access_token = self
            .token
            .access_token()
            .ok_or_else(|| PorscheError::AuthFlow("no access token after login".into()))?;

        let url = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        log::debug!("{method} {url}");

        let mut headers = http::base_headers(&self.config);
        if let Ok(value) = HeaderValue::from_str(&http::random_id()) {
            headers.insert("x-request-id", value);
        }

        let mut request = self
            .client
            .request(method, &url)
            .headers(headers)
            .bearer_auth(access_token)
            .timeout(self.config.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(PorscheError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PorscheError::from_status(status.as_u16()));
        }
        response.json().await.map_err(PorscheError::transport)
    }
}
