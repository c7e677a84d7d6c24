//! Browser-emulating login against the vendor identity provider.
//!
//! The provider exposes no programmatic login, so the flow walks the same
//! redirect chain a browser would: probe `/authorize`, run the
//! identifier-first form steps, resume the authorization request, and
//! exchange the resulting code for tokens. Everything that scrapes redirect
//! `Location` headers or login HTML is confined to this module; a vendor UI
//! change should not touch anything else.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::auth::token::{OAuth2Token, TokenUpdate};
use crate::config::Config;
use crate::error::{CaptchaChallenge, PorscheError, PorscheResult};
use crate::http;

/// State marker sent with the authorize probe and echoed back by the
/// provider.
const STATE_MARKER: &str = "porsche-connect";

/// Account credentials. The password is redacted from `Debug` output and is
/// never logged.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A solved captcha handed back by the caller to resume a paused login.
#[derive(Debug, Clone)]
pub struct Captcha {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

impl TokenResponse {
    fn into_update(self) -> TokenUpdate {
        TokenUpdate {
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            expires_in: Some(Duration::from_secs(self.expires_in)),
        }
    }
}

/// Runs the scraped login sequence and the token-endpoint exchanges for a
/// fixed set of credentials.
pub struct OAuth2Client {
    client: Client,
    config: Arc<Config>,
    credentials: Credentials,
    captcha: Mutex<Option<Captcha>>,
}

impl OAuth2Client {
    pub(crate) fn new(client: Client, config: Arc<Config>, credentials: Credentials) -> Self {
        Self {
            client,
            config,
            credentials,
            captcha: Mutex::new(None),
        }
    }

    /// Stores a solved captcha; the next login attempt consumes it.
    pub fn set_captcha(&self, captcha: Captcha) {
        *self.captcha.lock().unwrap() = Some(captcha);
    }

    /// Makes `token` valid: no-op when fresh, refresh when expired with a
    /// refresh token, full login otherwise. A refresh the provider rejects
    /// invalidates the whole session and escalates to the full login; the
    /// refresh is never retried in a loop.
    pub(crate) async fn ensure_valid_token(&self, token: &OAuth2Token) -> PorscheResult<()> {
        match token.is_expired(self.config.leeway) {
            Some(false) => return Ok(()),
            Some(true) => {
                if let Some(refresh_token) = token.refresh_token() {
                    if let Some(update) = self.refresh_access_token(&refresh_token).await? {
                        token.update(update);
                        log::debug!("refreshed access token");
                        return Ok(());
                    }
                }
                token.clear();
            }
            None => {}
        }

        let code = self.fetch_authorization_code().await?;
        let update = self.fetch_access_token(&code).await?;
        token.update(update);
        log::debug!("obtained new access token");
        Ok(())
    }

    /// Obtains an authorization code, logging in when the provider has no
    /// live session for us.
    async fn fetch_authorization_code(&self) -> PorscheResult<String> {
        let pending = self.captcha.lock().unwrap().take();
        if let Some(captcha) = pending {
            // resume a login that paused on a captcha challenge
            let resume_path = self
                .login_with_identifier(&captcha.state, Some(&captcha.code))
                .await?;
            return self.resume_authorization(&resume_path).await;
        }

        log::debug!("fetching authorization code");
        let params = self
            .location_params(
                &self.config.authorization_url(),
                &[
                    ("response_type", "code"),
                    ("client_id", &self.config.client_id),
                    ("redirect_uri", &self.config.redirect_uri),
                    ("audience", &self.config.audience),
                    ("scope", &self.config.scope),
                    ("state", STATE_MARKER),
                ],
            )
            .await?;

        if let Some(code) = find_param(&params, "code") {
            // the provider still holds a live session; no login needed
            log::debug!("authorize probe returned a code directly");
            return Ok(code);
        }

        let state = find_param(&params, "state").ok_or_else(|| {
            PorscheError::AuthFlow("authorize redirect carried neither code nor state".into())
        })?;

        let resume_path = self.login_with_identifier(&state, None).await?;
        self.resume_authorization(&resume_path).await
    }

    /// Re-issues the authorization request after the login steps and pulls
    /// the code out of its redirect.
    async fn resume_authorization(&self, resume_path: &str) -> PorscheResult<String> {
        let params = self
            .location_params(&self.config.resume_url(resume_path), &[])
            .await?;
        let code = find_param(&params, "code").ok_or_else(|| {
            PorscheError::AuthFlow("no authorization code in resume redirect".into())
        })?;
        // the provider needs another moment before the code becomes usable
        tokio::time::sleep(self.config.login_settle_delay).await;
        Ok(code)
    }

    /// Runs the identifier-first form steps. Returns the resume path for the
    /// authorization request.
    async fn login_with_identifier(
        &self,
        state: &str,
        captcha_code: Option<&str>,
    ) -> PorscheResult<String> {
        let mut form: Vec<(&str, String)> = vec![
            ("state", state.to_string()),
            ("username", self.credentials.email.clone()),
            ("js-available", "true".to_string()),
            ("webauthn-available", "false".to_string()),
            ("is-brave", "false".to_string()),
            ("webauthn-platform-available", "false".to_string()),
            ("action", "default".to_string()),
        ];
        match captcha_code {
            Some(code) => {
                form.push(("captcha", code.to_string()));
                log::debug!("submitting identifier with solved captcha");
            }
            None => log::debug!("submitting identifier"),
        }

        let response = self
            .post_form(&self.config.identifier_login_url(), state, &form)
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(PorscheError::WrongCredentials),
            // a 400 here means the provider wants a captcha solved; the
            // challenge image is inlined in the HTML body
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.map_err(PorscheError::transport)?;
                return match extract_captcha_image(&body) {
                    Some(image) => Err(PorscheError::CaptchaRequired(CaptchaChallenge {
                        image,
                        state: state.to_string(),
                    })),
                    None => Err(PorscheError::AuthFlow(
                        "identifier step rejected without a captcha challenge".into(),
                    )),
                };
            }
            _ => {}
        }

        log::debug!("submitting password");
        let form: Vec<(&str, String)> = vec![
            ("state", state.to_string()),
            ("username", self.credentials.email.clone()),
            ("password", self.credentials.password.clone()),
            ("action", "default".to_string()),
        ];
        let response = self
            .post_form(&self.config.password_login_url(), state, &form)
            .await?;

        // wrong passwords come back as a plain 400
        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
        ) {
            return Err(PorscheError::WrongCredentials);
        }

        let resume_path = header_location(&response).ok_or_else(|| {
            PorscheError::AuthFlow("password step did not redirect to a resume URL".into())
        })?;
        log::debug!("login accepted, resuming at {resume_path}");

        // give the provider time to link the session before resuming
        tokio::time::sleep(self.config.login_settle_delay).await;
        Ok(resume_path)
    }

    /// Exchanges the authorization code for an access/refresh token pair.
    async fn fetch_access_token(&self, authorization_code: &str) -> PorscheResult<TokenUpdate> {
        log::debug!("exchanging the authorization code for an access token");
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", authorization_code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let response = self
            .client
            .post(self.config.token_url())
            .headers(http::base_headers(&self.config))
            .timeout(self.config.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(PorscheError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PorscheError::from_status(status.as_u16()));
        }
        let payload: TokenResponse = response.json().await.map_err(PorscheError::transport)?;
        Ok(payload.into_update())
    }

    /// Trades the refresh token for a new access token. `Ok(None)` means the
    /// provider rejected the refresh token and the session must be rebuilt
    /// with a full login.
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> PorscheResult<Option<TokenUpdate>> {
        log::debug!("using the refresh token to get a new access token");
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .client
            .post(self.config.token_url())
            .headers(http::base_headers(&self.config))
            .timeout(self.config.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(PorscheError::transport)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            // the refresh token is no longer honored
            log::debug!("refresh token rejected, full login required");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PorscheError::from_status(status.as_u16()));
        }
        let payload: TokenResponse = response.json().await.map_err(PorscheError::transport)?;
        Ok(Some(payload.into_update()))
    }

    /// GETs `url` without following the redirect and returns the query
    /// parameters of its `Location` header.
    async fn location_params(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> PorscheResult<Vec<(String, String)>> {
        let response = self
            .client
            .get(url)
            .query(query)
            .headers(http::base_headers(&self.config))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(PorscheError::transport)?;

        if response.status() != StatusCode::FOUND {
            return Err(PorscheError::AuthFlow(format!(
                "expected a redirect, got HTTP {}",
                response.status().as_u16()
            )));
        }
        let location = header_location(&response)
            .ok_or_else(|| PorscheError::AuthFlow("redirect without a Location header".into()))?;
        extract_location_params(&location, &self.config.auth_base_url)
    }

    async fn post_form(
        &self,
        url: &str,
        state: &str,
        form: &[(&str, String)],
    ) -> PorscheResult<Response> {
        self.client
            .post(url)
            .query(&[("state", state)])
            .headers(http::base_headers(&self.config))
            .timeout(self.config.request_timeout)
            .form(form)
            .send()
            .await
            .map_err(PorscheError::transport)
    }
}

fn header_location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Parses the query parameters of a redirect target, which the provider
/// returns both absolute and relative to its own origin.
fn extract_location_params(location: &str, base: &str) -> PorscheResult<Vec<(String, String)>> {
    let url = match Url::parse(location) {
        Ok(url) => url,
        Err(_) => Url::parse(base)
            .and_then(|base| base.join(location))
            .map_err(|err| PorscheError::AuthFlow(format!("invalid redirect location: {err}")))?,
    };
    Ok(url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect())
}

fn find_param(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

/// Pulls the inline captcha image out of the login page HTML.
fn extract_captcha_image(html: &str) -> Option<String> {
    for (start, _) in html.match_indices("<img") {
        let tail = &html[start..];
        let end = match tail.find('>') {
            Some(end) => end,
            None => break,
        };
        let tag = &tail[..=end];
        if !tag.contains(r#"alt="captcha""#) {
            continue;
        }
        if let Some(src_at) = tag.find(r#"src=""#) {
            let value = &tag[src_at + 5..];
            if let Some(close) = value.find('"') {
                return Some(value[..close].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{start_mock_server, test_config};
    use httpmock::prelude::*;
    use serde_json::json;

    fn make_client(config: &Arc<Config>) -> OAuth2Client {
        OAuth2Client::new(
            http::build_client(),
            config.clone(),
            Credentials::new("user@example.com", "hunter2"),
        )
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let credentials = Credentials::new("user@example.com", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("user@example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn captcha_image_is_extracted_from_login_html() {
        let html = concat!(
            "<html><body><form>",
            r#"<img class="logo" src="/logo.png">"#,
            r#"<img alt="captcha" src="data:image/svg+xml;base64,QUJD">"#,
            "</form></body></html>"
        );
        assert_eq!(
            extract_captcha_image(html).as_deref(),
            Some("data:image/svg+xml;base64,QUJD")
        );
        assert_eq!(extract_captcha_image("<p>no images here</p>"), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn authorize_probe_short_circuits_when_a_code_is_returned() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        let authorize = server.mock(|when, then| {
            when.method(GET)
                .path("/authorize")
                .query_param("response_type", "code")
                .query_param("state", STATE_MARKER);
            then.status(302).header(
                "Location",
                "my-porsche-app://auth0/callback?code=cached-code&state=porsche-connect",
            );
        });
        let identifier = server.mock(|when, then| {
            when.method(POST).path("/u/login/identifier");
            then.status(200);
        });

        let code = flow
            .fetch_authorization_code()
            .await
            .expect("probe should yield the cached code");

        authorize.assert();
        assert_eq!(code, "cached-code");
        assert_eq!(identifier.hits(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_login_walks_every_step_and_extracts_the_code() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        let authorize = server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(302)
                .header("Location", "/u/login/identifier?state=abc123");
        });
        let identifier = server.mock(|when, then| {
            when.method(POST)
                .path("/u/login/identifier")
                .query_param("state", "abc123")
                .body_contains("username=user%40example.com");
            then.status(200);
        });
        let password = server.mock(|when, then| {
            when.method(POST)
                .path("/u/login/password")
                .body_contains("password=hunter2");
            then.status(302)
                .header("Location", "/authorize/resume?state=abc123");
        });
        let resume = server.mock(|when, then| {
            when.method(GET).path("/authorize/resume");
            then.status(302).header(
                "Location",
                "my-porsche-app://auth0/callback?code=fresh-code",
            );
        });

        let code = flow
            .fetch_authorization_code()
            .await
            .expect("full login should yield a code");

        assert_eq!(code, "fresh-code");
        identifier.assert();
        password.assert();
        resume.assert();
        assert_eq!(authorize.hits(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn captcha_challenge_pauses_the_flow_before_the_password_step() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(302)
                .header("Location", "/u/login/identifier?state=abc123");
        });
        server.mock(|when, then| {
            when.method(POST).path("/u/login/identifier");
            then.status(400).body(
                r#"<html><img alt="captcha" src="data:image/svg+xml;base64,QUJD"></html>"#,
            );
        });
        let password = server.mock(|when, then| {
            when.method(POST).path("/u/login/password");
            then.status(302).header("Location", "/resume");
        });

        let result = flow.fetch_authorization_code().await;
        match result {
            Err(PorscheError::CaptchaRequired(challenge)) => {
                assert_eq!(challenge.image, "data:image/svg+xml;base64,QUJD");
                assert_eq!(challenge.state, "abc123");
            }
            other => panic!("expected CaptchaRequired, got {other:?}"),
        }
        assert_eq!(password.hits(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn solved_captcha_resumes_without_a_new_authorize_probe() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        let authorize = server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(302)
                .header("Location", "/u/login/identifier?state=later");
        });
        let identifier = server.mock(|when, then| {
            when.method(POST)
                .path("/u/login/identifier")
                .query_param("state", "abc123")
                .body_contains("captcha=solved");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(POST).path("/u/login/password");
            then.status(302)
                .header("Location", "/authorize/resume?state=abc123");
        });
        server.mock(|when, then| {
            when.method(GET).path("/authorize/resume");
            then.status(302).header(
                "Location",
                "my-porsche-app://auth0/callback?code=captcha-code",
            );
        });

        flow.set_captcha(Captcha {
            code: "solved".into(),
            state: "abc123".into(),
        });
        let code = flow
            .fetch_authorization_code()
            .await
            .expect("login should resume with the solved captcha");

        assert_eq!(code, "captcha-code");
        identifier.assert();
        assert_eq!(authorize.hits(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_identifier_raises_wrong_credentials() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(302)
                .header("Location", "/u/login/identifier?state=abc123");
        });
        server.mock(|when, then| {
            when.method(POST).path("/u/login/identifier");
            then.status(401);
        });

        let result = flow.fetch_authorization_code().await;
        assert!(matches!(result, Err(PorscheError::WrongCredentials)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_password_raises_wrong_credentials() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(302)
                .header("Location", "/u/login/identifier?state=abc123");
        });
        server.mock(|when, then| {
            when.method(POST).path("/u/login/identifier");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(POST).path("/u/login/password");
            then.status(400);
        });

        let result = flow.fetch_authorization_code().await;
        assert!(matches!(result, Err(PorscheError::WrongCredentials)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn non_redirect_probe_is_a_flow_error() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(GET).path("/authorize");
            then.status(200).body("maintenance page");
        });

        let result = flow.fetch_authorization_code().await;
        assert!(matches!(result, Err(PorscheError::AuthFlow(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn code_exchange_parses_the_token_response() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        let token_endpoint = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=fresh-code");
            then.status(200).json_body(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            }));
        });

        let update = flow
            .fetch_access_token("fresh-code")
            .await
            .expect("exchange should succeed");

        token_endpoint.assert();
        assert_eq!(update.access_token.as_deref(), Some("access"));
        assert_eq!(update.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(update.expires_in, Some(Duration::from_secs(3600)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_refresh_token_signals_a_full_login() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=refresh_token");
            then.status(403);
        });

        let update = flow
            .refresh_access_token("stale-refresh")
            .await
            .expect("a 403 is not an error at this layer");
        assert!(update.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refresh_success_yields_a_token_update() {
        let server = start_mock_server();
        let config = Arc::new(test_config(&server));
        let flow = make_client(&config);

        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("refresh_token=valid-refresh");
            then.status(200).json_body(json!({
                "access_token": "new-access",
                "expires_in": 1800
            }));
        });

        let update = flow
            .refresh_access_token("valid-refresh")
            .await
            .expect("refresh should succeed")
            .expect("refresh should yield an update");
        assert_eq!(update.access_token.as_deref(), Some("new-access"));
        assert_eq!(update.refresh_token, None);
    }
}
