use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::jwt;

#[derive(Debug, Clone, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<u64>,
    claims: Option<Value>,
}

/// In-memory OAuth2 token for one account.
///
/// The state is guarded by a mutex and only ever replaced wholesale, so a
/// concurrent reader never observes a half-applied update. Never performs
/// I/O.
#[derive(Debug, Default)]
pub struct OAuth2Token {
    state: Mutex<TokenState>,
}

/// Fields to merge into the token. `expires_in` is the server-reported
/// lifetime; the absolute expiry is always recomputed from the moment the
/// update is applied.
#[derive(Debug)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Opaque token blob callers may save and restore across process runs.
///
/// The shape is what the token endpoint returns plus the computed expiry and
/// decoded claims. A restored blob may already be expired; the connection
/// then refreshes or logs in on first use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: u64,
    #[serde(default)]
    pub claims: Value,
}

impl OAuth2Token {
    /// Returns whether the access token has expired, with `leeway` treating
    /// it as expired slightly early. `None` when no expiry is known (the
    /// token was never fetched).
    pub fn is_expired(&self, leeway: Duration) -> Option<bool> {
        let state = self.state.lock().unwrap();
        let expires_at = state.expires_at?;
        Some(unix_now() + leeway.as_secs() >= expires_at)
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().unwrap().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.lock().unwrap().refresh_token.clone()
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.state.lock().unwrap().expires_at
    }

    /// Decoded claims of the current access token, if any.
    pub fn claims(&self) -> Option<Value> {
        self.state.lock().unwrap().claims.clone()
    }

    /// Client identifier the token server embedded in the access token.
    pub fn client_id(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        let claims = state.claims.as_ref()?;
        claims
            .get("azp")
            .or_else(|| claims.get("aud"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Merges `update` into the token. The state is rebuilt and swapped in
    /// one assignment; whenever an access token arrives its claims are
    /// re-decoded, and whenever a lifetime arrives the absolute expiry is
    /// recomputed as now + `expires_in`.
    pub fn update(&self, update: TokenUpdate) {
        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        if let Some(access_token) = update.access_token {
            next.claims = Some(jwt::decode_claims(&access_token));
            next.access_token = Some(access_token);
        }
        if let Some(refresh_token) = update.refresh_token {
            next.refresh_token = Some(refresh_token);
        }
        if let Some(expires_in) = update.expires_in {
            next.expires_at = Some(unix_now() + expires_in.as_secs());
        }
        *state = next;
    }

    /// Drops all token state, forcing a full login on next use.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = TokenState::default();
    }

    /// Returns the persistable blob, or `None` when no token was ever
    /// acquired.
    pub fn snapshot(&self) -> Option<TokenSnapshot> {
        let state = self.state.lock().unwrap();
        Some(TokenSnapshot {
            access_token: state.access_token.clone()?,
            refresh_token: state.refresh_token.clone(),
            expires_at: state.expires_at?,
            claims: state.claims.clone().unwrap_or(Value::Null),
        })
    }

    /// Restores a previously saved blob, replacing any current state.
    pub fn restore(&self, snapshot: TokenSnapshot) {
        let claims = match snapshot.claims {
            Value::Null => jwt::decode_claims(&snapshot.access_token),
            claims => claims,
        };
        let mut state = self.state.lock().unwrap();
        *state = TokenState {
            access_token: Some(snapshot.access_token),
            refresh_token: snapshot.refresh_token,
            expires_at: Some(snapshot.expires_at),
            claims: Some(claims),
        };
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
