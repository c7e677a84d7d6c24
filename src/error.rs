use std::fmt;

use serde_json::Value;

pub type PorscheResult<T> = Result<T, PorscheError>;

/// Classified reason for an HTTP failure from the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    NotFound,
    MobileAccessDisabled,
    VehicleUnavailable,
    AccountLocked,
    TooManyRequests,
    ServerError,
    ServiceMaintenance,
    UpstreamTimeout,
    Unknown,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            405 => ApiErrorKind::MobileAccessDisabled,
            408 => ApiErrorKind::VehicleUnavailable,
            423 => ApiErrorKind::AccountLocked,
            429 => ApiErrorKind::TooManyRequests,
            500 => ApiErrorKind::ServerError,
            503 => ApiErrorKind::ServiceMaintenance,
            504 => ApiErrorKind::UpstreamTimeout,
            _ => ApiErrorKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::Unauthorized => "UNAUTHORIZED",
            ApiErrorKind::NotFound => "NOT_FOUND",
            ApiErrorKind::MobileAccessDisabled => "MOBILE_ACCESS_DISABLED",
            ApiErrorKind::VehicleUnavailable => "VEHICLE_UNAVAILABLE",
            ApiErrorKind::AccountLocked => "ACCOUNT_LOCKED",
            ApiErrorKind::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiErrorKind::ServerError => "SERVER_ERROR",
            ApiErrorKind::ServiceMaintenance => "SERVICE_MAINTENANCE",
            ApiErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ApiErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// An HTTP status >= 300 returned by the vendor API, with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub kind: ApiErrorKind,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ApiErrorKind::Unknown => write!(f, "UNKNOWN_ERROR_{}", self.status),
            kind => write!(f, "{}", kind.as_str()),
        }
    }
}

/// A captcha challenge issued during the identifier step. The caller must
/// present `image` to the user and resume the login with the solved code and
/// the same `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    /// Image source as embedded in the login page, typically an inline SVG.
    pub image: String,
    /// Login transaction state the solved captcha must be submitted with.
    pub state: String,
}

/// A remote command that failed, timed out, or answered out of protocol.
/// `details` is the last status payload observed from the backend.
#[derive(Debug, Clone)]
pub struct RemoteServiceError {
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Clone)]
pub enum PorscheError {
    /// Identity provider rejected the identifier or password.
    WrongCredentials,
    /// Login paused until the caller solves the embedded captcha.
    CaptchaRequired(CaptchaChallenge),
    /// Network-level failure: timeout, DNS, connection reset, bad payload.
    Transport(String),
    /// HTTP status >= 300 from the vendor API.
    Api(ApiError),
    /// Identity provider answered out of protocol during the login flow.
    AuthFlow(String),
    /// Remote command execution failure; carries the last status payload.
    RemoteService(RemoteServiceError),
    /// Token blob could not be saved or restored.
    Persistence(String),
}

impl PorscheError {
    pub fn from_status(status: u16) -> Self {
        PorscheError::Api(ApiError {
            status,
            kind: ApiErrorKind::from_status(status),
        })
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return PorscheError::Transport(format!("request timed out: {err}"));
        }
        if err.is_connect() {
            return PorscheError::Transport(format!("failed to connect: {err}"));
        }
        if err.is_decode() {
            return PorscheError::Transport(format!("unable to decode response body: {err}"));
        }
        PorscheError::Transport(err.to_string())
    }
}

impl fmt::Display for PorscheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PorscheError::WrongCredentials => write!(f, "Wrong credentials"),
            PorscheError::CaptchaRequired(challenge) => {
                write!(f, "Captcha required (state {})", challenge.state)
            }
            PorscheError::Transport(message) => write!(f, "Transport error: {message}"),
            PorscheError::Api(err) => write!(f, "API error: {err}"),
            PorscheError::AuthFlow(message) => write!(f, "Auth flow error: {message}"),
            PorscheError::RemoteService(err) => write!(f, "Remote service error: {}", err.message),
            PorscheError::Persistence(message) => write!(f, "Persistence error: {message}"),
        }
    }
}

impl std::error::Error for PorscheError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_codes_are_classified() {
        assert_eq!(ApiErrorKind::from_status(401), ApiErrorKind::Unauthorized);
        assert_eq!(ApiErrorKind::from_status(408), ApiErrorKind::VehicleUnavailable);
        assert_eq!(ApiErrorKind::from_status(423), ApiErrorKind::AccountLocked);
        assert_eq!(ApiErrorKind::from_status(429), ApiErrorKind::TooManyRequests);
        assert_eq!(ApiErrorKind::from_status(503), ApiErrorKind::ServiceMaintenance);
    }

    #[test]
    fn unknown_status_keeps_the_raw_code() {
        let err = PorscheError::from_status(418);
        match err {
            PorscheError::Api(api) => {
                assert_eq!(api.kind, ApiErrorKind::Unknown);
                assert_eq!(api.to_string(), "UNKNOWN_ERROR_418");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn display_names_match_the_backend_vocabulary() {
        let err = PorscheError::from_status(504);
        assert_eq!(err.to_string(), "API error: UPSTREAM_TIMEOUT");
    }
}
