//! Client configuration: vendor endpoints, OAuth parameters, and the
//! per-connection tunables (timeouts, leeway, settle delay).
//!
//! Everything the login flow and the API dispatcher need to reach the vendor
//! lives in [`Config`], so tests can point a whole connection at a mock
//! server by overriding the two base URLs.

use std::time::Duration;

pub const AUTHORIZATION_SERVER: &str = "identity.porsche.com";
pub const API_BASE_URL: &str = "https://api.ppa.porsche.com/app";
pub const REDIRECT_URI: &str = "my-porsche-app://auth0/callback";
pub const AUDIENCE: &str = "https://api.porsche.com";
pub const CLIENT_ID: &str = "XhygisuebbrqQ80byOuU5VncxLIm8E6H";
pub const X_CLIENT_ID: &str = "41843fb4-691d-4970-85c7-2673e8ecef40";
pub const USER_AGENT: &str = concat!("porsche-connect/", env!("CARGO_PKG_VERSION"));
pub const SCOPE: &str = "openid profile email offline_access mbb ssodb badge vin dealers cars charging manageCharging plugAndCharge climatisation manageClimatisation pid:user_profile.porscheid:read pid:user_profile.name:read pid:user_profile.vehicles:read pid:user_profile.dealers:read pid:user_profile.emails:read pid:user_profile.phones:read pid:user_profile.addresses:read pid:user_profile.birthdate:read pid:user_profile.locale:read pid:user_profile.legal:read";

/// Connection settings. [`Config::default`] carries the production vendor
/// values; tests override the base URLs and zero the settle delay.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity provider origin, e.g. `https://identity.porsche.com`.
    pub auth_base_url: String,
    /// API host prefix, e.g. `https://api.ppa.porsche.com/app`.
    pub api_base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub audience: String,
    pub scope: String,
    /// Locale hints sent with every API request.
    pub country: String,
    pub language: String,
    /// Per-request timeout for all HTTP calls.
    pub request_timeout: Duration,
    /// Margin subtracted from the token expiry so it is renewed slightly
    /// early, avoiding races with in-flight requests.
    pub leeway: Duration,
    /// Pause between login redirect steps. The identity provider links the
    /// session server-side with some lag; resuming too early yields no code.
    pub login_settle_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_base_url: format!("https://{AUTHORIZATION_SERVER}"),
            api_base_url: API_BASE_URL.to_string(),
            client_id: CLIENT_ID.to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            audience: AUDIENCE.to_string(),
            scope: SCOPE.to_string(),
            country: "de".to_string(),
            language: "de_DE".to_string(),
            request_timeout: Duration::from_secs(90),
            leeway: Duration::from_secs(60),
            login_settle_delay: Duration::from_millis(2_500),
        }
    }
}

impl Config {
    pub fn authorization_url(&self) -> String {
        format!("{}/authorize", self.auth_base_url)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.auth_base_url)
    }

    pub fn identifier_login_url(&self) -> String {
        format!("{}/u/login/identifier", self.auth_base_url)
    }

    pub fn password_login_url(&self) -> String {
        format!("{}/u/login/password", self.auth_base_url)
    }

    /// Turns the resume path handed back by the password step into an
    /// absolute URL. The provider has returned both absolute and
    /// origin-relative forms over time.
    pub fn resume_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.auth_base_url, path)
        }
    }
}

/// Measurement keys requested with vehicle overview queries.
pub const MEASUREMENTS: &[&str] = &[
    "ACV_STATE",
    "ALARM_STATE",
    "BATTERY_CHARGING_STATE",
    "BATTERY_LEVEL",
    "BLEID_DDADATA",
    "CHARGING_PROFILES",
    "CHARGING_SUMMARY",
    "CLIMATIZER_STATE",
    "DEPARTURES",
    "E_RANGE",
    "FUEL_LEVEL",
    "FUEL_RESERVE",
    "GLOBAL_PRIVACY_MODE",
    "GPS_LOCATION",
    "HEATING_STATE",
    "INTERMEDIATE_SERVICE_RANGE",
    "INTERMEDIATE_SERVICE_TIME",
    "LOCK_STATE_VEHICLE",
    "MAIN_SERVICE_RANGE",
    "MAIN_SERVICE_TIME",
    "MILEAGE",
    "OIL_LEVEL_CURRENT",
    "OIL_LEVEL_MAX",
    "OIL_LEVEL_MIN_WARNING",
    "OIL_SERVICE_RANGE",
    "OIL_SERVICE_TIME",
    "OPEN_STATE_CHARGE_FLAP_LEFT",
    "OPEN_STATE_CHARGE_FLAP_RIGHT",
    "OPEN_STATE_DOOR_FRONT_LEFT",
    "OPEN_STATE_DOOR_FRONT_RIGHT",
    "OPEN_STATE_DOOR_REAR_LEFT",
    "OPEN_STATE_DOOR_REAR_RIGHT",
    "OPEN_STATE_LID_FRONT",
    "OPEN_STATE_LID_REAR",
    "OPEN_STATE_SERVICE_FLAP",
    "OPEN_STATE_SPOILER",
    "OPEN_STATE_SUNROOF",
    "OPEN_STATE_TOP",
    "OPEN_STATE_WINDOW_FRONT_LEFT",
    "OPEN_STATE_WINDOW_FRONT_RIGHT",
    "OPEN_STATE_WINDOW_REAR_LEFT",
    "OPEN_STATE_WINDOW_REAR_RIGHT",
    "PAIRING_CODE",
    "PARKING_BRAKE",
    "PARKING_LIGHT",
    "PRED_PRECON_LOCATION_EXCEPTIONS",
    "PRED_PRECON_USER_SETTINGS",
    "RANGE",
    "REMOTE_ACCESS_AUTHORIZATION",
    "SERVICE_PREDICTIONS",
    "THEFT_STATE",
    "TIMERS",
    "VTS_MODES",
];

/// Command keys accepted by the commands endpoint.
pub const COMMANDS: &[&str] = &[
    "BLEID_AGREEMENT_GIVE",
    "BLEID_AGREEMENT_REVOKE",
    "BLEID_DEVICEKEY_UPLOAD",
    "B_CALL_TRIGGER",
    "CHARGING_PROFILES_EDIT",
    "CHARGING_SETTINGS_AUTOPLUG_EDIT",
    "CHARGING_SETTINGS_BATTERYCAREMODE_EDIT",
    "CHARGING_SETTINGS_CERTIFICATES_RESET",
    "CHARGING_SETTINGS_EDIT",
    "CHARGING_STOP",
    "CS_C2P_IN_VEHICLE_INFOTAINMENT",
    "CS_DESTINATION_SYNC",
    "CS_PCM_ACCOUNT_SERVICES",
    "CS_PCM_CALENDAR",
    "CS_PILOTED_PARKING",
    "CS_VIDEOSTREAMING_VOUCHER",
    "DEPARTURES_EDIT",
    "DIRECT_CHARGING_START",
    "DIRECT_CHARGING_STOP",
    "HONK_FLASH",
    "LOCK",
    "PRED_PRECON_LOCATION_EXCEPTION_EDIT",
    "PRED_PRECON_USER_SETTINGS_EDIT",
    "REMOTE_ACV_START",
    "REMOTE_ACV_STOP",
    "REMOTE_CLIMATIZER_START",
    "REMOTE_CLIMATIZER_STOP",
    "REMOTE_HEATING_START",
    "REMOTE_HEATING_STOP",
    "ROUTE_CALCULATE",
    "SERVICE_PREDICTIONS_VISIBILITY_EDIT",
    "SPIN_CHALLENGE",
    "TIMERS_DISABLE",
    "TIMERS_EDIT",
    "UNLOCK",
];

/// Measurement keys for the trip statistics query.
pub const TRIP_STATISTICS: &[&str] = &[
    "TRIP_STATISTICS_CYCLIC",
    "TRIP_STATISTICS_LONG_TERM",
    "TRIP_STATISTICS_LONG_TERM_HISTORY",
    "TRIP_STATISTICS_SHORT_TERM_HISTORY",
    "TRIP_STATISTICS_CYCLIC_HISTORY",
    "TRIP_STATISTICS_SHORT_TERM",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_urls_point_at_vendor() {
        let config = Config::default();
        assert_eq!(
            config.authorization_url(),
            "https://identity.porsche.com/authorize"
        );
        assert_eq!(config.token_url(), "https://identity.porsche.com/oauth/token");
    }

    #[test]
    fn resume_url_accepts_relative_and_absolute_paths() {
        let config = Config::default();
        assert_eq!(
            config.resume_url("/authorize/resume?state=abc"),
            "https://identity.porsche.com/authorize/resume?state=abc"
        );
        assert_eq!(
            config.resume_url("https://elsewhere.example/resume"),
            "https://elsewhere.example/resume"
        );
    }
}
