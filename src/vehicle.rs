//! Models the state of one Porsche Connect vehicle.
//!
//! The backend reports most state as a flat array of "measurements"; this
//! module flattens the enabled ones into a key→value map and exposes typed
//! accessors over it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::config::{COMMANDS, MEASUREMENTS, TRIP_STATISTICS};
use crate::connection::Connection;
use crate::error::{PorscheError, PorscheResult, RemoteServiceError};
use crate::http;
use crate::remote::{RemoteServiceStatus, RemoteServices};

const BASE_DATA: &[&str] = &[
    "vin",
    "modelName",
    "customName",
    "modelType",
    "systemInfo",
    "timestamp",
];

static MEASUREMENT_QUERY: Lazy<String> = Lazy::new(|| filter_query("mf", MEASUREMENTS));
static COMMAND_QUERY: Lazy<String> = Lazy::new(|| filter_query("cf", COMMANDS));
static TRIP_QUERY: Lazy<String> = Lazy::new(|| filter_query("mf", TRIP_STATISTICS));

fn filter_query(key: &str, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("{key}={name}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn measurement_query() -> &'static str {
    &MEASUREMENT_QUERY
}

pub struct PorscheVehicle {
    connection: Arc<Connection>,
    vin: String,
    data: Mutex<Map<String, Value>>,
    status: Mutex<Value>,
    capabilities: Mutex<Value>,
    trip_statistics: Mutex<Value>,
    picture_locations: Mutex<HashMap<String, String>>,
}

impl PorscheVehicle {
    pub fn new(connection: Arc<Connection>, vin: impl Into<String>) -> Self {
        Self::with_data(connection, vin, Map::new())
    }

    /// Builds a vehicle seeded with data from the vehicles listing.
    pub fn with_data(
        connection: Arc<Connection>,
        vin: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            connection,
            vin: vin.into(),
            data: Mutex::new(data),
            status: Mutex::new(Value::Null),
            capabilities: Mutex::new(Value::Null),
            trip_statistics: Mutex::new(Value::Null),
            picture_locations: Mutex::new(HashMap::new()),
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    /// Remote command dispatcher for this vehicle.
    pub fn remote_services(&self) -> RemoteServices {
        RemoteServices::new(self.connection.clone(), self.vin.clone())
    }

    /// Snapshot of the flattened vehicle data.
    pub fn data(&self) -> Map<String, Value> {
        self.data.lock().unwrap().clone()
    }

    pub fn model_name(&self) -> Option<String> {
        self.string_entry(&["modelName"])
    }

    pub fn model_year(&self) -> Option<String> {
        self.string_entry(&["modelType", "year"])
    }

    /// True for BEV and PHEV drivetrains.
    pub fn has_electric_drivetrain(&self) -> bool {
        matches!(
            self.string_entry(&["modelType", "engine"]).as_deref(),
            Some("BEV") | Some("PHEV")
        )
    }

    /// Main battery charge in percent.
    pub fn battery_level(&self) -> Option<i64> {
        self.entry(&["BATTERY_LEVEL", "percent"])?.as_i64()
    }

    pub fn vehicle_locked(&self) -> bool {
        self.entry(&["LOCK_STATE_VEHICLE", "isLocked"]) == Some(json!(true))
    }

    /// True when every door, lid, and window reports closed.
    pub fn vehicle_closed(&self) -> bool {
        let data = self.data.lock().unwrap();
        data.iter()
            .filter(|(key, _)| key.starts_with("OPEN_STATE_"))
            .all(|(_, value)| value.get("isOpen") == Some(&json!(false)))
    }

    pub fn privacy_mode(&self) -> bool {
        self.entry(&["GLOBAL_PRIVACY_MODE", "isEnabled"]) == Some(json!(true))
    }

    pub fn remote_climatise_on(&self) -> bool {
        self.entry(&["CLIMATIZER_STATE", "isOn"]) == Some(json!(true))
    }

    pub fn direct_charge_on(&self) -> bool {
        self.entry(&["BATTERY_CHARGING_STATE", "directChargingState"])
            == Some(json!("ENABLED_ON"))
    }

    /// Target state of charge of the active charging profile.
    pub fn charging_target(&self) -> Option<i64> {
        let data = self.data.lock().unwrap();
        charging_target_of(&data)
    }

    /// Vehicle position as (latitude, longitude, heading).
    pub fn location(&self) -> Option<(f64, f64, Option<i64>)> {
        let raw = self.string_entry(&["GPS_LOCATION", "location"])?;
        let (lat, lon) = raw.split_once(',')?;
        let lat = lat.trim().parse().ok()?;
        let lon = lon.trim().parse().ok()?;
        let heading = self.entry(&["GPS_LOCATION", "direction"]).and_then(|v| v.as_i64());
        Some((lat, lon, heading))
    }

    /// Timestamp of the latest position update.
    pub fn location_updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.string_entry(&["GPS_LOCATION", "lastModified"])?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|stamp| stamp.with_timezone(&Utc))
    }

    /// Fetches the cached status overview and folds it into the data map.
    /// API failures are logged and leave the previous data in place.
    pub async fn get_stored_overview(&self) {
        log::debug!("getting stored status for vehicle {}", self.vin);
        let path = format!("connect/v1/vehicles/{}?{}", self.vin, *MEASUREMENT_QUERY);
        self.fetch_overview(&path).await;
    }

    /// Like [`get_stored_overview`](Self::get_stored_overview), but asks the
    /// backend to wake the vehicle for fresh values first.
    pub async fn get_current_overview(&self) {
        log::debug!("getting current status for vehicle {}", self.vin);
        let path = format!(
            "connect/v1/vehicles/{}?{}&wakeUpJob={}",
            self.vin,
            *MEASUREMENT_QUERY,
            http::random_id()
        );
        self.fetch_overview(&path).await;
    }

    async fn fetch_overview(&self, path: &str) {
        match self.connection.get(path).await {
            Ok(status) => {
                *self.status.lock().unwrap() = status;
                self.update_vehicle_data();
            }
            Err(err) => {
                log::warn!("could not get overview for {}: {err}", self.vin);
            }
        }
    }

    /// Fetches which measurements and commands this vehicle supports.
    pub async fn get_capabilities(&self) {
        log::debug!("getting capabilities for vehicle {}", self.vin);
        let path = format!(
            "connect/v1/vehicles/{}?{}&{}",
            self.vin, *MEASUREMENT_QUERY, *COMMAND_QUERY
        );
        match self.connection.get(&path).await {
            Ok(capabilities) => *self.capabilities.lock().unwrap() = capabilities,
            Err(err) => log::warn!("could not get capabilities for {}: {err}", self.vin),
        }
    }

    pub fn capabilities(&self) -> Value {
        self.capabilities.lock().unwrap().clone()
    }

    pub async fn get_trip_statistics(&self) {
        log::debug!("getting trip statistics for vehicle {}", self.vin);
        let path = format!("connect/v1/vehicles/{}?{}", self.vin, *TRIP_QUERY);
        match self.connection.get(&path).await {
            Ok(statistics) => *self.trip_statistics.lock().unwrap() = statistics,
            Err(err) => log::warn!("could not get trip statistics for {}: {err}", self.vin),
        }
    }

    pub fn trip_statistics(&self) -> Value {
        self.trip_statistics.lock().unwrap().clone()
    }

    /// Fetches the URLs of the vehicle pictures, keyed by view.
    pub async fn get_picture_locations(&self) {
        log::debug!("getting picture urls for vehicle {}", self.vin);
        let path = format!("connect/v1/vehicles/{}/pictures", self.vin);
        match self.connection.get(&path).await {
            Ok(pictures) => {
                let mut locations = self.picture_locations.lock().unwrap();
                for picture in pictures.as_array().into_iter().flatten() {
                    if let (Some(view), Some(url)) = (
                        picture.get("view").and_then(Value::as_str),
                        picture.get("url").and_then(Value::as_str),
                    ) {
                        locations.insert(view.to_string(), url.to_string());
                    }
                }
            }
            Err(err) => log::warn!("could not get pictures for {}: {err}", self.vin),
        }
    }

    pub fn picture_locations(&self) -> HashMap<String, String> {
        self.picture_locations.lock().unwrap().clone()
    }

    /// Sets the minimum charge level on the active charging profile and
    /// submits the edited profile list. Levels are clamped to 25..=100, the
    /// range the backend accepts.
    pub async fn set_minimum_charge_level(&self, level: i64) -> PorscheResult<RemoteServiceStatus> {
        let level = level.clamp(25, 100);
        let (profiles, active_id) = {
            let data = self.data.lock().unwrap();
            let profiles = data
                .get("CHARGING_PROFILES")
                .and_then(|value| value.get("list"))
                .and_then(Value::as_array)
                .cloned();
            let active_id = data
                .get("BATTERY_CHARGING_STATE")
                .and_then(|value| value.get("activeProfileId"))
                .and_then(Value::as_i64);
            (profiles, active_id)
        };

        let mut profiles = profiles.ok_or_else(|| {
            PorscheError::RemoteService(RemoteServiceError {
                message: "no charging profiles known; fetch the vehicle overview first".into(),
                details: Value::Null,
            })
        })?;
        for profile in profiles.iter_mut() {
            if profile.get("id").and_then(Value::as_i64) == active_id {
                profile["minSoc"] = json!(level);
            }
        }

        self.remote_services().update_charging_profile(profiles).await
    }

    fn entry(&self, path: &[&str]) -> Option<Value> {
        let data = self.data.lock().unwrap();
        let (first, rest) = path.split_first()?;
        let mut current = data.get(*first)?;
        for segment in rest {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    fn string_entry(&self, path: &[&str]) -> Option<String> {
        match self.entry(path)? {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    /// Folds the fetched status into the data map: base fields plus every
    /// enabled measurement, with the charging normalizations applied.
    fn update_vehicle_data(&self) {
        let status = self.status.lock().unwrap().clone();
        if status.get("vin").is_none() {
            log::debug!("base data missing for vehicle {}", self.vin);
            return;
        }

        let mut merged = Map::new();
        for key in BASE_DATA {
            if let Some(value) = status.get(*key) {
                merged.insert((*key).to_string(), value.clone());
            }
        }
        let name = merged
            .get("customName")
            .and_then(Value::as_str)
            .filter(|custom| !custom.is_empty())
            .or_else(|| merged.get("modelName").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        merged.insert("name".to_string(), json!(name));

        for measurement in status
            .get("measurements")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let enabled = measurement
                .get("status")
                .and_then(|status| status.get("isEnabled"))
                == Some(&json!(true));
            if !enabled {
                continue;
            }
            if let (Some(key), Some(value)) = (
                measurement.get("key").and_then(Value::as_str),
                measurement.get("value"),
            ) {
                merged.insert(key.to_string(), value.clone());
            }
        }

        if let Some(charging) = merged.get_mut("BATTERY_CHARGING_STATE") {
            // the backend reports km/min while everything else is km/h, and
            // drops the rate fields entirely while not charging
            match charging.get("chargingRate").and_then(Value::as_f64) {
                Some(rate) => charging["chargingRate"] = json!(rate * 60.0),
                None => charging["chargingRate"] = json!(0),
            }
            if charging.get("chargingPower").is_none() {
                charging["chargingPower"] = json!(0);
            }
        }

        let mut data = self.data.lock().unwrap();
        for (key, value) in merged {
            data.insert(key, value);
        }

        // the reported minSoC does not track profile edits, so maintain a
        // shadow value derived from the charging mode
        if let Some(summary_mode) = data
            .get("CHARGING_SUMMARY")
            .and_then(|summary| summary.get("mode"))
            .and_then(Value::as_str)
            .map(str::to_owned)
        {
            let min_soc = if summary_mode == "DIRECT" {
                Some(100)
            } else {
                charging_target_of(&data).or(Some(80))
            };
            if let (Some(summary), Some(min_soc)) = (data.get_mut("CHARGING_SUMMARY"), min_soc) {
                summary["minSoC"] = json!(min_soc);
            }
        }
    }
}

fn charging_target_of(data: &Map<String, Value>) -> Option<i64> {
    let profiles = data
        .get("CHARGING_PROFILES")?
        .get("list")?
        .as_array()?;
    let active_id = data
        .get("BATTERY_CHARGING_STATE")?
        .get("activeProfileId")?
        .as_i64()?;
    profiles
        .iter()
        .find(|profile| profile.get("id").and_then(Value::as_i64) == Some(active_id))?
        .get("minSoc")?
        .as_i64()
}
