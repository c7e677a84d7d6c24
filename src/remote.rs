//! Remote command execution: submit to the commands endpoint, then poll the
//! status sub-resource until the backend reports a terminal state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use crate::connection::Connection;
use crate::error::{PorscheError, PorscheResult, RemoteServiceError};
use crate::vehicle::measurement_query;

/// Execution state reported by the command backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Accepted,
    InProgress,
    Performed,
    Error,
    Unknown,
}

impl ExecutionState {
    /// Maps a wire value onto a state. The backend vocabulary has grown over
    /// API revisions; everything unrecognized is `Unknown` and treated as
    /// still in flight.
    fn from_wire(value: &str) -> Self {
        match value {
            "ACCEPTED" => ExecutionState::Accepted,
            "PENDING" | "IN_PROGRESS" | "INITIATED" | "DELIVERED" => ExecutionState::InProgress,
            "PERFORMED" | "EXECUTED" | "SUCCESS" => ExecutionState::Performed,
            "ERROR" | "FAILED" => ExecutionState::Error,
            _ => ExecutionState::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Performed | ExecutionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Accepted => "ACCEPTED",
            ExecutionState::InProgress => "IN_PROGRESS",
            ExecutionState::Performed => "PERFORMED",
            ExecutionState::Error => "ERROR",
            ExecutionState::Unknown => "UNKNOWN",
        }
    }
}

/// How the dispatcher polls: cadence, deadline, and which response fields
/// carry the state and the status id. The field lists absorb format drift
/// between backend revisions.
#[derive(Debug, Clone)]
pub struct PollingPolicy {
    /// Fixed delay between polls.
    pub interval: Duration,
    /// Wall-clock limit measured from when polling begins.
    pub deadline: Duration,
    /// Dotted JSON paths probed, in order, for the execution state.
    pub state_fields: Vec<String>,
    /// Dotted JSON paths probed, in order, for the status id.
    pub id_fields: Vec<String>,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(240),
            state_fields: vec![
                "status.result".to_string(),
                "actionState".to_string(),
                "eventStatus".to_string(),
            ],
            id_fields: vec!["status.id".to_string(), "id".to_string()],
        }
    }
}

/// Status of one remote command execution as reported by the backend.
#[derive(Debug, Clone)]
pub struct RemoteServiceStatus {
    pub state: ExecutionState,
    pub status_id: Option<String>,
    /// Full response payload, kept for diagnostics.
    pub details: Value,
}

impl RemoteServiceStatus {
    /// Builds a status from a backend response, probing the policy's field
    /// paths for the state and status id.
    pub fn from_response(response: Value, policy: &PollingPolicy) -> Self {
        let state = policy
            .state_fields
            .iter()
            .find_map(|field| lookup(&response, field))
            .map(ExecutionState::from_wire)
            .unwrap_or(ExecutionState::Unknown);
        let status_id = policy
            .id_fields
            .iter()
            .find_map(|field| lookup(&response, field))
            .map(str::to_owned);
        Self {
            state,
            status_id,
            details: response,
        }
    }

    fn state_reported(&self, policy: &PollingPolicy) -> bool {
        policy
            .state_fields
            .iter()
            .any(|field| lookup(&self.details, field).is_some())
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_str()
}

/// Triggers remote services on one vehicle.
///
/// Owns nothing between calls beyond the VIN it was built with; the
/// connection (and with it the token) is shared.
pub struct RemoteServices {
    connection: Arc<Connection>,
    vin: String,
    policy: PollingPolicy,
}

impl RemoteServices {
    pub fn new(connection: Arc<Connection>, vin: impl Into<String>) -> Self {
        Self::with_policy(connection, vin, PollingPolicy::default())
    }

    pub fn with_policy(
        connection: Arc<Connection>,
        vin: impl Into<String>,
        policy: PollingPolicy,
    ) -> Self {
        Self {
            connection,
            vin: vin.into(),
            policy,
        }
    }

    pub async fn lock(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("LOCK", json!({})).await
    }

    pub async fn unlock(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("UNLOCK", json!({})).await
    }

    pub async fn honk_and_flash(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("HONK_FLASH", json!({})).await
    }

    pub async fn climatise_start(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("REMOTE_CLIMATIZER_START", json!({})).await
    }

    pub async fn climatise_stop(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("REMOTE_CLIMATIZER_STOP", json!({})).await
    }

    pub async fn direct_charging_start(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("DIRECT_CHARGING_START", json!({})).await
    }

    pub async fn direct_charging_stop(&self) -> PorscheResult<RemoteServiceStatus> {
        self.execute("DIRECT_CHARGING_STOP", json!({})).await
    }

    /// Replaces the vehicle's charging profile list.
    pub async fn update_charging_profile(
        &self,
        profiles: Vec<Value>,
    ) -> PorscheResult<RemoteServiceStatus> {
        self.execute("CHARGING_PROFILES_EDIT", json!({ "list": profiles }))
            .await
    }

    /// Submits a command and awaits its terminal status.
    pub async fn execute(&self, key: &str, payload: Value) -> PorscheResult<RemoteServiceStatus> {
        log::debug!("executing remote command {} for {}", key, self.vin);
        let body = json!({ "key": key, "payload": payload });
        let response = self
            .connection
            .post(
                &format!("connect/v1/vehicles/{}/commands", self.vin),
                Some(&body),
            )
            .await?;
        let submitted = RemoteServiceStatus::from_response(response, &self.policy);

        let result = self.await_terminal(submitted).await;
        // the backend caches vehicle state; re-read it so subsequent queries
        // see the command's effect. Never masks the command's own outcome.
        self.refresh_vehicle_data().await;
        result
    }

    async fn await_terminal(
        &self,
        submitted: RemoteServiceStatus,
    ) -> PorscheResult<RemoteServiceStatus> {
        if submitted.state == ExecutionState::Error {
            return Err(command_failed(submitted));
        }

        let status_id = match submitted.status_id.clone() {
            Some(id) => id,
            None => {
                if submitted.state_reported(&self.policy) {
                    // the backend answered synchronously; nothing to poll
                    return Ok(submitted);
                }
                return Err(PorscheError::RemoteService(RemoteServiceError {
                    message: "command response carried neither a status id nor a result".into(),
                    details: submitted.details,
                }));
            }
        };

        if submitted.state != ExecutionState::Accepted && submitted.state_reported(&self.policy) {
            return Ok(submitted);
        }
        self.poll_until_terminal(&status_id, submitted).await
    }

    async fn poll_until_terminal(
        &self,
        status_id: &str,
        mut last: RemoteServiceStatus,
    ) -> PorscheResult<RemoteServiceStatus> {
        let deadline = Instant::now() + self.policy.deadline;
        loop {
            sleep(self.policy.interval).await;
            // no further polls once the deadline has elapsed
            if Instant::now() >= deadline {
                return Err(PorscheError::RemoteService(RemoteServiceError {
                    message: format!(
                        "remote command timed out after {}s in state {}",
                        self.policy.deadline.as_secs_f64(),
                        last.state.as_str()
                    ),
                    details: last.details,
                }));
            }

            let response = self
                .connection
                .get(&format!(
                    "connect/v1/vehicles/{}/commands/{}",
                    self.vin, status_id
                ))
                .await?;
            let status = RemoteServiceStatus::from_response(response, &self.policy);
            log::debug!("remote command {} is {}", status_id, status.state.as_str());

            match status.state {
                ExecutionState::Performed => return Ok(status),
                ExecutionState::Error => return Err(command_failed(status)),
                // Unknown included: the backend reports spurious unknown
                // states transiently
                _ => last = status,
            }
        }
    }

    async fn refresh_vehicle_data(&self) {
        let path = format!(
            "connect/v1/vehicles/{}?{}",
            self.vin,
            measurement_query()
        );
        if let Err(err) = self.connection.get(&path).await {
            log::warn!("vehicle data refresh after command failed: {err}");
        }
    }
}

fn command_failed(status: RemoteServiceStatus) -> PorscheError {
    PorscheError::RemoteService(RemoteServiceError {
        message: format!("remote command ended in state {}", status.state.as_str()),
        details: status.details,
    })
}
