//! Account-level entry point: one connection, the vehicles attached to it.

use std::sync::Arc;

use serde_json::Value;

use crate::auth::Credentials;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::PorscheResult;
use crate::vehicle::PorscheVehicle;

pub struct PorscheConnectAccount {
    connection: Arc<Connection>,
    vehicles: Vec<Arc<PorscheVehicle>>,
}

impl PorscheConnectAccount {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_connection(Arc::new(Connection::new(credentials)))
    }

    pub fn with_config(credentials: Credentials, config: Config) -> Self {
        Self::with_connection(Arc::new(Connection::with_config(credentials, config)))
    }

    /// Builds an account around an existing connection, e.g. one with a
    /// restored token blob.
    pub fn with_connection(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            vehicles: Vec::new(),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Returns the vehicles of this account, fetching the list on first use
    /// or when `force_init` is set. Each vehicle is seeded with its stored
    /// status overview.
    pub async fn get_vehicles(
        &mut self,
        force_init: bool,
    ) -> PorscheResult<&[Arc<PorscheVehicle>]> {
        if self.vehicles.is_empty() || force_init {
            self.init_vehicles().await?;
        }
        Ok(&self.vehicles)
    }

    async fn init_vehicles(&mut self) -> PorscheResult<()> {
        log::debug!("building vehicle list");
        let listing = self.connection.get("connect/v1/vehicles").await?;

        let mut vehicles = Vec::new();
        for entry in listing.as_array().into_iter().flatten() {
            let vin = match entry.get("vin").and_then(Value::as_str) {
                Some(vin) => vin.to_string(),
                None => {
                    log::warn!("skipping vehicle entry without a vin");
                    continue;
                }
            };
            log::debug!("got vehicle {vin}");
            let data = entry.as_object().cloned().unwrap_or_default();
            let vehicle = Arc::new(PorscheVehicle::with_data(
                self.connection.clone(),
                vin,
                data,
            ));
            vehicle.get_stored_overview().await;
            vehicles.push(vehicle);
        }

        self.vehicles = vehicles;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{start_mock_server, test_config, valid_snapshot};
    use httpmock::prelude::*;
    use serde_json::json;

    fn make_account(server: &httpmock::MockServer) -> PorscheConnectAccount {
        let connection = Arc::new(Connection::with_config(
            Credentials::new("user@example.com", "hunter2"),
            test_config(server),
        ));
        connection.restore_token(valid_snapshot());
        PorscheConnectAccount::with_connection(connection)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn vehicle_list_is_fetched_once_and_cached() {
        let server = start_mock_server();
        let mut account = make_account(&server);

        let listing = server.mock(|when, then| {
            when.method(GET).path("/connect/v1/vehicles");
            then.status(200).json_body(json!([
                {"vin": "WP0AAA", "modelName": "Taycan"},
                {"vin": "WP0BBB", "modelName": "Macan"}
            ]));
        });

        let vins: Vec<String> = account
            .get_vehicles(false)
            .await
            .expect("listing should succeed")
            .iter()
            .map(|vehicle| vehicle.vin().to_string())
            .collect();
        assert_eq!(vins, vec!["WP0AAA", "WP0BBB"]);

        account
            .get_vehicles(false)
            .await
            .expect("cached listing should succeed");
        assert_eq!(listing.hits(), 1);

        account
            .get_vehicles(true)
            .await
            .expect("forced refresh should succeed");
        assert_eq!(listing.hits(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listing_entries_seed_the_vehicle_data() {
        let server = start_mock_server();
        let mut account = make_account(&server);

        server.mock(|when, then| {
            when.method(GET).path("/connect/v1/vehicles");
            then.status(200)
                .json_body(json!([{"vin": "WP0AAA", "modelName": "Taycan"}]));
        });

        let vehicles = account
            .get_vehicles(false)
            .await
            .expect("listing should succeed");
        assert_eq!(vehicles[0].model_name().as_deref(), Some("Taycan"));
    }
}
