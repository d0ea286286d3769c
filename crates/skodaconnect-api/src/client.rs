//! Vehicle data calls over a shared [`Connection`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use skodaconnect_auth::{Authority, Connection};

use crate::error::{FetchError, Result};
use crate::models::{Position, VehicleStatus};

const OPERATION_LIST: &str = "/api/rolesrights/operationlist/v3/vehicles/$vin";
const CARPORT_DATA: &str = "fs-car/promoter/portfolio/v1/skoda/CZ/vehicle/$vin/carportdata";
const VEHICLE_STATUS: &str = "fs-car/bs/vsr/v1/skoda/CZ/vehicles/$vin/status";
const TRIP_STATISTICS: &str =
    "fs-car/bs/tripstatistics/v1/skoda/CZ/vehicles/$vin/tripdata/shortTerm?newest";
const POSITION: &str = "fs-car/bs/cf/v1/skoda/CZ/vehicles/$vin/position";
const TIMERS: &str = "fs-car/bs/departuretimer/v1/skoda/CZ/vehicles/$vin/timer";
const CLIMATER: &str = "fs-car/bs/climatisation/v1/skoda/CZ/vehicles/$vin/climater";
const CHARGER: &str = "fs-car/bs/batterycharge/v1/skoda/CZ/vehicles/$vin/charger";
const PRE_HEATER: &str = "fs-car/bs/rs/v1/skoda/CZ/vehicles/$vin/status";

/// Per-endpoint wrappers for the vehicle data services.
///
/// Each call makes sure a session exists, sends one GET with the token its
/// endpoint expects and unwraps the one field it is after. Nothing is
/// retried; a 401 leaves the connection expired so the next call refreshes.
#[derive(Clone)]
pub struct VehicleClient {
    connection: Arc<Connection>,
}

impl VehicleClient {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// VINs of the vehicles attached to the account.
    pub async fn vehicles(&self) -> Result<Vec<String>> {
        let url = self.connection.config().endpoints.vehicles.clone();
        let body = self.fetch("vehicles", Authority::VehicleApi, &url, "").await?;
        let vehicles = field(body, "/userVehicles/vehicle", "userVehicles.vehicle")?;

        match vehicles {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()),
            Value::String(vin) => Ok(vec![vin]),
            _ => Err(FetchError::missing("userVehicles.vehicle")),
        }
    }

    /// Look up the vehicle's home region and point the connection at it.
    ///
    /// Returns the region's base URI. A failed lookup leaves the connection
    /// and its current base URLs untouched.
    pub async fn home_region(&self, vin: &str) -> Result<String> {
        let url = self.connection.config().endpoints.home_region.clone();
        let body = self
            .fetch("home region", Authority::VehicleApi, &url, vin)
            .await?;
        let uri = field(
            body,
            "/homeRegion/baseUri/content",
            "homeRegion.baseUri.content",
        )?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FetchError::missing("homeRegion.baseUri.content"))?;

        self.connection.set_home_region(&uri).await;
        Ok(uri)
    }

    /// Services the vehicle supports and the account is licensed for.
    pub async fn operation_list(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("operation list", Authority::VehicleApi, OPERATION_LIST, vin)
            .await?;
        field(body, "/operationList", "operationList")
    }

    /// The customer-profile record for `vin`: nickname, model, and so on.
    pub async fn real_car_data(&self, vin: &str) -> Result<Value> {
        self.connection.ensure_session().await?;
        let subject = self.connection.identity_subject().await?;
        let url = format!(
            "{}/v1/customers/{subject}/realCarData",
            self.connection
                .config()
                .endpoints
                .customer_profile
                .trim_end_matches('/')
        );
        let body = self
            .fetch("real car data", Authority::Identity, &url, vin)
            .await?;

        let cars = field(body, "/realCars", "realCars")?;
        cars.as_array()
            .and_then(|cars| {
                cars.iter().find(|car| {
                    car.get("vehicleIdentificationNumber")
                        .and_then(Value::as_str)
                        == Some(vin)
                })
            })
            .cloned()
            .ok_or_else(|| FetchError::missing("realCars[vehicleIdentificationNumber]"))
    }

    // -----------------------------------------------------------------------
    // Vehicle
    // -----------------------------------------------------------------------

    /// Model, model year and similar catalogue data.
    pub async fn carport_data(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("carport data", Authority::VehicleApi, CARPORT_DATA, vin)
            .await?;
        field(body, "/carportData", "carportData")
    }

    /// The stored vehicle status report with its fields flattened.
    pub async fn vehicle_status(&self, vin: &str) -> Result<VehicleStatus> {
        let body = self
            .fetch("vehicle status", Authority::VehicleApi, VEHICLE_STATUS, vin)
            .await?;
        let report = field(body, "/StoredVehicleDataResponse", "StoredVehicleDataResponse")?;
        Ok(VehicleStatus::from_report(report))
    }

    /// Most recent short-term trip statistics.
    pub async fn trip_statistics(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("trip statistics", Authority::VehicleApi, TRIP_STATISTICS, vin)
            .await?;
        field(body, "/tripData", "tripData")
    }

    /// Parking position, or [`Position::Moving`] when the service answers 204.
    pub async fn position(&self, vin: &str) -> Result<Position> {
        let body = self
            .fetch("position", Authority::VehicleApi, POSITION, vin)
            .await?;

        if body.get("status_code").and_then(Value::as_u64) == Some(204) {
            debug!(vin, "no position while the car is moving");
            return Ok(Position::Moving);
        }
        Ok(Position::Parked {
            find_car_response: field(body, "/findCarResponse", "findCarResponse")?,
        })
    }

    pub async fn timers(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("timers", Authority::VehicleApi, TIMERS, vin)
            .await?;
        field(body, "/timer", "timer")
    }

    pub async fn climater(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("climatisation", Authority::VehicleApi, CLIMATER, vin)
            .await?;
        field(body, "/climater", "climater")
    }

    pub async fn charger(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("charger", Authority::VehicleApi, CHARGER, vin)
            .await?;
        field(body, "/charger", "charger")
    }

    /// Auxiliary heater status.
    pub async fn pre_heater(&self, vin: &str) -> Result<Value> {
        let body = self
            .fetch("pre-heater", Authority::VehicleApi, PRE_HEATER, vin)
            .await?;
        field(body, "/statusResponse", "statusResponse")
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn fetch(&self, what: &str, authority: Authority, path: &str, vin: &str) -> Result<Value> {
        self.connection.ensure_session().await?;
        self.connection
            .get_as(authority, path, vin)
            .await
            .map_err(|e| {
                warn!(vin, error = %e, "could not fetch {what}");
                FetchError::from(e)
            })
    }
}

/// Take the value at `pointer` out of `body`; absent or null is missing.
fn field(mut body: Value, pointer: &str, name: &str) -> Result<Value> {
    match body.pointer_mut(pointer).map(Value::take) {
        Some(Value::Null) | None => Err(FetchError::missing(name)),
        Some(value) => Ok(value),
    }
}
