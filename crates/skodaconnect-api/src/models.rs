//! Shapes returned by the vehicle data calls.
//!
//! Payloads are passed through as JSON; only the parts callers branch on get
//! their own types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored vehicle status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// The `StoredVehicleDataResponse` object as received.
    pub report: Value,
    /// Every field of every data block, keyed by field id.
    ///
    /// Fields that carry no `value` map to `Value::Null`.
    pub fields: BTreeMap<String, Value>,
}

impl VehicleStatus {
    /// Build from a `StoredVehicleDataResponse` object.
    pub fn from_report(report: Value) -> Self {
        let fields = flatten_fields(&report);
        Self { report, fields }
    }

    /// The `value` of a field, if the field is present and has one.
    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.fields.get(field_id)?.get("value")
    }
}

/// Collect `vehicleData.data[].field[]` into an id → field map.
///
/// Later duplicates win.
pub fn flatten_fields(report: &Value) -> BTreeMap<String, Value> {
    let blocks = report
        .pointer("/vehicleData/data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    blocks
        .iter()
        .filter_map(|block| block.get("field").and_then(Value::as_array))
        .flatten()
        .filter_map(|field| {
            let id = field.get("id").and_then(Value::as_str)?;
            let entry = if field.get("value").is_some() {
                field.clone()
            } else {
                Value::Null
            };
            Some((id.to_string(), entry))
        })
        .collect()
}

/// Where the car is, as far as the service will say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Position {
    /// The car is parked and reported its location.
    Parked {
        /// The `findCarResponse` object as received.
        find_car_response: Value,
    },
    /// The service answered 204: the car is moving and hides its position.
    Moving,
}

impl Position {
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Moving)
    }
}
