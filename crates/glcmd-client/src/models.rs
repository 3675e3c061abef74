//! Wire types for the LibreLinkUp JSON API, trimmed to the fields the
//! gateway consumes. Field names follow the upstream payload verbatim.

use serde::Deserialize;

/// Authentication ticket with token and expiration information.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTicket {
    pub token: String,
    /// Unix timestamp when the token expires.
    #[serde(default)]
    pub expires: i64,
    /// Seconds the token is valid for.
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub user: Option<LoginUser>,
    #[serde(rename = "authTicket")]
    pub auth_ticket: Option<AuthTicket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub status: i32,
    pub data: Option<LoginData>,
}

/// Sensor block on a connection.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSensor {
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
    /// Serial number.
    pub sn: String,
    /// Activation time as UTC epoch seconds.
    pub a: i64,
    /// Sensor type code; drives the expected wear duration.
    pub pt: i32,
}

/// Patient device block on a connection.
#[derive(Debug, Clone, Deserialize)]
pub struct WirePatientDevice {
    pub did: String,
    pub dtid: i32,
    pub v: String,
    #[serde(default)]
    pub alarms: bool,
}

/// One glucose reading as the upstream reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireGlucoseMeasurement {
    #[serde(rename = "FactoryTimestamp")]
    pub factory_timestamp: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// 0 historical, 1 current.
    #[serde(rename = "type")]
    pub item_type: i32,
    #[serde(rename = "ValueInMgPerDl")]
    pub value_in_mg_per_dl: f64,
    /// Absent on some historical points.
    #[serde(rename = "TrendArrow", default)]
    pub trend_arrow: Option<i32>,
    #[serde(rename = "MeasurementColor")]
    pub measurement_color: i32,
    /// 0 = mg/dL, 1 = mmol/L; governs the unit of `value`.
    #[serde(rename = "GlucoseUnits")]
    pub glucose_units: i32,
    /// Value in the configured unit.
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "isHigh")]
    pub is_high: bool,
    #[serde(rename = "isLow")]
    pub is_low: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireConnection {
    pub id: String,
    #[serde(rename = "patientId")]
    pub patient_id: String,
    #[serde(default)]
    pub country: String,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
    #[serde(rename = "targetLow")]
    pub target_low: f64,
    #[serde(rename = "targetHigh")]
    pub target_high: f64,
    pub uom: i32,
    pub sensor: Option<WireSensor>,
    #[serde(rename = "glucoseMeasurement")]
    pub glucose_measurement: Option<WireGlucoseMeasurement>,
    #[serde(rename = "patientDevice")]
    pub patient_device: Option<WirePatientDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsResponse {
    pub status: i32,
    pub data: Option<Vec<WireConnection>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveSensor {
    pub sensor: WireSensor,
    pub device: WirePatientDevice,
}

/// Payload of the per-patient graph endpoint: the connection (carrying the
/// current measurement) plus sensor metadata and the recent history.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionPayload {
    pub connection: WireConnection,
    #[serde(rename = "activeSensors", default)]
    pub active_sensors: Vec<ActiveSensor>,
    #[serde(rename = "graphData", default)]
    pub graph_data: Vec<WireGlucoseMeasurement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphResponse {
    pub status: i32,
    pub data: Option<ConnectionPayload>,
}
