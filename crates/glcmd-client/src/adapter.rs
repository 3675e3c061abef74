//! Vendor adapter: decodes the upstream connection payload into domain
//! records, deriving the expected sensor duration from the sensor-type code
//! and normalizing glucose units.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use glcmd_schemas::{
    DeviceInfo, GlucoseMeasurement, GlucoseTargets, SensorConfig, UserPreferences,
};

use crate::models::{ConnectionPayload, WireGlucoseMeasurement, WireSensor};
use crate::ClientError;

/// Upstream timestamps look like `3/5/2024 1:09:21 PM` and are UTC.
const VENDOR_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Units code marking `Value` as mmol/L.
const UNITS_MMOL: i32 = 1;

/// Everything one fetch cycle persists, decoded from a single payload.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub measurement: GlucoseMeasurement,
    pub sensor: SensorConfig,
    pub targets: GlucoseTargets,
    pub preferences: UserPreferences,
    pub device: Option<DeviceInfo>,
}

/// Expected wear duration in days by sensor-type code.
pub fn expected_duration_days(sensor_type: i32) -> i64 {
    match sensor_type {
        4 => 15,
        0 | 3 => 14,
        _ => 14,
    }
}

/// Parse a vendor wall-clock string as UTC.
pub fn parse_vendor_timestamp(s: &str) -> Result<DateTime<Utc>, ClientError> {
    NaiveDateTime::parse_from_str(s, VENDOR_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ClientError::Protocol(format!("unparseable vendor timestamp '{s}': {e}")))
}

fn decode_measurement(wire: &WireGlucoseMeasurement) -> Result<GlucoseMeasurement, ClientError> {
    let timestamp = parse_vendor_timestamp(&wire.timestamp)?;
    let factory_timestamp = parse_vendor_timestamp(&wire.factory_timestamp)?;

    let value_mg_dl = wire.value_in_mg_per_dl.round() as i64;
    let value_mmol = if wire.glucose_units == UNITS_MMOL {
        wire.value
    } else {
        mg_dl_to_mmol(value_mg_dl)
    };

    Ok(GlucoseMeasurement {
        timestamp,
        factory_timestamp,
        value_mmol,
        value_mg_dl,
        trend_arrow: wire.trend_arrow,
        measurement_color: wire.measurement_color,
        glucose_units: wire.glucose_units,
        is_high: wire.is_high,
        is_low: wire.is_low,
        kind: wire.item_type,
    })
}

/// mg/dL → mmol/L, rounded to one decimal the way the vendor app renders it.
pub fn mg_dl_to_mmol(mg_dl: i64) -> f64 {
    (mg_dl as f64 / 18.0 * 10.0).round() / 10.0
}

fn decode_sensor(wire: &WireSensor, detected_at: DateTime<Utc>) -> Result<SensorConfig, ClientError> {
    let activated_at = Utc
        .timestamp_opt(wire.a, 0)
        .single()
        .ok_or_else(|| ClientError::Protocol(format!("invalid sensor activation {}", wire.a)))?;
    let duration_days = expected_duration_days(wire.pt);

    Ok(SensorConfig {
        serial_number: wire.sn.clone(),
        activated_at,
        expires_at: activated_at + Duration::days(duration_days),
        ended_at: None,
        last_measurement_at: None,
        sensor_type: wire.pt,
        duration_days,
        detected_at,
    })
}

/// Decode one connection payload into the records a fetch cycle persists.
///
/// `now` becomes the sensor's `detected_at`; passing it in keeps the adapter
/// a pure function.
pub fn decode_connection(
    payload: &ConnectionPayload,
    now: DateTime<Utc>,
) -> Result<IngestRecord, ClientError> {
    let conn = &payload.connection;

    let wire_measurement = conn
        .glucose_measurement
        .as_ref()
        .ok_or_else(|| ClientError::Protocol("payload has no current measurement".to_string()))?;
    let measurement = decode_measurement(wire_measurement)?;

    // The sensor rides on the connection; fall back to the active-sensor list
    // when the upstream omits it there.
    let wire_sensor = conn
        .sensor
        .as_ref()
        .or_else(|| payload.active_sensors.first().map(|a| &a.sensor))
        .ok_or_else(|| ClientError::Protocol("payload has no sensor".to_string()))?;
    let sensor = decode_sensor(wire_sensor, now)?;

    let targets = GlucoseTargets {
        target_low: conn.target_low.round() as i64,
        target_high: conn.target_high.round() as i64,
    };

    let preferences = UserPreferences {
        first_name: conn.first_name.clone(),
        last_name: conn.last_name.clone(),
        country: conn.country.clone(),
        unit_of_measure: conn.uom,
    };

    let device = conn.patient_device.as_ref().map(|d| DeviceInfo {
        device_id: d.did.clone(),
        device_type: d.dtid,
        software_version: d.v.clone(),
        alarms_enabled: d.alarms,
    });

    Ok(IngestRecord {
        measurement,
        sensor,
        targets,
        preferences,
        device,
    })
}
