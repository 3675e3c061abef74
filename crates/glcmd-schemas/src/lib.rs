//! Shared domain records for the glcmd gateway.
//!
//! Everything here is plain serde data passed between the client, the
//! repositories, the services and the HTTP layer. No I/O lives in this crate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A sensor with no reading for this long is considered unresponsive.
pub const UNRESPONSIVE_AFTER_MINUTES: i64 = 20;

// ---------------------------------------------------------------------------
// Glucose
// ---------------------------------------------------------------------------

/// One normalized glucose reading.
///
/// Identity is the upstream `factory_timestamp` (sensor-assigned, immune to
/// wall-clock skew); duplicate inserts are silently ignored by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseMeasurement {
    pub timestamp: DateTime<Utc>,
    pub factory_timestamp: DateTime<Utc>,
    /// Value in mmol/L.
    pub value_mmol: f64,
    /// Value in mg/dL.
    pub value_mg_dl: i64,
    /// Trend arrow 1..5; absent when the upstream omitted it.
    pub trend_arrow: Option<i32>,
    /// 1 normal, 2 warning, 3 critical.
    pub measurement_color: i32,
    pub glucose_units: i32,
    pub is_high: bool,
    pub is_low: bool,
    /// 0 historical, 1 current.
    #[serde(rename = "type")]
    pub kind: i32,
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// One physical sensor, identified by serial number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    pub serial_number: String,
    pub activated_at: DateTime<Utc>,
    /// `activated_at + duration_days`.
    pub expires_at: DateTime<Utc>,
    /// Null while this sensor is the current one.
    pub ended_at: Option<DateTime<Utc>>,
    pub last_measurement_at: Option<DateTime<Utc>>,
    pub sensor_type: i32,
    pub duration_days: i64,
    pub detected_at: DateTime<Utc>,
}

impl SensorConfig {
    /// Derived lifecycle status; computed on read, never stored.
    pub fn status_at(&self, now: DateTime<Utc>) -> SensorStatus {
        if self.ended_at.is_some() || now > self.expires_at {
            return SensorStatus::Stopped;
        }
        if let Some(last) = self.last_measurement_at {
            if now - last > Duration::minutes(UNRESPONSIVE_AFTER_MINUTES) {
                return SensorStatus::Unresponsive;
            }
        }
        SensorStatus::Running
    }

    /// Attach the status derived at `now` for API serialization.
    pub fn with_status(self, now: DateTime<Utc>) -> SensorView {
        let status = self.status_at(now);
        SensorView {
            sensor: self,
            status,
        }
    }
}

/// The exact status strings are part of the external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Running,
    Unresponsive,
    Stopped,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Running => "running",
            SensorStatus::Unresponsive => "unresponsive",
            SensorStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensor together with its derived status, as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorView {
    #[serde(flatten)]
    pub sensor: SensorConfig,
    pub status: SensorStatus,
}

// ---------------------------------------------------------------------------
// Singleton configuration rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub first_name: String,
    pub last_name: String,
    pub country: String,
    /// Upstream unit-of-measure code.
    pub unit_of_measure: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: i32,
    pub software_version: String,
    pub alarms_enabled: bool,
}

/// Target band in mg/dL; required for time-in-range computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseTargets {
    pub target_low: i64,
    pub target_high: i64,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// Point-in-time health snapshot, returned by GET /health.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub uptime_secs: u64,
    pub consecutive_errors: u32,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_fetch_error: Option<String>,
    pub database_connected: bool,
    pub data_fresh: bool,
    pub fetch_interval_secs: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
