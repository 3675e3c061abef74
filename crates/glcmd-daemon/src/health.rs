//! Health derivation: a pure function of the fetch-loop state.

use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use glcmd_schemas::{HealthReport, HealthState};

use crate::state::FetchState;

/// Consecutive-error threshold at which the daemon reports unhealthy.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Derive the health report.
///
/// Base status comes from the error counter; a healthy daemon whose last
/// fetch is older than twice the interval degrades, because "no errors" is
/// meaningless when nothing has been fetched lately.
pub fn derive_health(
    fetch: &FetchState,
    database_connected: bool,
    fetch_interval: Duration,
    now: DateTime<Utc>,
    uptime_secs: u64,
) -> HealthReport {
    let data_fresh = match fetch.last_fetch_at {
        None => true,
        Some(at) => {
            let staleness_limit =
                chrono::Duration::from_std(fetch_interval * 2).unwrap_or(chrono::Duration::zero());
            now - at <= staleness_limit
        }
    };

    let mut status = if fetch.consecutive_errors == 0 {
        HealthState::Healthy
    } else if fetch.consecutive_errors < MAX_CONSECUTIVE_ERRORS {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    };

    if status == HealthState::Healthy && !data_fresh {
        status = HealthState::Degraded;
    }

    HealthReport {
        status,
        uptime_secs,
        consecutive_errors: fetch.consecutive_errors,
        last_fetch_at: fetch.last_fetch_at,
        last_fetch_error: fetch.last_error.clone(),
        database_connected,
        data_fresh,
        fetch_interval_secs: fetch_interval.as_secs(),
    }
}

/// HTTP mapping: healthy is 200, everything else is 503. A disconnected
/// database forces 503 regardless of the derived status.
pub fn http_status(report: &HealthReport) -> StatusCode {
    if !report.database_connected || report.status != HealthState::Healthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
