//! Response envelopes and the error-to-status mapping for the HTTP surface.
//!
//! Every successful response is `{"data": …}`; lists add a pagination block;
//! failures are `{"error": {"code", "message"}}`. Messages are human-readable
//! and never carry credentials, tokens or internal identifiers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use glcmd_service::ServiceError;

// ---------------------------------------------------------------------------
// Success envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64, total: i64, page_len: usize) -> Self {
        Pagination {
            limit,
            offset,
            total,
            has_more: offset + (page_len as i64) < total,
        }
    }
}

/// Runtime counters served by GET /metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub uptime_secs: u64,
    pub sse_subscribers: usize,
    pub db_pool_size: u32,
    pub db_pool_idle: usize,
    pub consecutive_errors: u32,
    pub last_fetch_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Sensor aggregates as served by GET /v1/sensor/stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatsResponse {
    pub total: i64,
    pub ended_count: i64,
    pub avg_actual_days: Option<f64>,
    pub min_actual_days: Option<f64>,
    pub max_actual_days: Option<f64>,
    pub avg_expected_days: Option<f64>,
}

impl From<glcmd_db::SensorStatisticsRow> for SensorStatsResponse {
    fn from(row: glcmd_db::SensorStatisticsRow) -> Self {
        SensorStatsResponse {
            total: row.total,
            ended_count: row.ended_count,
            avg_actual_days: row.avg_actual_days,
            min_actual_days: row.min_actual_days,
            max_actual_days: row.max_actual_days,
            avg_expected_days: row.avg_expected_days,
        }
    }
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// A handler failure carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("{what} not found"),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }

    pub fn timeout() -> Self {
        ApiError {
            status: StatusCode::GATEWAY_TIMEOUT,
            message: "request deadline exceeded".to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.status.as_u16(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound => ApiError::not_found("resource"),
            ServiceError::Validation(msg) => ApiError::validation(msg),
            ServiceError::Store(store_err) => {
                // The driver detail stays in the log; clients get a generic 500.
                error!(error = %store_err, "store error while serving request");
                ApiError::internal()
            }
        }
    }
}
