//! Glucose service: retry-wrapped save with event publication, and the
//! statistics assembly on top of the single-pass SQL aggregate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use glcmd_broker::{Event, EventBroker};
use glcmd_db::glucose as repo;
use glcmd_db::MeasurementFilter;
use glcmd_schemas::{GlucoseMeasurement, GlucoseTargets};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{retry_store, ServiceError};

/// GMI (estimated HbA1c) coefficients over mean mg/dL.
const GMI_INTERCEPT: f64 = 3.31;
const GMI_SLOPE: f64 = 0.02392;

#[derive(Clone)]
pub struct GlucoseService {
    pool: SqlitePool,
    broker: Arc<EventBroker>,
}

/// Time-in-range partition against the configured target band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInRange {
    pub below_count: i64,
    pub in_range_count: i64,
    pub above_count: i64,
    pub below_pct: f64,
    pub in_range_pct: f64,
    pub above_pct: f64,
}

/// Assembled statistics as served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseStatistics {
    pub count: i64,
    pub avg_mmol: Option<f64>,
    pub avg_mg_dl: Option<f64>,
    pub min_mmol: Option<f64>,
    pub max_mmol: Option<f64>,
    pub min_mg_dl: Option<i64>,
    pub max_mg_dl: Option<i64>,
    pub std_dev_mmol: Option<f64>,
    pub normal_count: i64,
    pub low_count: i64,
    pub high_count: i64,
    pub oldest_at: Option<DateTime<Utc>>,
    pub newest_at: Option<DateTime<Utc>>,
    /// Present only when targets were configured.
    pub time_in_range: Option<TimeInRange>,
    /// Glucose management indicator; present when there is an average.
    pub gmi: Option<f64>,
}

impl GlucoseService {
    pub fn new(pool: SqlitePool, broker: Arc<EventBroker>) -> Self {
        GlucoseService { pool, broker }
    }

    /// Persist one measurement, retrying transient store errors.
    ///
    /// Returns whether a row was actually inserted. A `glucose` event is
    /// published iff the row was new; duplicates never fan out.
    pub async fn save_measurement(&self, m: &GlucoseMeasurement) -> Result<bool, ServiceError> {
        let inserted =
            retry_store("insert_measurement", || repo::insert_measurement(&self.pool, m)).await?;

        if inserted {
            let payload = serde_json::to_value(m).unwrap_or(serde_json::Value::Null);
            self.broker.publish(&Event::glucose(payload));
            debug!(factory_timestamp = %m.factory_timestamp, "measurement ingested");
        } else {
            debug!(factory_timestamp = %m.factory_timestamp, "duplicate measurement skipped");
        }

        Ok(inserted)
    }

    pub async fn latest(&self) -> Result<GlucoseMeasurement, ServiceError> {
        Ok(repo::find_latest(&self.pool).await?)
    }

    /// One page plus the total for the pagination envelope.
    pub async fn list(
        &self,
        filter: MeasurementFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GlucoseMeasurement>, i64), ServiceError> {
        let rows = repo::list_measurements(&self.pool, filter, limit, offset).await?;
        let total = repo::count_measurements(&self.pool, filter).await?;
        Ok((rows, total))
    }

    /// Single-query statistics; stddev, TIR percentages and GMI are computed
    /// here because SQLite cannot.
    pub async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        targets: Option<GlucoseTargets>,
    ) -> Result<GlucoseStatistics, ServiceError> {
        let filter = MeasurementFilter {
            start,
            end,
            ..Default::default()
        };
        let row = repo::glucose_statistics(&self.pool, filter, targets).await?;

        let time_in_range = match (row.below_count, row.in_range_count, row.above_count) {
            (Some(below), Some(in_range), Some(above)) => {
                let pct = |n: i64| {
                    if row.count > 0 {
                        n as f64 / row.count as f64 * 100.0
                    } else {
                        0.0
                    }
                };
                Some(TimeInRange {
                    below_count: below,
                    in_range_count: in_range,
                    above_count: above,
                    below_pct: pct(below),
                    in_range_pct: pct(in_range),
                    above_pct: pct(above),
                })
            }
            _ => None,
        };

        let gmi = row
            .avg_mg_dl
            .filter(|avg| *avg > 0.0)
            .map(|avg| GMI_INTERCEPT + GMI_SLOPE * avg);

        Ok(GlucoseStatistics {
            count: row.count,
            avg_mmol: row.avg_mmol,
            avg_mg_dl: row.avg_mg_dl,
            min_mmol: row.min_mmol,
            max_mmol: row.max_mmol,
            min_mg_dl: row.min_mg_dl,
            max_mg_dl: row.max_mg_dl,
            std_dev_mmol: row.variance_mmol.map(f64::sqrt),
            normal_count: row.normal_count,
            low_count: row.low_count,
            high_count: row.high_count,
            oldest_at: row.oldest_at,
            newest_at: row.newest_at,
            time_in_range,
            gmi,
        })
    }
}
