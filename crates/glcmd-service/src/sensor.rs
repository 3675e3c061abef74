//! Sensor service: the replacement transaction and the monotonic
//! last-measurement stamp.

use chrono::{DateTime, Utc};
use glcmd_db::sensor as repo;
use glcmd_db::{execute_in_transaction, StoreError};
use glcmd_schemas::SensorConfig;
use sqlx::SqlitePool;
use tracing::info;

use crate::ServiceError;

#[derive(Clone)]
pub struct SensorService {
    pool: SqlitePool,
}

impl SensorService {
    pub fn new(pool: SqlitePool) -> Self {
        SensorService { pool }
    }

    /// Record the sensor reported by the current fetch cycle.
    ///
    /// Runs as one transaction: when a different serial is current, that
    /// sensor is ended (at its own last reading when it has one, otherwise
    /// now) and the incoming sensor is saved. Returns `true` when the
    /// incoming serial became current: there was no current sensor, or
    /// a replacement happened.
    pub async fn handle_sensor_change(&self, incoming: &SensorConfig) -> Result<bool, ServiceError> {
        let incoming = incoming.clone();

        let is_new = execute_in_transaction(&self.pool, move |tx| {
            Box::pin(async move {
                let current = match repo::find_current(&mut **tx).await {
                    Ok(c) => Some(c),
                    Err(StoreError::NotFound) => None,
                    Err(err) => return Err(err),
                };

                let mut record = incoming;
                let is_new = match &current {
                    None => true,
                    Some(cur) if cur.serial_number != record.serial_number => {
                        let ended_at = cur.last_measurement_at.unwrap_or_else(Utc::now);
                        repo::set_ended_at(&mut **tx, &cur.serial_number, ended_at).await?;
                        true
                    }
                    Some(cur) => {
                        // Same sensor re-reported: the upsert refreshes its
                        // attributes, but the reading stamp must not regress.
                        record.last_measurement_at =
                            match (cur.last_measurement_at, record.last_measurement_at) {
                                (Some(a), Some(b)) => Some(a.max(b)),
                                (a, b) => a.or(b),
                            };
                        false
                    }
                };

                repo::upsert_sensor(&mut **tx, &record).await?;
                Ok(is_new)
            })
        })
        .await?;

        if is_new {
            info!("sensor change recorded");
        }
        Ok(is_new)
    }

    /// Advance the current sensor's `last_measurement_at`, but only forward.
    /// Out-of-order arrivals are ignored; no current sensor is a no-op.
    pub async fn update_last_measurement_if_newer(
        &self,
        t: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let current = match repo::find_current(&self.pool).await {
            Ok(c) => c,
            Err(StoreError::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let newer = current.last_measurement_at.map_or(true, |last| t > last);
        if newer {
            let mut updated = current;
            updated.last_measurement_at = Some(t);
            repo::upsert_sensor(&self.pool, &updated).await?;
        }
        Ok(())
    }

    pub async fn current(&self) -> Result<SensorConfig, ServiceError> {
        Ok(repo::find_current(&self.pool).await?)
    }

    pub async fn list(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SensorConfig>, i64), ServiceError> {
        let rows = repo::list_sensors(&self.pool, start, end, limit, offset).await?;
        let total = repo::count_sensors(&self.pool, start, end).await?;
        Ok((rows, total))
    }

    pub async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<glcmd_db::SensorStatisticsRow, ServiceError> {
        Ok(repo::sensor_statistics(&self.pool, start, end).await?)
    }
}
