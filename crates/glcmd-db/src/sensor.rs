//! Sensor lifecycle repository.
//!
//! `ended_at` is deliberately excluded from the upsert: a sensor is ended
//! exactly once, through [`set_ended_at`], inside the replacement
//! transaction. This keeps the at-most-one-current invariant enforceable at
//! the call site that owns it.

use chrono::{DateTime, Utc};
use glcmd_schemas::SensorConfig;
use sqlx::{Row, Sqlite};

use crate::StoreError;

/// Aggregates over the sensor table. Actual durations are measured in days
/// between activation and end, over ended sensors only.
#[derive(Debug, Clone)]
pub struct SensorStatisticsRow {
    pub total: i64,
    pub ended_count: i64,
    pub avg_actual_days: Option<f64>,
    pub min_actual_days: Option<f64>,
    pub max_actual_days: Option<f64>,
    pub avg_expected_days: Option<f64>,
}

const SENSOR_COLUMNS: &str = "serial_number, activated_at, expires_at, ended_at, \
     last_measurement_at, sensor_type, duration_days, detected_at";

fn row_to_sensor(row: &sqlx::sqlite::SqliteRow) -> Result<SensorConfig, sqlx::Error> {
    Ok(SensorConfig {
        serial_number: row.try_get("serial_number")?,
        activated_at: row.try_get("activated_at")?,
        expires_at: row.try_get("expires_at")?,
        ended_at: row.try_get("ended_at")?,
        last_measurement_at: row.try_get("last_measurement_at")?,
        sensor_type: row.try_get("sensor_type")?,
        duration_days: row.try_get("duration_days")?,
        detected_at: row.try_get("detected_at")?,
    })
}

/// Upsert by serial number. On conflict every attribute is refreshed except
/// `ended_at`.
pub async fn upsert_sensor<'e, E>(ex: E, s: &SensorConfig) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into sensor_configs (
          serial_number, activated_at, expires_at, ended_at,
          last_measurement_at, sensor_type, duration_days, detected_at
        ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        on conflict (serial_number) do update
            set activated_at        = excluded.activated_at,
                expires_at          = excluded.expires_at,
                last_measurement_at = excluded.last_measurement_at,
                sensor_type         = excluded.sensor_type,
                duration_days       = excluded.duration_days,
                detected_at         = excluded.detected_at
        "#,
    )
    .bind(&s.serial_number)
    .bind(s.activated_at)
    .bind(s.expires_at)
    .bind(s.ended_at)
    .bind(s.last_measurement_at)
    .bind(s.sensor_type)
    .bind(s.duration_days)
    .bind(s.detected_at)
    .execute(ex)
    .await?;

    Ok(())
}

/// The sensor with `ended_at IS NULL`, newest detection first.
pub async fn find_current<'e, E>(ex: E) -> Result<SensorConfig, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "select {SENSOR_COLUMNS} from sensor_configs \
         where ended_at is null order by detected_at desc limit 1"
    ))
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(row_to_sensor(&row)?),
        None => Err(StoreError::NotFound),
    }
}

/// Look up one sensor by serial.
pub async fn find_by_serial<'e, E>(ex: E, serial: &str) -> Result<SensorConfig, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "select {SENSOR_COLUMNS} from sensor_configs where serial_number = ?1"
    ))
    .bind(serial)
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(row_to_sensor(&row)?),
        None => Err(StoreError::NotFound),
    }
}

/// Stamp `ended_at` on a single sensor. `NotFound` when the serial is absent.
pub async fn set_ended_at<'e, E>(
    ex: E,
    serial: &str,
    ended_at: DateTime<Utc>,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update sensor_configs
           set ended_at = ?2
         where serial_number = ?1
        returning id
        "#,
    )
    .bind(serial)
    .bind(ended_at)
    .fetch_optional(ex)
    .await?;

    match row {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound),
    }
}

/// Filtered page of sensors, newest detection first.
pub async fn list_sensors<'e, E>(
    ex: E,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: i64,
    offset: i64,
) -> Result<Vec<SensorConfig>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let limit = limit.clamp(1, 1000);
    let offset = offset.max(0);

    let rows = sqlx::query(&format!(
        r#"
        select {SENSOR_COLUMNS} from sensor_configs
        where (?1 is null or activated_at >= ?1)
          and (?2 is null or activated_at <= ?2)
        order by detected_at desc
        limit ?3 offset ?4
        "#
    ))
    .bind(start)
    .bind(end)
    .bind(limit)
    .bind(offset)
    .fetch_all(ex)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_sensor(&row)?);
    }
    Ok(out)
}

/// Total sensors matching the activation-date filter.
pub async fn count_sensors<'e, E>(
    ex: E,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*) from sensor_configs
        where (?1 is null or activated_at >= ?1)
          and (?2 is null or activated_at <= ?2)
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(ex)
    .await?;

    Ok(n)
}

/// Aggregate sensor statistics in one SQL pass.
pub async fn sensor_statistics<'e, E>(
    ex: E,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<SensorStatisticsRow, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        select
          count(*) as total,
          coalesce(sum(case when ended_at is not null then 1 else 0 end), 0)
              as ended_count,
          avg(case when ended_at is not null
                   then julianday(ended_at) - julianday(activated_at) end)
              as avg_actual_days,
          min(case when ended_at is not null
                   then julianday(ended_at) - julianday(activated_at) end)
              as min_actual_days,
          max(case when ended_at is not null
                   then julianday(ended_at) - julianday(activated_at) end)
              as max_actual_days,
          avg(cast(duration_days as real)) as avg_expected_days
        from sensor_configs
        where (?1 is null or activated_at >= ?1)
          and (?2 is null or activated_at <= ?2)
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(ex)
    .await?;

    Ok(SensorStatisticsRow {
        total: row.try_get("total")?,
        ended_count: row.try_get("ended_count")?,
        avg_actual_days: row.try_get("avg_actual_days")?,
        min_actual_days: row.try_get("min_actual_days")?,
        max_actual_days: row.try_get("max_actual_days")?,
        avg_expected_days: row.try_get("avg_expected_days")?,
    })
}
