//! Glucose measurement repository.

use chrono::{DateTime, Utc};
use glcmd_schemas::{GlucoseMeasurement, GlucoseTargets};
use sqlx::{Row, Sqlite};

use crate::StoreError;

/// Optional AND-composed predicates over the measurement table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementFilter {
    /// Inclusive lower bound on `timestamp`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub end: Option<DateTime<Utc>>,
    pub color: Option<i32>,
    pub kind: Option<i32>,
}

/// Single-row SQL aggregate over the filtered measurement set.
///
/// `variance_mmol` is |E[X²] − E[X]²|; the square root is taken in the
/// service layer because SQLite has no SQRT.
#[derive(Debug, Clone)]
pub struct GlucoseStatisticsRow {
    pub count: i64,
    pub avg_mmol: Option<f64>,
    pub avg_mg_dl: Option<f64>,
    pub min_mmol: Option<f64>,
    pub max_mmol: Option<f64>,
    pub min_mg_dl: Option<i64>,
    pub max_mg_dl: Option<i64>,
    pub variance_mmol: Option<f64>,
    pub normal_count: i64,
    pub low_count: i64,
    pub high_count: i64,
    pub oldest_at: Option<DateTime<Utc>>,
    pub newest_at: Option<DateTime<Utc>>,
    /// Populated only when target bounds were supplied.
    pub below_count: Option<i64>,
    pub above_count: Option<i64>,
    pub in_range_count: Option<i64>,
}

const MEASUREMENT_COLUMNS: &str = "timestamp, factory_timestamp, value_mmol, value_mg_dl, \
     trend_arrow, measurement_color, glucose_units, is_high, is_low, kind";

fn row_to_measurement(row: &sqlx::sqlite::SqliteRow) -> Result<GlucoseMeasurement, sqlx::Error> {
    Ok(GlucoseMeasurement {
        timestamp: row.try_get("timestamp")?,
        factory_timestamp: row.try_get("factory_timestamp")?,
        value_mmol: row.try_get("value_mmol")?,
        value_mg_dl: row.try_get("value_mg_dl")?,
        trend_arrow: row.try_get("trend_arrow")?,
        measurement_color: row.try_get("measurement_color")?,
        glucose_units: row.try_get("glucose_units")?,
        is_high: row.try_get("is_high")?,
        is_low: row.try_get("is_low")?,
        kind: row.try_get("kind")?,
    })
}

/// Insert a measurement, deduplicating on `factory_timestamp`.
///
/// Returns `true` iff a row was actually inserted. The flag comes from the
/// `RETURNING` clause, not a follow-up SELECT, so it is race-free.
pub async fn insert_measurement<'e, E>(ex: E, m: &GlucoseMeasurement) -> Result<bool, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into glucose_measurements (
          timestamp, factory_timestamp, value_mmol, value_mg_dl, trend_arrow,
          measurement_color, glucose_units, is_high, is_low, kind
        ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        on conflict (factory_timestamp) do nothing
        returning id
        "#,
    )
    .bind(m.timestamp)
    .bind(m.factory_timestamp)
    .bind(m.value_mmol)
    .bind(m.value_mg_dl)
    .bind(m.trend_arrow)
    .bind(m.measurement_color)
    .bind(m.glucose_units)
    .bind(m.is_high)
    .bind(m.is_low)
    .bind(m.kind)
    .fetch_optional(ex)
    .await?;

    Ok(row.is_some())
}

/// Newest measurement by wall-clock timestamp.
pub async fn find_latest<'e, E>(ex: E) -> Result<GlucoseMeasurement, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "select {MEASUREMENT_COLUMNS} from glucose_measurements \
         order by timestamp desc limit 1"
    ))
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(row_to_measurement(&row)?),
        None => Err(StoreError::NotFound),
    }
}

/// Filtered page of measurements, newest first. `limit` is clamped to
/// [1, 1000] regardless of what the caller validated.
pub async fn list_measurements<'e, E>(
    ex: E,
    filter: MeasurementFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<GlucoseMeasurement>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let limit = limit.clamp(1, 1000);
    let offset = offset.max(0);

    let rows = sqlx::query(&format!(
        r#"
        select {MEASUREMENT_COLUMNS} from glucose_measurements
        where (?1 is null or timestamp >= ?1)
          and (?2 is null or timestamp <= ?2)
          and (?3 is null or measurement_color = ?3)
          and (?4 is null or kind = ?4)
        order by timestamp desc
        limit ?5 offset ?6
        "#
    ))
    .bind(filter.start)
    .bind(filter.end)
    .bind(filter.color)
    .bind(filter.kind)
    .bind(limit)
    .bind(offset)
    .fetch_all(ex)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_measurement(&row)?);
    }
    Ok(out)
}

/// Total rows matching `filter` (pagination denominator).
pub async fn count_measurements<'e, E>(ex: E, filter: MeasurementFilter) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*) from glucose_measurements
        where (?1 is null or timestamp >= ?1)
          and (?2 is null or timestamp <= ?2)
          and (?3 is null or measurement_color = ?3)
          and (?4 is null or kind = ?4)
        "#,
    )
    .bind(filter.start)
    .bind(filter.end)
    .bind(filter.color)
    .bind(filter.kind)
    .fetch_one(ex)
    .await?;

    Ok(n)
}

/// Aggregate statistics over the filtered set, computed in one SQL pass.
///
/// When `targets` is present, the below/above/in-range partition is computed
/// against its mg/dL bounds; otherwise those columns come back NULL.
pub async fn glucose_statistics<'e, E>(
    ex: E,
    filter: MeasurementFilter,
    targets: Option<GlucoseTargets>,
) -> Result<GlucoseStatisticsRow, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let lo = targets.map(|t| t.target_low);
    let hi = targets.map(|t| t.target_high);

    let row = sqlx::query(
        r#"
        select
          count(*)                                  as count,
          avg(value_mmol)                           as avg_mmol,
          avg(cast(value_mg_dl as real))            as avg_mg_dl,
          min(value_mmol)                           as min_mmol,
          max(value_mmol)                           as max_mmol,
          min(value_mg_dl)                          as min_mg_dl,
          max(value_mg_dl)                          as max_mg_dl,
          abs(avg(value_mmol * value_mmol)
              - avg(value_mmol) * avg(value_mmol))  as variance_mmol,
          coalesce(sum(case when measurement_color = 1 then 1 else 0 end), 0)
                                                    as normal_count,
          coalesce(sum(case when measurement_color in (2, 3) and is_low = 1
                            then 1 else 0 end), 0)  as low_count,
          coalesce(sum(case when measurement_color in (2, 3) and is_low = 0
                            then 1 else 0 end), 0)  as high_count,
          min(timestamp)                            as oldest_at,
          max(timestamp)                            as newest_at,
          case when ?5 is null then null
               else coalesce(sum(case when value_mg_dl < ?5 then 1 else 0 end), 0)
          end                                       as below_count,
          case when ?6 is null then null
               else coalesce(sum(case when value_mg_dl > ?6 then 1 else 0 end), 0)
          end                                       as above_count,
          case when ?5 is null or ?6 is null then null
               else coalesce(sum(case when value_mg_dl between ?5 and ?6
                                      then 1 else 0 end), 0)
          end                                       as in_range_count
        from glucose_measurements
        where (?1 is null or timestamp >= ?1)
          and (?2 is null or timestamp <= ?2)
          and (?3 is null or measurement_color = ?3)
          and (?4 is null or kind = ?4)
        "#,
    )
    .bind(filter.start)
    .bind(filter.end)
    .bind(filter.color)
    .bind(filter.kind)
    .bind(lo)
    .bind(hi)
    .fetch_one(ex)
    .await?;

    Ok(GlucoseStatisticsRow {
        count: row.try_get("count")?,
        avg_mmol: row.try_get("avg_mmol")?,
        avg_mg_dl: row.try_get("avg_mg_dl")?,
        min_mmol: row.try_get("min_mmol")?,
        max_mmol: row.try_get("max_mmol")?,
        min_mg_dl: row.try_get("min_mg_dl")?,
        max_mg_dl: row.try_get("max_mg_dl")?,
        variance_mmol: row.try_get("variance_mmol")?,
        normal_count: row.try_get("normal_count")?,
        low_count: row.try_get("low_count")?,
        high_count: row.try_get("high_count")?,
        oldest_at: row.try_get("oldest_at")?,
        newest_at: row.try_get("newest_at")?,
        below_count: row.try_get("below_count")?,
        above_count: row.try_get("above_count")?,
        in_range_count: row.try_get("in_range_count")?,
    })
}
