//! Singleton configuration rows: user preferences, device info, glucose
//! targets. Each table holds at most one row behind a checked sentinel id;
//! `save_*` is create-or-update, `find_*` is `NotFound` on empty.

use chrono::Utc;
use glcmd_schemas::{DeviceInfo, GlucoseTargets, UserPreferences};
use sqlx::{Row, Sqlite};

use crate::StoreError;

pub async fn save_user_preferences<'e, E>(ex: E, p: &UserPreferences) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into user_preferences
            (sentinel_id, first_name, last_name, country, unit_of_measure, updated_at)
        values (1, ?1, ?2, ?3, ?4, ?5)
        on conflict (sentinel_id) do update
            set first_name      = excluded.first_name,
                last_name       = excluded.last_name,
                country         = excluded.country,
                unit_of_measure = excluded.unit_of_measure,
                updated_at      = excluded.updated_at
        "#,
    )
    .bind(&p.first_name)
    .bind(&p.last_name)
    .bind(&p.country)
    .bind(p.unit_of_measure)
    .bind(Utc::now())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn find_user_preferences<'e, E>(ex: E) -> Result<UserPreferences, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "select first_name, last_name, country, unit_of_measure \
         from user_preferences where sentinel_id = 1",
    )
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(UserPreferences {
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            country: row.try_get("country")?,
            unit_of_measure: row.try_get("unit_of_measure")?,
        }),
        None => Err(StoreError::NotFound),
    }
}

pub async fn save_device_info<'e, E>(ex: E, d: &DeviceInfo) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into device_info
            (sentinel_id, device_id, device_type, software_version, alarms_enabled, updated_at)
        values (1, ?1, ?2, ?3, ?4, ?5)
        on conflict (sentinel_id) do update
            set device_id        = excluded.device_id,
                device_type      = excluded.device_type,
                software_version = excluded.software_version,
                alarms_enabled   = excluded.alarms_enabled,
                updated_at       = excluded.updated_at
        "#,
    )
    .bind(&d.device_id)
    .bind(d.device_type)
    .bind(&d.software_version)
    .bind(d.alarms_enabled)
    .bind(Utc::now())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn find_device_info<'e, E>(ex: E) -> Result<DeviceInfo, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "select device_id, device_type, software_version, alarms_enabled \
         from device_info where sentinel_id = 1",
    )
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(DeviceInfo {
            device_id: row.try_get("device_id")?,
            device_type: row.try_get("device_type")?,
            software_version: row.try_get("software_version")?,
            alarms_enabled: row.try_get("alarms_enabled")?,
        }),
        None => Err(StoreError::NotFound),
    }
}

pub async fn save_glucose_targets<'e, E>(ex: E, t: &GlucoseTargets) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into glucose_targets (sentinel_id, target_low, target_high, updated_at)
        values (1, ?1, ?2, ?3)
        on conflict (sentinel_id) do update
            set target_low  = excluded.target_low,
                target_high = excluded.target_high,
                updated_at  = excluded.updated_at
        "#,
    )
    .bind(t.target_low)
    .bind(t.target_high)
    .bind(Utc::now())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn find_glucose_targets<'e, E>(ex: E) -> Result<GlucoseTargets, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "select target_low, target_high from glucose_targets where sentinel_id = 1",
    )
    .fetch_optional(ex)
    .await?;

    match row {
        Some(row) => Ok(GlucoseTargets {
            target_low: row.try_get("target_low")?,
            target_high: row.try_get("target_high")?,
        }),
        None => Err(StoreError::NotFound),
    }
}
