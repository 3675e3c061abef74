//! Unit of work: all repository calls inside the closure share one
//! transaction; an error rolls every write back and surfaces unchanged.

use chrono::{Duration, TimeZone, Utc};
use glcmd_db::{execute_in_transaction, sensor, StoreError};
use glcmd_schemas::SensorConfig;

fn sensor_config(serial: &str) -> SensorConfig {
    let activated = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    SensorConfig {
        serial_number: serial.to_string(),
        activated_at: activated,
        expires_at: activated + Duration::days(14),
        ended_at: None,
        last_measurement_at: None,
        sensor_type: 3,
        duration_days: 14,
        detected_at: activated,
    }
}

#[tokio::test]
async fn commit_applies_all_writes() {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let ended = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

    sensor::upsert_sensor(&pool, &sensor_config("OLD")).await.unwrap();

    execute_in_transaction(&pool, |tx| {
        Box::pin(async move {
            sensor::set_ended_at(&mut **tx, "OLD", ended).await?;
            sensor::upsert_sensor(&mut **tx, &sensor_config("NEW")).await
        })
    })
    .await
    .unwrap();

    let old = sensor::find_by_serial(&pool, "OLD").await.unwrap();
    assert_eq!(old.ended_at, Some(ended));
    assert_eq!(
        sensor::find_current(&pool).await.unwrap().serial_number,
        "NEW"
    );
}

#[tokio::test]
async fn error_rolls_back_earlier_writes() {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let ended = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

    sensor::upsert_sensor(&pool, &sensor_config("OLD")).await.unwrap();

    let result = execute_in_transaction(&pool, |tx| {
        Box::pin(async move {
            sensor::set_ended_at(&mut **tx, "OLD", ended).await?;
            // Second step targets a serial that does not exist.
            sensor::set_ended_at(&mut **tx, "MISSING", ended).await
        })
    })
    .await;

    assert!(
        matches!(result, Err(StoreError::NotFound)),
        "the original error must surface unchanged"
    );

    let old = sensor::find_by_serial(&pool, "OLD").await.unwrap();
    assert_eq!(old.ended_at, None, "first write was rolled back");
}
