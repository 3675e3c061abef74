//! Dedup invariant: the set of persisted factory timestamps is unique, and
//! the inserted flag reflects what actually happened in the driver.

use chrono::{Duration, TimeZone, Utc};
use glcmd_db::glucose;
use glcmd_db::MeasurementFilter;
use glcmd_schemas::GlucoseMeasurement;

fn measurement(minute: i64) -> GlucoseMeasurement {
    let base = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
    GlucoseMeasurement {
        timestamp: base + Duration::minutes(minute),
        factory_timestamp: base + Duration::minutes(minute) - Duration::seconds(30),
        value_mmol: 6.2,
        value_mg_dl: 112,
        trend_arrow: Some(3),
        measurement_color: 1,
        glucose_units: 0,
        is_high: false,
        is_low: false,
        kind: 1,
    }
}

#[tokio::test]
async fn duplicate_insert_is_ignored_and_reported() {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let m = measurement(0);

    let first = glucose::insert_measurement(&pool, &m).await.unwrap();
    assert!(first, "first insert must report inserted=true");

    let second = glucose::insert_measurement(&pool, &m).await.unwrap();
    assert!(!second, "second insert must report inserted=false");

    let count = glucose::count_measurements(&pool, MeasurementFilter::default())
        .await
        .unwrap();
    assert_eq!(count, 1, "table size unchanged after the duplicate");
}

#[tokio::test]
async fn save_then_find_latest_round_trips_all_fields() {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let m = measurement(0);

    assert!(glucose::insert_measurement(&pool, &m).await.unwrap());
    let found = glucose::find_latest(&pool).await.unwrap();
    assert_eq!(found, m);
}

#[tokio::test]
async fn find_latest_on_empty_table_is_not_found() {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let err = glucose::find_latest(&pool).await.unwrap_err();
    assert!(matches!(err, glcmd_db::StoreError::NotFound));
}

#[tokio::test]
async fn latest_is_newest_by_timestamp() {
    let pool = glcmd_db::testkit_pool().await.unwrap();

    for minute in [0, 10, 5] {
        glucose::insert_measurement(&pool, &measurement(minute))
            .await
            .unwrap();
    }

    let latest = glucose::find_latest(&pool).await.unwrap();
    assert_eq!(latest.timestamp, measurement(10).timestamp);
}
