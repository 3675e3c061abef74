//! In-process scenario tests for the REST endpoints.
//!
//! These tests spin up the Axum router without binding a TCP socket: each
//! test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use glcmd_broker::EventBroker;
use glcmd_daemon::{routes, state::AppState};
use glcmd_schemas::{GlucoseMeasurement, GlucoseTargets, SensorConfig};
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

async fn make_state() -> Arc<AppState> {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let broker = Arc::new(EventBroker::new());
    Arc::new(AppState::new(pool, broker, Duration::from_secs(300)))
}

async fn call(
    state: Arc<AppState>,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = routes::build_router(state).oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn measurement(minute: i64, mg_dl: i64) -> GlucoseMeasurement {
    let base = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
    GlucoseMeasurement {
        timestamp: base + ChronoDuration::minutes(minute),
        factory_timestamp: base + ChronoDuration::minutes(minute),
        value_mmol: mg_dl as f64 / 18.0,
        value_mg_dl: mg_dl,
        trend_arrow: Some(3),
        measurement_color: 1,
        glucose_units: 0,
        is_high: false,
        is_low: false,
        kind: 1,
    }
}

// ---------------------------------------------------------------------------
// First boot: empty store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_boot_health_is_healthy_and_latest_is_404() {
    let state = make_state().await;

    let (status, json) = call(Arc::clone(&state), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "healthy");
    assert_eq!(json["data"]["databaseConnected"], true);
    assert_eq!(json["data"]["dataFresh"], true);

    let (status, json) = call(Arc::clone(&state), "/v1/glucose/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], 404);
    assert!(json["error"]["message"].is_string());

    let (status, _) = call(state, "/v1/sensor/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn latest_returns_ingested_value() {
    let state = make_state().await;
    state.glucose.save_measurement(&measurement(0, 112)).await.unwrap();

    let (status, json) = call(state, "/v1/glucose/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["valueMgDl"], 112);
    assert_eq!(json["data"]["trendArrow"], 3);
    assert_eq!(json["data"]["type"], 1);
}

// ---------------------------------------------------------------------------
// Listing and pagination envelope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_envelope_carries_pagination() {
    let state = make_state().await;
    for minute in 0..5 {
        state
            .glucose
            .save_measurement(&measurement(minute, 100 + minute))
            .await
            .unwrap();
    }

    let (status, json) = call(Arc::clone(&state), "/v1/glucose?limit=2&offset=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    assert_eq!(json["pagination"]["limit"], 2);
    assert_eq!(json["pagination"]["offset"], 0);
    assert_eq!(json["pagination"]["total"], 5);
    assert_eq!(json["pagination"]["hasMore"], true);

    let (_, json) = call(state, "/v1/glucose?limit=2&offset=4").await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["pagination"]["hasMore"], false);
}

#[tokio::test]
async fn list_time_filters_narrow_the_page() {
    let state = make_state().await;
    for minute in 0..10 {
        state
            .glucose
            .save_measurement(&measurement(minute, 100))
            .await
            .unwrap();
    }

    let start = "2024-03-05T12:03:00Z";
    let end = "2024-03-05T12:06:00Z";
    let (status, json) =
        call(state, &format!("/v1/glucose?start={start}&end={end}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pagination"]["total"], 4);
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_with_no_rows_is_200_with_zero_count() {
    let state = make_state().await;
    let (status, json) = call(state, "/v1/glucose/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["count"], 0);
    assert!(json["data"]["gmi"].is_null());
}

#[tokio::test]
async fn stats_include_time_in_range_when_targets_are_stored() {
    let state = make_state().await;
    state
        .settings
        .save_glucose_targets(&GlucoseTargets {
            target_low: 70,
            target_high: 180,
        })
        .await
        .unwrap();
    for (minute, mg) in [(0, 60), (1, 120), (2, 250)] {
        state.glucose.save_measurement(&measurement(minute, mg)).await.unwrap();
    }

    let (status, json) = call(state, "/v1/glucose/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["count"], 3);
    let tir = &json["data"]["timeInRange"];
    assert_eq!(tir["belowCount"], 1);
    assert_eq!(tir["inRangeCount"], 1);
    assert_eq!(tir["aboveCount"], 1);
}

// ---------------------------------------------------------------------------
// Sensor endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sensor_latest_reports_derived_status() {
    let state = make_state().await;
    let activated = Utc::now() - ChronoDuration::days(2);
    let sensor = SensorConfig {
        serial_number: "3MH0000001".to_string(),
        activated_at: activated,
        expires_at: activated + ChronoDuration::days(14),
        ended_at: None,
        last_measurement_at: Some(Utc::now() - ChronoDuration::minutes(3)),
        sensor_type: 3,
        duration_days: 14,
        detected_at: activated,
    };
    state.sensor.handle_sensor_change(&sensor).await.unwrap();
    state
        .sensor
        .update_last_measurement_if_newer(Utc::now() - ChronoDuration::minutes(3))
        .await
        .unwrap();

    let (status, json) = call(Arc::clone(&state), "/v1/sensor/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["serialNumber"], "3MH0000001");
    assert_eq!(json["data"]["status"], "running");

    let (status, json) = call(state, "/v1/sensor/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["endedCount"], 0);
}

// ---------------------------------------------------------------------------
// Metrics and unknown routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_report_runtime_counters() {
    let state = make_state().await;
    let (status, json) = call(state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"]["uptimeSecs"].is_number());
    assert_eq!(json["data"]["sseSubscribers"], 0);
    assert!(json["data"]["dbPoolSize"].is_number());
    assert_eq!(json["data"]["consecutiveErrors"], 0);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let state = make_state().await;
    let (status, _) = call(state, "/v1/does_not_exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
