//! End-to-end fetch cycles against a mocked upstream: duplicate ingest,
//! sensor replacement, and error accounting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use glcmd_broker::{EventBroker, EventKind};
use glcmd_client::{AuthSession, LinkUpClient};
use glcmd_daemon::{fetcher::Fetcher, state::AppState};
use glcmd_db::MeasurementFilter;
use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

const USER_ID: &str = "11111111-2222-3333-4444-555555555555";

async fn make_state() -> Arc<AppState> {
    let pool = glcmd_db::testkit_pool().await.unwrap();
    let broker = Arc::new(EventBroker::new());
    Arc::new(AppState::new(pool, broker, Duration::from_secs(300)))
}

fn login_body() -> serde_json::Value {
    json!({
        "status": 0,
        "data": {
            "user": { "id": USER_ID },
            "authTicket": {
                "token": "header.payload.signature",
                "expires": Utc::now().timestamp() + 86_400,
                "duration": 86_400
            }
        }
    })
}

fn connections_body() -> serde_json::Value {
    json!({
        "status": 0,
        "data": [{
            "id": "conn-1",
            "patientId": "patient-42",
            "country": "DE",
            "firstName": "Ada",
            "lastName": "L",
            "targetLow": 70.0,
            "targetHigh": 180.0,
            "uom": 0,
            "sensor": null,
            "glucoseMeasurement": null,
            "patientDevice": null
        }]
    })
}

fn graph_body(serial: &str, activation: i64, factory_ts: &str, mg_dl: f64) -> serde_json::Value {
    json!({
        "status": 0,
        "data": {
            "connection": {
                "id": "conn-1",
                "patientId": "patient-42",
                "country": "DE",
                "firstName": "Ada",
                "lastName": "L",
                "targetLow": 70.0,
                "targetHigh": 180.0,
                "uom": 0,
                "sensor": { "deviceId": "dev-1", "sn": serial, "a": activation, "pt": 3 },
                "glucoseMeasurement": {
                    "FactoryTimestamp": factory_ts,
                    "Timestamp": factory_ts,
                    "type": 1,
                    "ValueInMgPerDl": mg_dl,
                    "TrendArrow": 3,
                    "MeasurementColor": 1,
                    "GlucoseUnits": 0,
                    "Value": mg_dl,
                    "isHigh": false,
                    "isLow": false
                },
                "patientDevice": { "did": "dev-1", "dtid": 40068, "v": "4.12.0", "alarms": false }
            },
            "activeSensors": [],
            "graphData": []
        }
    })
}

async fn mock_auth(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/llu/auth/login");
            then.status(200).json_body(login_body());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections");
            then.status(200).json_body(connections_body());
        })
        .await;
}

#[tokio::test]
async fn duplicate_ingest_across_cycles_publishes_one_event() {
    let server = MockServer::start_async().await;
    mock_auth(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(200)
                .json_body(graph_body("3MH0000001", 1_709_280_000, "3/5/2024 12:00:00 PM", 112.0));
        })
        .await;

    let state = make_state().await;
    let mut rx = state.broker.subscribe(Uuid::new_v4(), vec![EventKind::Glucose]);
    let fetcher = Fetcher::new(
        LinkUpClient::new_with_base_url(server.base_url()),
        Arc::clone(&state),
        "user@example.com".to_string(),
        "hunter2".to_string(),
    );

    let mut session: Option<AuthSession> = None;
    fetcher.fetch_cycle(&mut session).await;
    fetcher.fetch_cycle(&mut session).await;

    // Same factory timestamp twice: one row, one event.
    let count = glcmd_db::glucose::count_measurements(&state.pool, MeasurementFilter::default())
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err(), "duplicate cycle must not fan out");

    let fetch = state.fetch.read().await.clone();
    assert_eq!(fetch.consecutive_errors, 0);
    assert!(fetch.last_fetch_at.is_some());

    // Singletons were upserted along the way.
    assert_eq!(
        state.settings.glucose_targets().await.unwrap().target_high,
        180
    );
    assert_eq!(state.settings.user_preferences().await.unwrap().country, "DE");
    assert_eq!(
        state.settings.device_info().await.unwrap().software_version,
        "4.12.0"
    );
}

#[tokio::test]
async fn sensor_replacement_ends_old_at_its_last_reading_and_publishes_once() {
    let server = MockServer::start_async().await;
    mock_auth(&server).await;

    let state = make_state().await;
    let mut sensor_rx = state.broker.subscribe(Uuid::new_v4(), vec![EventKind::Sensor]);
    let fetcher = Fetcher::new(
        LinkUpClient::new_with_base_url(server.base_url()),
        Arc::clone(&state),
        "user@example.com".to_string(),
        "hunter2".to_string(),
    );
    let mut session: Option<AuthSession> = None;

    // Cycle 1: sensor A with a reading at 12:00.
    let graph_a = server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(200)
                .json_body(graph_body("A", 1_709_280_000, "3/5/2024 12:00:00 PM", 110.0));
        })
        .await;
    fetcher.fetch_cycle(&mut session).await;
    graph_a.delete_async().await;

    let first_event = sensor_rx.recv().await.unwrap();
    assert_eq!(first_event.payload["serialNumber"], "A");

    // Cycle 2: sensor B, activated later, reading at 13:00.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(200)
                .json_body(graph_body("B", 1_709_640_000, "3/5/2024 1:00:00 PM", 115.0));
        })
        .await;
    fetcher.fetch_cycle(&mut session).await;

    let old = glcmd_db::sensor::find_by_serial(&state.pool, "A").await.unwrap();
    let expected_t1 = glcmd_client::adapter::parse_vendor_timestamp("3/5/2024 12:00:00 PM").unwrap();
    assert_eq!(
        old.ended_at,
        Some(expected_t1),
        "A ends at its own last reading, not now()"
    );

    let current = state.sensor.current().await.unwrap();
    assert_eq!(current.serial_number, "B");

    let second_event = sensor_rx.recv().await.unwrap();
    assert_eq!(second_event.payload["serialNumber"], "B");
    assert!(
        sensor_rx.try_recv().is_err(),
        "exactly one sensor event per replacement"
    );
}

#[tokio::test]
async fn upstream_failures_increment_the_error_counter() {
    let server = MockServer::start_async().await;
    mock_auth(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(500).body("upstream exploded");
        })
        .await;

    let state = make_state().await;
    let fetcher = Fetcher::new(
        LinkUpClient::new_with_base_url(server.base_url()),
        Arc::clone(&state),
        "user@example.com".to_string(),
        "hunter2".to_string(),
    );

    let mut session: Option<AuthSession> = None;
    for _ in 0..3 {
        fetcher.fetch_cycle(&mut session).await;
    }

    let fetch = state.fetch.read().await.clone();
    assert_eq!(fetch.consecutive_errors, 3);
    assert!(fetch.last_error.is_some());
    assert_eq!(fetch.last_fetch_at, None, "no successful fetch recorded");
}

#[tokio::test]
async fn rejected_credentials_keep_the_loop_alive() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/llu/auth/login");
            then.status(401).json_body(json!({ "message": "bad credentials" }));
        })
        .await;

    let state = make_state().await;
    let fetcher = Fetcher::new(
        LinkUpClient::new_with_base_url(server.base_url()),
        Arc::clone(&state),
        "user@example.com".to_string(),
        "wrong".to_string(),
    );

    let mut session: Option<AuthSession> = None;
    fetcher.fetch_cycle(&mut session).await;

    let fetch = state.fetch.read().await.clone();
    assert_eq!(fetch.consecutive_errors, 1);
    assert!(fetch
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("authentication"));
}
