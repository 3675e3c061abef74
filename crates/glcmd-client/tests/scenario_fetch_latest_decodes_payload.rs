//! Graph fetch against a mocked upstream, decoded end-to-end through the
//! vendor adapter.

use chrono::{Duration, Utc};
use glcmd_client::{account_id_for, decode_connection, AuthSession, ClientError, LinkUpClient};
use httpmock::prelude::*;
use serde_json::json;

fn session(token: &str, expires_in: Duration) -> AuthSession {
    AuthSession {
        token: token.to_string(),
        expires_at: Utc::now() + expires_in,
        duration_secs: expires_in.num_seconds(),
        user_id: "user-1".to_string(),
        patient_id: "patient-42".to_string(),
        account_id: account_id_for("user-1"),
    }
}

fn graph_body() -> serde_json::Value {
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
                "sensor": { "deviceId": "dev-1", "sn": "3MH0000001", "a": 1709280000, "pt": 3 },
                "glucoseMeasurement": {
                    "FactoryTimestamp": "3/5/2024 11:59:30 AM",
                    "Timestamp": "3/5/2024 12:00:00 PM",
                    "type": 1,
                    "ValueInMgPerDl": 112.0,
                    "TrendArrow": 3,
                    "MeasurementColor": 1,
                    "GlucoseUnits": 0,
                    "Value": 112.0,
                    "isHigh": false,
                    "isLow": false
                },
                "patientDevice": { "did": "dev-1", "dtid": 40068, "v": "4.12.0", "alarms": true }
            },
            "activeSensors": [],
            "graphData": []
        }
    })
}

#[tokio::test]
async fn fetch_latest_decodes_measurement_sensor_and_targets() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/llu/connections/patient-42/graph")
                .header("authorization", "Bearer a.b.c")
                .header("account-id", account_id_for("user-1"));
            then.status(200).json_body(graph_body());
        })
        .await;

    let client = LinkUpClient::new_with_base_url(server.base_url());
    let payload = client
        .fetch_latest(&session("a.b.c", Duration::hours(1)))
        .await
        .unwrap();
    mock.assert_async().await;

    let record = decode_connection(&payload, Utc::now()).unwrap();
    assert_eq!(record.measurement.value_mg_dl, 112);
    assert_eq!(record.measurement.trend_arrow, Some(3));
    assert_eq!(record.sensor.serial_number, "3MH0000001");
    assert_eq!(record.sensor.duration_days, 14);
    assert_eq!(record.targets.target_low, 70);
    assert_eq!(record.preferences.country, "DE");
    let device = record.device.unwrap();
    assert_eq!(device.device_type, 40068);
    assert!(device.alarms_enabled);
}

#[tokio::test]
async fn expired_session_never_reaches_the_wire() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(200).json_body(graph_body());
        })
        .await;

    let client = LinkUpClient::new_with_base_url(server.base_url());
    let err = client
        .fetch_latest(&session("a.b.c", Duration::seconds(-5)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Auth(_)));
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn nonzero_graph_status_is_protocol_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/llu/connections/patient-42/graph");
            then.status(200).json_body(json!({ "status": 4, "data": null }));
        })
        .await;

    let client = LinkUpClient::new_with_base_url(server.base_url());
    let err = client
        .fetch_latest(&session("a.b.c", Duration::hours(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}
