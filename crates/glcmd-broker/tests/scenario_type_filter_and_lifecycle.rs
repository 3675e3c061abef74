//! Subscription filters, unsubscribe semantics, and the heartbeat lifecycle.

use std::sync::Arc;
use std::time::Duration;

use glcmd_broker::{Event, EventBroker, EventKind};
use uuid::Uuid;

#[tokio::test]
async fn filter_delivers_only_requested_kinds() {
    let broker = Arc::new(EventBroker::new());
    let id = Uuid::new_v4();
    let mut rx = broker.subscribe(id, vec![EventKind::Glucose]);

    broker.publish(&Event::glucose(serde_json::json!({ "valueMgDl": 112 })));
    broker.publish(&Event::sensor(serde_json::json!({ "serialNumber": "A" })));
    broker.publish(&Event::keepalive());

    let only = rx.recv().await.unwrap();
    assert_eq!(only.kind, EventKind::Glucose);
    assert!(rx.try_recv().is_err(), "sensor and keepalive were filtered");
}

#[tokio::test]
async fn empty_filter_receives_everything() {
    let broker = Arc::new(EventBroker::new());
    let id = Uuid::new_v4();
    let mut rx = broker.subscribe(id, Vec::new());

    broker.publish(&Event::glucose(serde_json::Value::Null));
    broker.publish(&Event::sensor(serde_json::Value::Null));
    broker.publish(&Event::keepalive());

    let kinds: Vec<EventKind> = vec![
        rx.recv().await.unwrap().kind,
        rx.recv().await.unwrap().kind,
        rx.recv().await.unwrap().kind,
    ];
    assert_eq!(
        kinds,
        vec![EventKind::Glucose, EventKind::Sensor, EventKind::Keepalive]
    );
}

#[tokio::test]
async fn unsubscribe_closes_the_stream() {
    let broker = Arc::new(EventBroker::new());
    let id = Uuid::new_v4();
    let mut rx = broker.subscribe(id, Vec::new());

    broker.unsubscribe(&id);
    assert_eq!(broker.subscriber_count(), 0);
    assert!(rx.recv().await.is_none(), "receiver observes end-of-stream");
}

#[tokio::test]
async fn heartbeat_emits_keepalives_until_stop() {
    let broker = Arc::new(EventBroker::new());
    let id = Uuid::new_v4();
    let mut rx = broker.subscribe(id, Vec::new());

    Arc::clone(&broker).start(Duration::from_millis(20));

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("keepalive within a second")
        .unwrap();
    assert_eq!(first.kind, EventKind::Keepalive);
    assert_eq!(first.data_json(), "{}", "null payload renders as {{}}");

    broker.stop();
    assert_eq!(broker.subscriber_count(), 0);

    // Queue may still hold buffered keepalives; the stream must end after them.
    while let Some(ev) = rx.recv().await {
        assert_eq!(ev.kind, EventKind::Keepalive);
    }
}

#[test]
fn event_kind_parse_is_lenient_on_case_only() {
    assert_eq!(EventKind::parse("glucose"), Some(EventKind::Glucose));
    assert_eq!(EventKind::parse(" SENSOR "), Some(EventKind::Sensor));
    assert_eq!(EventKind::parse("keepalive"), Some(EventKind::Keepalive));
    assert_eq!(EventKind::parse("metrics"), None);
}
