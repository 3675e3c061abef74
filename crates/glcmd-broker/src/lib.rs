//! Publish/subscribe hub between the ingest path and the SSE handlers.
//!
//! Every subscriber owns a bounded queue; `publish` is non-blocking by
//! contract. A full queue drops that event for that subscriber and never
//! delays the publisher or the other subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-subscriber queue depth. Slow consumers lose events past this point.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Cadence of the broker heartbeat in production.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Glucose,
    Sensor,
    Keepalive,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Glucose => "glucose",
            EventKind::Sensor => "sensor",
            EventKind::Keepalive => "keepalive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glucose" => Some(EventKind::Glucose),
            "sensor" => Some(EventKind::Sensor),
            "keepalive" => Some(EventKind::Keepalive),
            _ => None,
        }
    }
}

/// A broker event: a kind plus an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn glucose(payload: serde_json::Value) -> Self {
        Event {
            kind: EventKind::Glucose,
            payload,
        }
    }

    pub fn sensor(payload: serde_json::Value) -> Self {
        Event {
            kind: EventKind::Sensor,
            payload,
        }
    }

    pub fn keepalive() -> Self {
        Event {
            kind: EventKind::Keepalive,
            payload: serde_json::Value::Null,
        }
    }

    /// SSE `data:` line body; null payloads render as `{}`.
    pub fn data_json(&self) -> String {
        match &self.payload {
            serde_json::Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

struct Subscriber {
    tx: mpsc::Sender<Event>,
    /// Empty means every kind.
    kinds: Vec<EventKind>,
}

impl Subscriber {
    fn admits(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Fan-out hub. Subscribe/unsubscribe take the write lock, publish takes the
/// read lock; no lock is ever held across an await point.
pub struct EventBroker {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventBroker {
            subscribers: RwLock::new(HashMap::new()),
            heartbeat: Mutex::new(None),
            capacity,
        }
    }

    /// Register a subscriber and hand back the consumer end of its queue.
    /// An empty `kinds` list subscribes to everything.
    pub fn subscribe(&self, id: Uuid, kinds: Vec<EventKind>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
        subs.insert(id, Subscriber { tx, kinds });
        debug!(subscriber = %id, total = subs.len(), "subscriber added");
        rx
    }

    /// Remove a subscriber; its receiver observes end-of-stream.
    pub fn unsubscribe(&self, id: &Uuid) {
        let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
        if subs.remove(id).is_some() {
            debug!(subscriber = %id, total = subs.len(), "subscriber removed");
        }
    }

    /// Deliver `event` to every subscriber whose filter admits it.
    ///
    /// Enqueue is `try_send`: a full queue drops the event for that
    /// subscriber with a warning, a closed queue marks the subscriber for
    /// pruning. The publisher never waits.
    pub fn publish(&self, event: &Event) {
        let mut dead: Vec<Uuid> = Vec::new();

        {
            let subs = self.subscribers.read().expect("subscriber lock poisoned");
            for (id, sub) in subs.iter() {
                if !sub.admits(event.kind) {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            subscriber = %id,
                            kind = event.kind.as_str(),
                            "subscriber queue full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .len()
    }

    /// Launch the heartbeat task publishing a `keepalive` every `interval`.
    /// A second call while running is a no-op.
    pub fn start(self: Arc<Self>, interval: Duration) {
        let mut guard = self.heartbeat.lock().expect("heartbeat lock poisoned");
        if guard.is_some() {
            return;
        }

        let broker = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the cadence starts after it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broker.publish(&Event::keepalive());
            }
        });
        *guard = Some(handle);
    }

    /// Cancel the heartbeat, close every queue, clear the table.
    pub fn stop(&self) {
        if let Some(handle) = self
            .heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .take()
        {
            handle.abort();
        }

        let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
        subs.clear();
    }
}
