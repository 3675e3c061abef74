//! Shared runtime state for glcmd-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The fetch loop and the
//! health endpoint share [`FetchState`] behind an async RwLock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use glcmd_broker::EventBroker;
use glcmd_service::{GlucoseService, SensorService, SettingsService};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// FetchState
// ---------------------------------------------------------------------------

/// Mutable fetch-loop bookkeeping, owned here and read by `/health` and
/// `/metrics`.
#[derive(Debug, Clone, Default)]
pub struct FetchState {
    pub consecutive_errors: u32,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (via Arc) handle shared across all Axum handlers and the
/// background fetch loop.
pub struct AppState {
    pub pool: SqlitePool,
    pub broker: Arc<EventBroker>,
    pub glucose: GlucoseService,
    pub sensor: SensorService,
    pub settings: SettingsService,
    pub fetch: RwLock<FetchState>,
    pub fetch_interval: Duration,
}

impl AppState {
    pub fn new(pool: SqlitePool, broker: Arc<EventBroker>, fetch_interval: Duration) -> Self {
        AppState {
            glucose: GlucoseService::new(pool.clone(), Arc::clone(&broker)),
            sensor: SensorService::new(pool.clone()),
            settings: SettingsService::new(pool.clone()),
            pool,
            broker,
            fetch: RwLock::new(FetchState::default()),
            fetch_interval,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
