//! Business services over the repositories: retry-wrapped persistence, event
//! publication, statistics assembly, and the sensor lifecycle transitions.

use std::future::Future;
use std::time::Duration;

use glcmd_db::StoreError;
use thiserror::Error;
use tracing::warn;

pub mod glucose;
pub mod sensor;
pub mod settings;

pub use glucose::{GlucoseService, GlucoseStatistics, TimeInRange};
pub use sensor::SensorService;
pub use settings::SettingsService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound,
            other => ServiceError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_CAP: Duration = Duration::from_millis(500);
const RETRY_MULTIPLIER: u32 = 2;
const MAX_RETRIES: u32 = 3;

/// Message fragments that mark a store error as transient. Anything else
/// fails immediately.
const RETRYABLE_MESSAGES: &[&str] = &[
    "database is locked",
    "SQLITE_BUSY",
    "connection refused",
    "connection reset",
    "timeout",
];

pub fn is_retryable(err: &StoreError) -> bool {
    let msg = err.to_string();
    RETRYABLE_MESSAGES.iter().any(|pat| msg.contains(pat))
}

/// Run `op` with exponential backoff on transient store errors.
pub(crate) async fn retry_store<T, F, Fut>(what: &'static str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = RETRY_INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                attempt += 1;
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * RETRY_MULTIPLIER).min(RETRY_BACKOFF_CAP);
            }
            Err(err) => return Err(err),
        }
    }
}
