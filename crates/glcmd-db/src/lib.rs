//! SQLite persistence for the glcmd gateway.
//!
//! Repositories are free async functions generic over the executor, so every
//! call participates in whatever the caller passes: the pool for standalone
//! statements, or a live transaction handle inside
//! [`uow::execute_in_transaction`].

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

pub mod glucose;
pub mod sensor;
pub mod settings;
pub mod uow;

pub use glucose::{GlucoseStatisticsRow, MeasurementFilter};
pub use sensor::SensorStatisticsRow;
pub use uow::execute_in_transaction;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("requested row not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Open (creating if missing) the SQLite database at `path`.
///
/// The store is single-writer by design: one pooled connection, WAL journal,
/// and a busy timeout so a competing reader surfaces as a retryable
/// "database is locked" instead of an immediate failure.
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;

    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Test helper: fresh in-memory database with migrations applied.
pub async fn testkit_pool() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Connectivity probe used by the health endpoint.
pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, i32>("select 1")
        .fetch_one(pool)
        .await
        .map(|one| one == 1)
        .unwrap_or(false)
}
