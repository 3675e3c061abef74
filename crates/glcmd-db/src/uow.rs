//! Unit of work: run a closure's repository calls inside one transaction.

use futures_util::future::BoxFuture;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::StoreError;

/// Begin a transaction, hand it to `op`, commit on `Ok`, roll back on `Err`
/// (returning the original error). Nested calls are not supported.
///
/// Repository functions are generic over the executor, so inside `op` they
/// join the transaction by taking `&mut **tx`:
///
/// ```ignore
/// execute_in_transaction(&pool, |tx| {
///     Box::pin(async move {
///         let current = sensor::find_current(&mut **tx).await?;
///         sensor::set_ended_at(&mut **tx, &current.serial_number, ended).await?;
///         sensor::upsert_sensor(&mut **tx, &incoming).await
///     })
/// })
/// .await?;
/// ```
pub async fn execute_in_transaction<T, F>(pool: &SqlitePool, op: F) -> Result<T, StoreError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, Result<T, StoreError>>,
{
    let mut tx = pool.begin().await?;

    match op(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            // Roll back best-effort; the caller's error is the one that matters.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}
