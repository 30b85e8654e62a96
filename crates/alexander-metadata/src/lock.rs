//! Named advisory locks.
//!
//! A single row per lock name guards each GC sweep so that two nodes (or
//! two sweeps on one node) cannot double-reclaim. Acquisition is an insert;
//! a holder that died without releasing is taken over once its row is older
//! than the staleness window.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use crate::MetadataStore;
use crate::error::MetadataError;

/// Repository for advisory lock rows.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Try to take the named lock. Returns `false` when another live holder
    /// has it. A holder older than `stale_after` is displaced.
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        stale_after: std::time::Duration,
    ) -> Result<bool, MetadataError>;

    /// Release the named lock if `holder` still owns it.
    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), MetadataError>;
}

#[async_trait]
impl LockRepo for MetadataStore {
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        stale_after: std::time::Duration,
    ) -> Result<bool, MetadataError> {
        let now = Utc::now();
        let stale_cutoff =
            now - Duration::from_std(stale_after).unwrap_or_else(|_| Duration::hours(1));

        let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

        // Clear a stale holder first so the insert below can win.
        sqlx::query("DELETE FROM advisory_locks WHERE name = ?1 AND acquired_at < ?2")
            .bind(name)
            .bind(stale_cutoff)
            .execute(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;

        let result = sqlx::query(
            "INSERT INTO advisory_locks (name, holder, acquired_at) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(holder)
        .bind(now)
        .execute(&mut *tx)
        .await;

        let acquired = match result {
            Ok(_) => true,
            Err(e) if MetadataError::is_unique_violation(&e) => false,
            Err(e) => return Err(MetadataError::from_sqlx(e)),
        };

        tx.commit().await.map_err(MetadataError::from_sqlx)?;
        if acquired {
            debug!(name, holder, "acquired advisory lock");
        }
        Ok(acquired)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), MetadataError> {
        sqlx::query("DELETE FROM advisory_locks WHERE name = ?1 AND holder = ?2")
            .bind(name)
            .bind(holder)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }
}

/// Helper binding a lock row's timestamp for tests.
#[cfg(test)]
pub(crate) async fn backdate_lock(
    store: &MetadataStore,
    name: &str,
    acquired_at: chrono::DateTime<Utc>,
) -> Result<(), MetadataError> {
    sqlx::query("UPDATE advisory_locks SET acquired_at = ?2 WHERE name = ?1")
        .bind(name)
        .bind(acquired_at)
        .execute(store.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
    Ok(())
}
