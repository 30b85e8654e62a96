//! Blob reference accounting.
//!
//! The `blobs` table is the source of truth for which content hashes exist
//! and how many versions and multipart parts reference each one. Admission
//! is insert-or-increment: the uniqueness constraint on `content_hash`
//! resolves concurrent PUTs of the same content without any in-process
//! locking, and the loser of the insert race simply increments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use tracing::trace;

use crate::MetadataStore;
use crate::error::MetadataError;
use crate::retry::with_retries;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the `blobs` table.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    /// Hex SHA-256 of the plaintext content.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// Path relative to the data root.
    pub storage_path: String,
    /// Live references from versions and multipart parts.
    pub ref_count: i64,
    /// When the blob was first admitted.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every admit and release; drives the GC grace window.
    pub last_accessed: DateTime<Utc>,
    /// Whether the on-disk bytes are an SSE envelope.
    pub is_encrypted: bool,
}

/// Result of admitting a blob reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAdmission {
    /// Reference count after the admit.
    pub ref_count: i64,
    /// `true` when this admit created the row (first observation of the
    /// hash), `false` on a dedup increment.
    pub inserted: bool,
}

pub(crate) fn row_to_blob(row: &SqliteRow) -> Result<BlobRecord, MetadataError> {
    Ok(BlobRecord {
        content_hash: row.try_get("content_hash")?,
        size: row.try_get("size")?,
        storage_path: row.try_get("storage_path")?,
        ref_count: row.try_get("ref_count")?,
        created_at: row.try_get("created_at")?,
        last_accessed: row.try_get("last_accessed")?,
        is_encrypted: row.try_get("is_encrypted")?,
    })
}

// ---------------------------------------------------------------------------
// In-transaction helpers shared with the object and multipart repos
// ---------------------------------------------------------------------------

/// Insert-or-increment inside an open transaction.
pub(crate) async fn admit_blob_tx(
    conn: &mut SqliteConnection,
    content_hash: &str,
    size: i64,
    storage_path: &str,
    is_encrypted: bool,
) -> Result<BlobAdmission, MetadataError> {
    let now = Utc::now();
    let insert = sqlx::query(
        "INSERT INTO blobs (content_hash, size, storage_path, ref_count, created_at, last_accessed, is_encrypted)
         VALUES (?1, ?2, ?3, 1, ?4, ?4, ?5)",
    )
    .bind(content_hash)
    .bind(size)
    .bind(storage_path)
    .bind(now)
    .bind(is_encrypted)
    .execute(&mut *conn)
    .await;

    match insert {
        Ok(_) => {
            trace!(content_hash, "admitted new blob row");
            Ok(BlobAdmission {
                ref_count: 1,
                inserted: true,
            })
        }
        Err(e) if MetadataError::is_unique_violation(&e) => {
            sqlx::query(
                "UPDATE blobs SET ref_count = ref_count + 1, last_accessed = ?2
                 WHERE content_hash = ?1",
            )
            .bind(content_hash)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(MetadataError::from_sqlx)?;

            let ref_count: i64 =
                sqlx::query_scalar("SELECT ref_count FROM blobs WHERE content_hash = ?1")
                    .bind(content_hash)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(MetadataError::from_sqlx)?;

            trace!(content_hash, ref_count, "incremented blob ref");
            Ok(BlobAdmission {
                ref_count,
                inserted: false,
            })
        }
        Err(e) => Err(MetadataError::from_sqlx(e)),
    }
}

/// Decrement inside an open transaction, stamping `last_accessed` so the
/// GC grace window starts from the release.
pub(crate) async fn unref_blob_tx(
    conn: &mut SqliteConnection,
    content_hash: &str,
) -> Result<(), MetadataError> {
    sqlx::query(
        "UPDATE blobs
         SET ref_count = CASE WHEN ref_count > 0 THEN ref_count - 1 ELSE 0 END,
             last_accessed = ?2
         WHERE content_hash = ?1",
    )
    .bind(content_hash)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(MetadataError::from_sqlx)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// BlobRepo
// ---------------------------------------------------------------------------

/// Repository for blob rows and reference counts.
#[async_trait]
pub trait BlobRepo: Send + Sync {
    /// Admit a reference to `content_hash`, creating the row on first
    /// observation. Race-free under concurrent PUTs of the same content.
    async fn admit_blob(
        &self,
        content_hash: &str,
        size: i64,
        storage_path: &str,
        is_encrypted: bool,
    ) -> Result<BlobAdmission, MetadataError>;

    /// Look up a blob row.
    async fn get_blob(&self, content_hash: &str) -> Result<Option<BlobRecord>, MetadataError>;

    /// Release one reference.
    async fn release_blob(&self, content_hash: &str) -> Result<(), MetadataError>;

    /// Overwrite the encryption flag. Used when a lost blob file is
    /// re-admitted in a different envelope state than the row recorded.
    async fn set_blob_encryption(
        &self,
        content_hash: &str,
        is_encrypted: bool,
    ) -> Result<(), MetadataError>;

    /// Blobs with `ref_count = 0` whose last access is older than `cutoff`.
    async fn orphaned_blobs(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BlobRecord>, MetadataError>;

    /// Delete the row, but only while it is still unreferenced. Returns
    /// whether a row was removed.
    async fn remove_orphan(&self, content_hash: &str) -> Result<bool, MetadataError>;
}

#[async_trait]
impl BlobRepo for MetadataStore {
    async fn admit_blob(
        &self,
        content_hash: &str,
        size: i64,
        storage_path: &str,
        is_encrypted: bool,
    ) -> Result<BlobAdmission, MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;
            let admission =
                admit_blob_tx(&mut tx, content_hash, size, storage_path, is_encrypted).await?;
            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(admission)
        })
        .await
    }

    async fn get_blob(&self, content_hash: &str) -> Result<Option<BlobRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM blobs WHERE content_hash = ?1")
            .bind(content_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_blob).transpose()
    }

    async fn release_blob(&self, content_hash: &str) -> Result<(), MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;
            unref_blob_tx(&mut tx, content_hash).await?;
            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    async fn set_blob_encryption(
        &self,
        content_hash: &str,
        is_encrypted: bool,
    ) -> Result<(), MetadataError> {
        sqlx::query("UPDATE blobs SET is_encrypted = ?2 WHERE content_hash = ?1")
            .bind(content_hash)
            .bind(is_encrypted)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }

    async fn orphaned_blobs(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BlobRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT * FROM blobs
             WHERE ref_count = 0 AND last_accessed < ?1
             ORDER BY last_accessed
             LIMIT ?2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_blob).collect()
    }

    async fn remove_orphan(&self, content_hash: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query("DELETE FROM blobs WHERE content_hash = ?1 AND ref_count = 0")
            .bind(content_hash)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MetadataStore {
        MetadataStore::connect("sqlite::memory:")
            .await
            .expect("connect")
    }

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[tokio::test]
    async fn test_should_insert_then_increment_on_second_admit() {
        let store = store().await;

        let first = store
            .admit_blob(HASH, 128, "blobs/aa/aa/…", false)
            .await
            .expect("first admit");
        assert!(first.inserted);
        assert_eq!(first.ref_count, 1);

        let second = store
            .admit_blob(HASH, 128, "blobs/aa/aa/…", false)
            .await
            .expect("second admit");
        assert!(!second.inserted);
        assert_eq!(second.ref_count, 2);
    }

    #[tokio::test]
    async fn test_should_release_and_not_go_negative() {
        let store = store().await;
        store.admit_blob(HASH, 1, "p", false).await.expect("admit");

        store.release_blob(HASH).await.expect("release");
        store.release_blob(HASH).await.expect("release below zero");

        let blob = store.get_blob(HASH).await.expect("get").expect("present");
        assert_eq!(blob.ref_count, 0);
    }

    #[tokio::test]
    async fn test_should_find_orphans_past_cutoff_only() {
        let store = store().await;
        store.admit_blob(HASH, 1, "p", false).await.expect("admit");
        store.release_blob(HASH).await.expect("release");

        // The release just happened; a past cutoff sees nothing.
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store.orphaned_blobs(past, 100).await.expect("scan").is_empty());

        // A future cutoff sees the orphan.
        let future = Utc::now() + chrono::Duration::hours(1);
        let orphans = store.orphaned_blobs(future, 100).await.expect("scan");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].content_hash, HASH);
    }

    #[tokio::test]
    async fn test_should_not_remove_referenced_blob() {
        let store = store().await;
        store.admit_blob(HASH, 1, "p", false).await.expect("admit");

        assert!(!store.remove_orphan(HASH).await.expect("remove"));
        assert!(store.get_blob(HASH).await.expect("get").is_some());

        store.release_blob(HASH).await.expect("release");
        assert!(store.remove_orphan(HASH).await.expect("remove orphan"));
        assert!(store.get_blob(HASH).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_should_preserve_encryption_flag() {
        let store = store().await;
        store
            .admit_blob(HASH, 64, "blobs/aa/aa/x", true)
            .await
            .expect("admit");
        let blob = store.get_blob(HASH).await.expect("get").expect("present");
        assert!(blob.is_encrypted);
        assert_eq!(blob.size, 64);
    }
}
