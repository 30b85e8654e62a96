//! Object and version repository.
//!
//! The `objects` table holds one row per live key with a pointer to its
//! current version; `object_versions` holds every revision, delete markers
//! included. Version ids are UUIDv7, so id order is creation order.
//!
//! The two transactional boundaries owned here:
//!
//! - **PUT commit**: blob admit (insert-or-increment) + version insert +
//!   current-pointer update in one transaction. On Disabled and Suspended
//!   buckets the null-version slot is replaced inside the same transaction,
//!   releasing the overwritten blob ref.
//! - **DELETE**: version delete + blob unref (Disabled), or delete-marker
//!   insert (Enabled / Suspended), in one transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use tracing::debug;
use uuid::Uuid;

use alexander_core::types::{BucketAcl, SseMode, VersioningState};

use crate::MetadataStore;
use crate::blobs::{BlobAdmission, admit_blob_tx, unref_blob_tx};
use crate::buckets::BucketRecord;
use crate::error::MetadataError;
use crate::retry::with_retries;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of `object_versions`.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    /// UUIDv7 version id; id order is creation order.
    pub version_id: String,
    /// Owning bucket id.
    pub bucket_id: String,
    /// Object key.
    pub key: String,
    /// Referenced blob hash; `None` for delete markers.
    pub content_hash: Option<String>,
    /// Plaintext size in bytes.
    pub size: i64,
    /// Wire ETag (unquoted).
    pub etag: String,
    /// Content type reported on GET.
    pub content_type: Option<String>,
    /// User-defined `x-amz-meta-*` pairs.
    pub user_metadata: HashMap<String, String>,
    /// Encryption recorded for response headers.
    pub sse: SseMode,
    /// Per-object ACL override; `None` inherits the bucket ACL.
    pub acl: Option<BucketAcl>,
    /// Whether this version hides the key instead of storing content.
    pub is_delete_marker: bool,
    /// Whether this version occupies the S3 "null" version slot.
    pub is_null_version: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl VersionRecord {
    /// The version id S3 shows to clients: `"null"` for null versions.
    #[must_use]
    pub fn wire_version_id(&self) -> &str {
        if self.is_null_version {
            "null"
        } else {
            &self.version_id
        }
    }
}

/// Everything needed to insert a new content version.
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Hex plaintext hash of the blob backing this version.
    pub content_hash: String,
    /// Plaintext size.
    pub size: i64,
    /// Blob path relative to the data root.
    pub storage_path: String,
    /// Unquoted ETag.
    pub etag: String,
    /// Content type.
    pub content_type: Option<String>,
    /// User metadata pairs.
    pub user_metadata: HashMap<String, String>,
    /// Requested encryption mode.
    pub sse: SseMode,
    /// Per-object ACL override.
    pub acl: Option<BucketAcl>,
    /// Whether the on-disk blob bytes are sealed.
    pub blob_encrypted: bool,
}

/// What a DELETE did.
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    /// Nothing existed under the key (Disabled buckets only).
    NoSuchObject,
    /// The version was removed outright and its blob ref released.
    Removed(VersionRecord),
    /// A delete marker now hides the key.
    Marker(VersionRecord),
}

pub(crate) fn row_to_version(row: &SqliteRow) -> Result<VersionRecord, MetadataError> {
    let sse: String = row.try_get("sse")?;
    let acl: Option<String> = row.try_get("acl")?;
    let metadata_json: String = row.try_get("user_metadata")?;
    Ok(VersionRecord {
        version_id: row.try_get("version_id")?,
        bucket_id: row.try_get("bucket_id")?,
        key: row.try_get("key")?,
        content_hash: row.try_get("content_hash")?,
        size: row.try_get("size")?,
        etag: row.try_get("etag")?,
        content_type: row.try_get("content_type")?,
        user_metadata: serde_json::from_str(&metadata_json)
            .map_err(|e| MetadataError::Conflict(format!("bad user_metadata json: {e}")))?,
        sse: sse
            .parse()
            .map_err(|_| MetadataError::Conflict(format!("bad sse value: {sse}")))?,
        acl: acl
            .map(|a| {
                a.parse()
                    .map_err(|_| MetadataError::Conflict(format!("bad acl value: {a}")))
            })
            .transpose()?,
        is_delete_marker: row.try_get("is_delete_marker")?,
        is_null_version: row.try_get("is_null_version")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// In-transaction building blocks
// ---------------------------------------------------------------------------

/// Remove the null-version row for a key (Disabled / Suspended PUT and
/// DELETE paths), releasing its blob ref when it held content.
async fn drop_null_version_tx(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    key: &str,
) -> Result<(), MetadataError> {
    let row = sqlx::query(
        "SELECT * FROM object_versions
         WHERE bucket_id = ?1 AND key = ?2 AND is_null_version = 1",
    )
    .bind(bucket_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(MetadataError::from_sqlx)?;

    let Some(row) = row else { return Ok(()) };
    let old = row_to_version(&row)?;

    sqlx::query("DELETE FROM object_versions WHERE version_id = ?1")
        .bind(&old.version_id)
        .execute(&mut *conn)
        .await
        .map_err(MetadataError::from_sqlx)?;

    if let Some(hash) = &old.content_hash {
        unref_blob_tx(conn, hash).await?;
    }
    Ok(())
}

/// Point the `objects` row at a new current version, creating the row when
/// the key is new.
async fn set_current_tx(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    key: &str,
    version_id: &str,
) -> Result<(), MetadataError> {
    sqlx::query(
        "INSERT INTO objects (bucket_id, key, current_version_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (bucket_id, key) DO UPDATE SET current_version_id = excluded.current_version_id",
    )
    .bind(bucket_id)
    .bind(key)
    .bind(version_id)
    .execute(conn)
    .await
    .map_err(MetadataError::from_sqlx)?;
    Ok(())
}

/// Insert a version row.
async fn insert_version_tx(
    conn: &mut SqliteConnection,
    record: &VersionRecord,
) -> Result<(), MetadataError> {
    let metadata_json = serde_json::to_string(&record.user_metadata)
        .map_err(|e| MetadataError::Conflict(format!("user_metadata encode: {e}")))?;
    sqlx::query(
        "INSERT INTO object_versions
         (version_id, bucket_id, key, content_hash, size, etag, content_type,
          user_metadata, sse, acl, is_delete_marker, is_null_version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&record.version_id)
    .bind(&record.bucket_id)
    .bind(&record.key)
    .bind(&record.content_hash)
    .bind(record.size)
    .bind(&record.etag)
    .bind(&record.content_type)
    .bind(metadata_json)
    .bind(record.sse.as_str())
    .bind(record.acl.map(|a| a.as_str()))
    .bind(record.is_delete_marker)
    .bind(record.is_null_version)
    .bind(record.created_at)
    .execute(conn)
    .await
    .map_err(MetadataError::from_sqlx)?;
    Ok(())
}

/// The PUT commit body, shared with multipart complete: blob admit, null-slot
/// replacement per versioning state, version insert, current-pointer update.
pub(crate) async fn commit_version_tx(
    conn: &mut SqliteConnection,
    bucket: &BucketRecord,
    key: &str,
    new: &NewVersion,
) -> Result<(VersionRecord, BlobAdmission), MetadataError> {
    let admission = admit_blob_tx(
        conn,
        &new.content_hash,
        new.size,
        &new.storage_path,
        new.blob_encrypted,
    )
    .await?;

    let is_null_version = match bucket.versioning {
        VersioningState::Enabled => false,
        VersioningState::Disabled | VersioningState::Suspended => {
            drop_null_version_tx(conn, &bucket.id, key).await?;
            true
        }
    };

    let record = VersionRecord {
        version_id: Uuid::now_v7().to_string(),
        bucket_id: bucket.id.clone(),
        key: key.to_owned(),
        content_hash: Some(new.content_hash.clone()),
        size: new.size,
        etag: new.etag.clone(),
        content_type: new.content_type.clone(),
        user_metadata: new.user_metadata.clone(),
        sse: new.sse,
        acl: new.acl,
        is_delete_marker: false,
        is_null_version,
        created_at: Utc::now(),
    };

    insert_version_tx(conn, &record).await?;
    set_current_tx(conn, &bucket.id, key, &record.version_id).await?;
    Ok((record, admission))
}

// ---------------------------------------------------------------------------
// ObjectRepo
// ---------------------------------------------------------------------------

/// Repository for objects and their versions.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    /// Commit a PUT: admit the blob reference and install the new version
    /// according to the bucket's versioning state, in one transaction.
    async fn commit_put(
        &self,
        bucket: &BucketRecord,
        key: &str,
        new: NewVersion,
    ) -> Result<(VersionRecord, BlobAdmission), MetadataError>;

    /// The current version of a key, delete markers included.
    async fn get_current(
        &self,
        bucket_id: &str,
        key: &str,
    ) -> Result<Option<VersionRecord>, MetadataError>;

    /// A specific version of a key. `"null"` resolves the null-version slot.
    async fn get_version(
        &self,
        bucket_id: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<VersionRecord>, MetadataError>;

    /// DELETE semantics for the bucket's versioning state.
    async fn delete_object(
        &self,
        bucket: &BucketRecord,
        key: &str,
    ) -> Result<DeleteOutcome, MetadataError>;

    /// Hard-delete a specific version, releasing its blob ref and repairing
    /// the current pointer. Returns the removed record.
    async fn delete_version(
        &self,
        bucket_id: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<VersionRecord>, MetadataError>;

    /// Current, non-delete-marker versions past `from_key`, key-ordered.
    /// One page of the listing scan. `inclusive` keeps a key equal to
    /// `from_key` in the page (used to start a scan at a prefix).
    async fn list_current_page(
        &self,
        bucket_id: &str,
        from_key: &str,
        inclusive: bool,
        limit: i64,
    ) -> Result<Vec<VersionRecord>, MetadataError>;

    /// Distinct keys with any version past `from_key`, key-ordered.
    async fn list_keys_with_versions(
        &self,
        bucket_id: &str,
        from_key: &str,
        inclusive: bool,
        limit: i64,
    ) -> Result<Vec<String>, MetadataError>;

    /// Every version of one key, newest first.
    async fn versions_for_key(
        &self,
        bucket_id: &str,
        key: &str,
    ) -> Result<Vec<VersionRecord>, MetadataError>;

    /// Current content versions under `prefix` created before `cutoff`.
    async fn expired_current_versions(
        &self,
        bucket_id: &str,
        prefix: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<VersionRecord>, MetadataError>;
}

#[async_trait]
impl ObjectRepo for MetadataStore {
    async fn commit_put(
        &self,
        bucket: &BucketRecord,
        key: &str,
        new: NewVersion,
    ) -> Result<(VersionRecord, BlobAdmission), MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;
            let result = commit_version_tx(&mut tx, bucket, key, &new).await?;
            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(result)
        })
        .await
        .inspect(|(record, admission)| {
            debug!(
                bucket = %bucket.name,
                key,
                version_id = %record.version_id,
                deduplicated = !admission.inserted,
                "committed put"
            );
        })
    }

    async fn get_current(
        &self,
        bucket_id: &str,
        key: &str,
    ) -> Result<Option<VersionRecord>, MetadataError> {
        let row = sqlx::query(
            "SELECT v.* FROM objects o
             JOIN object_versions v ON v.version_id = o.current_version_id
             WHERE o.bucket_id = ?1 AND o.key = ?2",
        )
        .bind(bucket_id)
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_version).transpose()
    }

    async fn get_version(
        &self,
        bucket_id: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<VersionRecord>, MetadataError> {
        let row = if version_id == "null" {
            sqlx::query(
                "SELECT * FROM object_versions
                 WHERE bucket_id = ?1 AND key = ?2 AND is_null_version = 1",
            )
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(self.pool())
            .await
        } else {
            sqlx::query(
                "SELECT * FROM object_versions
                 WHERE bucket_id = ?1 AND key = ?2 AND version_id = ?3",
            )
            .bind(bucket_id)
            .bind(key)
            .bind(version_id)
            .fetch_optional(self.pool())
            .await
        }
        .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_version).transpose()
    }

    async fn delete_object(
        &self,
        bucket: &BucketRecord,
        key: &str,
    ) -> Result<DeleteOutcome, MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

            let outcome = match bucket.versioning {
                VersioningState::Disabled => {
                    let row = sqlx::query(
                        "SELECT v.* FROM objects o
                         JOIN object_versions v ON v.version_id = o.current_version_id
                         WHERE o.bucket_id = ?1 AND o.key = ?2",
                    )
                    .bind(&bucket.id)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(MetadataError::from_sqlx)?;

                    match row {
                        None => DeleteOutcome::NoSuchObject,
                        Some(row) => {
                            let version = row_to_version(&row)?;
                            sqlx::query("DELETE FROM object_versions WHERE version_id = ?1")
                                .bind(&version.version_id)
                                .execute(&mut *tx)
                                .await
                                .map_err(MetadataError::from_sqlx)?;
                            if let Some(hash) = &version.content_hash {
                                unref_blob_tx(&mut tx, hash).await?;
                            }
                            sqlx::query("DELETE FROM objects WHERE bucket_id = ?1 AND key = ?2")
                                .bind(&bucket.id)
                                .bind(key)
                                .execute(&mut *tx)
                                .await
                                .map_err(MetadataError::from_sqlx)?;
                            DeleteOutcome::Removed(version)
                        }
                    }
                }
                VersioningState::Enabled | VersioningState::Suspended => {
                    let is_null_version = bucket.versioning == VersioningState::Suspended;
                    if is_null_version {
                        // The marker takes over the null slot.
                        drop_null_version_tx(&mut tx, &bucket.id, key).await?;
                    }

                    let marker = VersionRecord {
                        version_id: Uuid::now_v7().to_string(),
                        bucket_id: bucket.id.clone(),
                        key: key.to_owned(),
                        content_hash: None,
                        size: 0,
                        etag: String::new(),
                        content_type: None,
                        user_metadata: HashMap::new(),
                        sse: SseMode::None,
                        acl: None,
                        is_delete_marker: true,
                        is_null_version,
                        created_at: Utc::now(),
                    };
                    insert_version_tx(&mut tx, &marker).await?;
                    set_current_tx(&mut tx, &bucket.id, key, &marker.version_id).await?;
                    DeleteOutcome::Marker(marker)
                }
            };

            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(outcome)
        })
        .await
    }

    async fn delete_version(
        &self,
        bucket_id: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<VersionRecord>, MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

            let row = sqlx::query(
                "SELECT * FROM object_versions
                 WHERE bucket_id = ?1 AND key = ?2 AND version_id = ?3",
            )
            .bind(bucket_id)
            .bind(key)
            .bind(version_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let version = row_to_version(&row)?;

            sqlx::query("DELETE FROM object_versions WHERE version_id = ?1")
                .bind(&version.version_id)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;

            if let Some(hash) = &version.content_hash {
                unref_blob_tx(&mut tx, hash).await?;
            }

            // Repair the current pointer when the removed version held it.
            let current: Option<String> = sqlx::query_scalar(
                "SELECT current_version_id FROM objects WHERE bucket_id = ?1 AND key = ?2",
            )
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?
            .flatten();

            if current.as_deref() == Some(version_id) {
                let successor: Option<String> = sqlx::query_scalar(
                    "SELECT version_id FROM object_versions
                     WHERE bucket_id = ?1 AND key = ?2
                     ORDER BY created_at DESC, version_id DESC
                     LIMIT 1",
                )
                .bind(bucket_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;

                match successor {
                    Some(next) => set_current_tx(&mut tx, bucket_id, key, &next).await?,
                    None => {
                        sqlx::query("DELETE FROM objects WHERE bucket_id = ?1 AND key = ?2")
                            .bind(bucket_id)
                            .bind(key)
                            .execute(&mut *tx)
                            .await
                            .map_err(MetadataError::from_sqlx)?;
                    }
                }
            }

            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(Some(version))
        })
        .await
    }

    async fn list_current_page(
        &self,
        bucket_id: &str,
        from_key: &str,
        inclusive: bool,
        limit: i64,
    ) -> Result<Vec<VersionRecord>, MetadataError> {
        let sql = if inclusive {
            "SELECT v.* FROM objects o
             JOIN object_versions v ON v.version_id = o.current_version_id
             WHERE o.bucket_id = ?1 AND o.key >= ?2 AND v.is_delete_marker = 0
             ORDER BY o.key
             LIMIT ?3"
        } else {
            "SELECT v.* FROM objects o
             JOIN object_versions v ON v.version_id = o.current_version_id
             WHERE o.bucket_id = ?1 AND o.key > ?2 AND v.is_delete_marker = 0
             ORDER BY o.key
             LIMIT ?3"
        };
        let rows = sqlx::query(sql)
            .bind(bucket_id)
            .bind(from_key)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_version).collect()
    }

    async fn list_keys_with_versions(
        &self,
        bucket_id: &str,
        from_key: &str,
        inclusive: bool,
        limit: i64,
    ) -> Result<Vec<String>, MetadataError> {
        let sql = if inclusive {
            "SELECT DISTINCT key FROM object_versions
             WHERE bucket_id = ?1 AND key >= ?2
             ORDER BY key
             LIMIT ?3"
        } else {
            "SELECT DISTINCT key FROM object_versions
             WHERE bucket_id = ?1 AND key > ?2
             ORDER BY key
             LIMIT ?3"
        };
        let keys = sqlx::query_scalar(sql)
            .bind(bucket_id)
            .bind(from_key)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(keys)
    }

    async fn versions_for_key(
        &self,
        bucket_id: &str,
        key: &str,
    ) -> Result<Vec<VersionRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT * FROM object_versions
             WHERE bucket_id = ?1 AND key = ?2
             ORDER BY created_at DESC, version_id DESC",
        )
        .bind(bucket_id)
        .bind(key)
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_version).collect()
    }

    async fn expired_current_versions(
        &self,
        bucket_id: &str,
        prefix: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<VersionRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT v.* FROM objects o
             JOIN object_versions v ON v.version_id = o.current_version_id
             WHERE o.bucket_id = ?1 AND v.is_delete_marker = 0 AND v.created_at < ?2
               AND (?3 = '' OR substr(o.key, 1, length(?3)) = ?3)
             ORDER BY o.key
             LIMIT ?4",
        )
        .bind(bucket_id)
        .bind(cutoff)
        .bind(prefix)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_version).collect()
    }
}
