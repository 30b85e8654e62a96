//! Multipart session and part repository.
//!
//! Sessions freeze their SSE choice and metadata at initiate. Each part
//! holds one blob reference for the session's lifetime; re-uploading a part
//! number swaps the reference inside one transaction. Complete collapses
//! the session into a single version atomically: the final blob is
//! admitted, every part blob released, and the part and session rows
//! removed inside one transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::debug;

use alexander_core::types::{BucketAcl, SseMode};

use crate::MetadataStore;
use crate::blobs::{BlobAdmission, admit_blob_tx, unref_blob_tx};
use crate::buckets::BucketRecord;
use crate::error::MetadataError;
use crate::objects::{NewVersion, VersionRecord, commit_version_tx};
use crate::retry::with_retries;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of `multipart_sessions`.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Opaque upload id.
    pub upload_id: String,
    /// Owning bucket id.
    pub bucket_id: String,
    /// Destination key.
    pub key: String,
    /// User that initiated the upload.
    pub initiator_user_id: Option<String>,
    /// SSE choice frozen at initiate.
    pub sse: SseMode,
    /// Content type for the final object.
    pub content_type: Option<String>,
    /// User metadata for the final object.
    pub user_metadata: HashMap<String, String>,
    /// Per-object ACL override for the final object.
    pub acl: Option<BucketAcl>,
    /// Initiate time; drives the abandoned-session timeout.
    pub created_at: DateTime<Utc>,
}

/// One row of `multipart_parts`.
#[derive(Debug, Clone)]
pub struct PartRecord {
    /// Owning upload id.
    pub upload_id: String,
    /// Part number in `1..=10000`.
    pub part_number: i64,
    /// Blob the part holds a reference on.
    pub content_hash: String,
    /// Part size in bytes.
    pub size: i64,
    /// Part ETag (unquoted plaintext MD5).
    pub etag: String,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

/// Blob-facing fields of a freshly uploaded part.
#[derive(Debug, Clone)]
pub struct NewPart {
    /// Hex plaintext hash.
    pub content_hash: String,
    /// Size in bytes.
    pub size: i64,
    /// Blob path relative to the data root.
    pub storage_path: String,
    /// Unquoted ETag.
    pub etag: String,
}

fn row_to_session(row: &SqliteRow) -> Result<SessionRecord, MetadataError> {
    let sse: String = row.try_get("sse")?;
    let acl: Option<String> = row.try_get("acl")?;
    let metadata_json: String = row.try_get("user_metadata")?;
    Ok(SessionRecord {
        upload_id: row.try_get("upload_id")?,
        bucket_id: row.try_get("bucket_id")?,
        key: row.try_get("key")?,
        initiator_user_id: row.try_get("initiator_user_id")?,
        sse: sse
            .parse()
            .map_err(|_| MetadataError::Conflict(format!("bad sse value: {sse}")))?,
        content_type: row.try_get("content_type")?,
        user_metadata: serde_json::from_str(&metadata_json)
            .map_err(|e| MetadataError::Conflict(format!("bad user_metadata json: {e}")))?,
        acl: acl
            .map(|a| {
                a.parse()
                    .map_err(|_| MetadataError::Conflict(format!("bad acl value: {a}")))
            })
            .transpose()?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_part(row: &SqliteRow) -> Result<PartRecord, MetadataError> {
    Ok(PartRecord {
        upload_id: row.try_get("upload_id")?,
        part_number: row.try_get("part_number")?,
        content_hash: row.try_get("content_hash")?,
        size: row.try_get("size")?,
        etag: row.try_get("etag")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// MultipartRepo
// ---------------------------------------------------------------------------

/// Repository for multipart sessions and their parts.
#[async_trait]
pub trait MultipartRepo: Send + Sync {
    /// Record a freshly initiated session.
    async fn create_session(&self, session: &SessionRecord) -> Result<(), MetadataError>;

    /// Look up a session.
    async fn get_session(&self, upload_id: &str) -> Result<Option<SessionRecord>, MetadataError>;

    /// Store a part, admitting its blob reference. Re-uploading an existing
    /// part number swaps the old blob ref for the new one atomically.
    async fn put_part(
        &self,
        upload_id: &str,
        part_number: i64,
        new: NewPart,
    ) -> Result<PartRecord, MetadataError>;

    /// Parts of a session, part-number-ordered.
    async fn list_session_parts(
        &self,
        upload_id: &str,
    ) -> Result<Vec<PartRecord>, MetadataError>;

    /// Collapse the session into its final version: admit the assembled
    /// blob, install the version per the bucket's versioning state, release
    /// every part blob, delete part rows and the session row, all in one
    /// transaction.
    async fn complete_session(
        &self,
        bucket: &BucketRecord,
        session: &SessionRecord,
        final_version: NewVersion,
    ) -> Result<(VersionRecord, BlobAdmission), MetadataError>;

    /// Abort a session, releasing every part blob. Returns whether the
    /// session existed.
    async fn abort_session(&self, upload_id: &str) -> Result<bool, MetadataError>;

    /// Sessions initiated before `cutoff`.
    async fn expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, MetadataError>;
}

#[async_trait]
impl MultipartRepo for MetadataStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), MetadataError> {
        let metadata_json = serde_json::to_string(&session.user_metadata)
            .map_err(|e| MetadataError::Conflict(format!("user_metadata encode: {e}")))?;
        sqlx::query(
            "INSERT INTO multipart_sessions
             (upload_id, bucket_id, key, initiator_user_id, sse, content_type, user_metadata, acl, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&session.upload_id)
        .bind(&session.bucket_id)
        .bind(&session.key)
        .bind(&session.initiator_user_id)
        .bind(session.sse.as_str())
        .bind(&session.content_type)
        .bind(metadata_json)
        .bind(session.acl.map(|a| a.as_str()))
        .bind(session.created_at)
        .execute(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        debug!(upload_id = %session.upload_id, key = %session.key, "created multipart session");
        Ok(())
    }

    async fn get_session(&self, upload_id: &str) -> Result<Option<SessionRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM multipart_sessions WHERE upload_id = ?1")
            .bind(upload_id)
            .fetch_optional(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn put_part(
        &self,
        upload_id: &str,
        part_number: i64,
        new: NewPart,
    ) -> Result<PartRecord, MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

            // The session must still be open.
            let session_exists: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM multipart_sessions WHERE upload_id = ?1",
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;
            if session_exists == 0 {
                return Err(MetadataError::NotFound {
                    entity: format!("multipart session {upload_id}"),
                });
            }

            admit_blob_tx(&mut tx, &new.content_hash, new.size, &new.storage_path, false)
                .await?;

            // Replacement releases the old part's blob.
            let old_hash: Option<String> = sqlx::query_scalar(
                "SELECT content_hash FROM multipart_parts
                 WHERE upload_id = ?1 AND part_number = ?2",
            )
            .bind(upload_id)
            .bind(part_number)
            .fetch_optional(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;

            if let Some(old_hash) = old_hash {
                sqlx::query(
                    "DELETE FROM multipart_parts WHERE upload_id = ?1 AND part_number = ?2",
                )
                .bind(upload_id)
                .bind(part_number)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;
                unref_blob_tx(&mut tx, &old_hash).await?;
            }

            let record = PartRecord {
                upload_id: upload_id.to_owned(),
                part_number,
                content_hash: new.content_hash.clone(),
                size: new.size,
                etag: new.etag.clone(),
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO multipart_parts (upload_id, part_number, content_hash, size, etag, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&record.upload_id)
            .bind(record.part_number)
            .bind(&record.content_hash)
            .bind(record.size)
            .bind(&record.etag)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;

            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            Ok(record)
        })
        .await
    }

    async fn list_session_parts(
        &self,
        upload_id: &str,
    ) -> Result<Vec<PartRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT * FROM multipart_parts WHERE upload_id = ?1 ORDER BY part_number",
        )
        .bind(upload_id)
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_part).collect()
    }

    async fn complete_session(
        &self,
        bucket: &BucketRecord,
        session: &SessionRecord,
        final_version: NewVersion,
    ) -> Result<(VersionRecord, BlobAdmission), MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

            let result = commit_version_tx(&mut tx, bucket, &session.key, &final_version).await?;

            let part_hashes: Vec<String> = sqlx::query_scalar(
                "SELECT content_hash FROM multipart_parts WHERE upload_id = ?1",
            )
            .bind(&session.upload_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;
            for hash in &part_hashes {
                unref_blob_tx(&mut tx, hash).await?;
            }

            sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?1")
                .bind(&session.upload_id)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;
            sqlx::query("DELETE FROM multipart_sessions WHERE upload_id = ?1")
                .bind(&session.upload_id)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;

            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            debug!(
                upload_id = %session.upload_id,
                key = %session.key,
                parts = part_hashes.len(),
                "completed multipart session"
            );
            Ok(result)
        })
        .await
    }

    async fn abort_session(&self, upload_id: &str) -> Result<bool, MetadataError> {
        with_retries!({
            let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

            let existed: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM multipart_sessions WHERE upload_id = ?1",
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;
            if existed == 0 {
                return Ok(false);
            }

            let part_hashes: Vec<String> = sqlx::query_scalar(
                "SELECT content_hash FROM multipart_parts WHERE upload_id = ?1",
            )
            .bind(upload_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;
            for hash in &part_hashes {
                unref_blob_tx(&mut tx, hash).await?;
            }

            sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?1")
                .bind(upload_id)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;
            sqlx::query("DELETE FROM multipart_sessions WHERE upload_id = ?1")
                .bind(upload_id)
                .execute(&mut *tx)
                .await
                .map_err(MetadataError::from_sqlx)?;

            tx.commit().await.map_err(MetadataError::from_sqlx)?;
            debug!(upload_id, parts = part_hashes.len(), "aborted multipart session");
            Ok(true)
        })
        .await
    }

    async fn expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT * FROM multipart_sessions WHERE created_at < ?1 ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_session).collect()
    }
}
