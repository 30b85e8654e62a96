//! Object operations: put, get, head, delete, bulk delete, copy.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use alexander_blob::writer::DedupSink;
use alexander_blob::{crypto, BlobError};
use alexander_core::metrics::EngineMetrics;
use alexander_core::types::{BucketAcl, ContentHash, Principal, SseMode};
use alexander_core::{StorageError, StorageResult};
use alexander_metadata::{
    BlobRepo, BucketRecord, DeleteOutcome, NewVersion, ObjectRepo, VersionRecord,
};

use crate::access::{AccessMode, authorize};
use crate::service::ObjectService;
use crate::util::{if_match_holds, if_none_match_holds, parse_range, validate_object_key};
use crate::{BodyStream, util};

/// Blob path relative to the data root, mirroring the store's sharding.
pub(crate) fn blob_rel_path(hash_hex: &str) -> String {
    format!("blobs/{}/{}/{hash_hex}", &hash_hex[0..2], &hash_hex[2..4])
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// PutObject request.
pub struct PutObjectInput {
    /// Destination bucket name.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// The request body.
    pub body: BodyStream,
    /// `Content-Type` header.
    pub content_type: Option<String>,
    /// `x-amz-meta-*` pairs.
    pub user_metadata: HashMap<String, String>,
    /// `x-amz-server-side-encryption` choice.
    pub sse: Option<SseMode>,
    /// `x-amz-acl` canned ACL for the object.
    pub acl: Option<BucketAcl>,
    /// `Content-MD5` header (base64 of the raw digest).
    pub content_md5: Option<String>,
    /// `x-amz-content-sha256` header when it carries a real digest.
    pub content_sha256: Option<String>,
}

impl std::fmt::Debug for PutObjectInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutObjectInput")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .finish()
    }
}

/// PutObject response.
#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    /// Unquoted ETag (hex plaintext MD5).
    pub etag: String,
    /// Version id, present on versioning-enabled buckets.
    pub version_id: Option<String>,
    /// Encryption applied.
    pub sse: SseMode,
}

/// GetObject / HeadObject request.
#[derive(Debug, Clone, Default)]
pub struct GetObjectInput {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Specific version to read; `None` reads the current version.
    pub version_id: Option<String>,
    /// `Range` header value.
    pub range: Option<String>,
    /// `If-Match` header value.
    pub if_match: Option<String>,
    /// `If-None-Match` header value.
    pub if_none_match: Option<String>,
}

/// GetObject response. Head responses carry an empty body.
#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    /// Object bytes (the requested range when `content_range` is set).
    pub body: Bytes,
    /// Unquoted ETag.
    pub etag: String,
    /// Content type.
    pub content_type: Option<String>,
    /// User metadata pairs.
    pub user_metadata: HashMap<String, String>,
    /// Full object size in bytes.
    pub size: u64,
    /// Version id as S3 reports it (`None` outside versioned buckets).
    pub version_id: Option<String>,
    /// Encryption recorded for the version.
    pub sse: SseMode,
    /// `(start, end, total)` when a range was served.
    pub content_range: Option<(u64, u64, u64)>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// DeleteObject response.
#[derive(Debug, Clone)]
pub struct DeleteObjectOutput {
    /// Version id of the delete marker or deleted version.
    pub version_id: Option<String>,
    /// Whether a delete marker was created.
    pub delete_marker: bool,
}

/// One entry of a bulk-delete request.
#[derive(Debug, Clone)]
pub struct ObjectIdentifier {
    /// Key to delete.
    pub key: String,
    /// Specific version to delete.
    pub version_id: Option<String>,
}

/// One entry of a bulk-delete response.
#[derive(Debug, Clone)]
pub struct ObjectDeletion {
    /// The requested key.
    pub key: String,
    /// Per-key outcome; the error side carries the S3 code and message.
    pub result: Result<DeleteObjectOutput, (String, String)>,
}

/// CopyObject request.
#[derive(Debug, Clone)]
pub struct CopyObjectInput {
    /// Source bucket name.
    pub src_bucket: String,
    /// Source key.
    pub src_key: String,
    /// Source version; `None` copies the current version.
    pub src_version_id: Option<String>,
    /// Destination bucket name.
    pub dst_bucket: String,
    /// Destination key.
    pub dst_key: String,
    /// Replacement metadata (`x-amz-metadata-directive: REPLACE`);
    /// `None` copies the source metadata.
    pub user_metadata: Option<HashMap<String, String>>,
    /// Encryption for the destination version; `None` copies the source's.
    pub sse: Option<SseMode>,
    /// Canned ACL for the destination object.
    pub acl: Option<BucketAcl>,
}

/// CopyObject response.
#[derive(Debug, Clone)]
pub struct CopyObjectOutput {
    /// Unquoted ETag of the destination (same content, same ETag).
    pub etag: String,
    /// Destination version id on versioning-enabled buckets.
    pub version_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl ObjectService {
    /// Store an object, streaming the body through the dedup writer.
    pub async fn put_object(
        &self,
        principal: &Principal,
        input: PutObjectInput,
    ) -> StorageResult<PutObjectOutput> {
        validate_object_key(&input.key)?;
        let bucket = self.resolve_bucket(&input.bucket).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;

        let sse = input.sse.unwrap_or_default();
        let staged = self
            .stage_body(input.body, sse, self.config.max_part_size)
            .await?;

        if let Some(content_md5) = &input.content_md5 {
            let expected = util::content_md5_to_hex(content_md5)?;
            staged.verify_md5(&expected).map_err(StorageError::from)?;
        }
        if let Some(sha256) = &input.content_sha256 {
            staged.verify_sha256(sha256).map_err(StorageError::from)?;
        }

        let hash_hex = staged.content_hash.to_hex();
        let etag = staged.md5_hex.clone();
        let size = staged.size;
        let blob_encrypted = self.persist_staged(staged).await?;

        let new_version = NewVersion {
            content_hash: hash_hex.clone(),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            storage_path: blob_rel_path(&hash_hex),
            etag: etag.clone(),
            content_type: input.content_type,
            user_metadata: input.user_metadata,
            sse,
            acl: input.acl,
            blob_encrypted,
        };

        let (record, admission) = self
            .meta
            .commit_put(&bucket, &input.key, new_version)
            .await
            .map_err(StorageError::from)?;

        EngineMetrics::add(&self.metrics.put_bytes, size);
        if !admission.inserted {
            EngineMetrics::incr(&self.metrics.dedup_hits);
        }

        debug!(
            bucket = %bucket.name,
            key = %input.key,
            version_id = %record.version_id,
            size,
            "put_object completed"
        );

        Ok(PutObjectOutput {
            etag,
            version_id: versioned_wire_id(&bucket, &record),
            sse,
        })
    }

    /// Retrieve an object (optionally a byte range of it).
    pub async fn get_object(
        &self,
        principal: &Principal,
        input: GetObjectInput,
    ) -> StorageResult<GetObjectOutput> {
        let bucket = self.resolve_bucket(&input.bucket).await?;
        let version = self
            .resolve_readable_version(&bucket, &input.key, input.version_id.as_deref())
            .await?;
        authorize(principal, &bucket, version.acl, AccessMode::Read)?;
        check_conditionals(&version, input.if_match.as_deref(), input.if_none_match.as_deref())?;

        let plaintext = self.read_version_content(&version).await?;
        EngineMetrics::add(&self.metrics.get_bytes, plaintext.len() as u64);

        let total = plaintext.len() as u64;
        let (body, content_range) = match input.range.as_deref() {
            None => (plaintext, None),
            Some(range) => {
                let (start, end) = parse_range(range, total)?;
                let slice =
                    Bytes::copy_from_slice(&plaintext[start as usize..=(end as usize)]);
                (slice, Some((start, end, total)))
            }
        };

        Ok(GetObjectOutput {
            body,
            etag: version.etag.clone(),
            content_type: version.content_type.clone(),
            user_metadata: version.user_metadata.clone(),
            size: total,
            version_id: versioned_wire_id(&bucket, &version),
            sse: version.sse,
            content_range,
            last_modified: version.created_at,
        })
    }

    /// Metadata-only read.
    pub async fn head_object(
        &self,
        principal: &Principal,
        input: GetObjectInput,
    ) -> StorageResult<GetObjectOutput> {
        let bucket = self.resolve_bucket(&input.bucket).await?;
        let version = self
            .resolve_readable_version(&bucket, &input.key, input.version_id.as_deref())
            .await?;
        authorize(principal, &bucket, version.acl, AccessMode::Read)?;
        check_conditionals(&version, input.if_match.as_deref(), input.if_none_match.as_deref())?;

        Ok(GetObjectOutput {
            body: Bytes::new(),
            etag: version.etag.clone(),
            content_type: version.content_type.clone(),
            user_metadata: version.user_metadata.clone(),
            size: u64::try_from(version.size).unwrap_or_default(),
            version_id: versioned_wire_id(&bucket, &version),
            sse: version.sse,
            content_range: None,
            last_modified: version.created_at,
        })
    }

    /// Delete an object or a specific version of it.
    pub async fn delete_object(
        &self,
        principal: &Principal,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<DeleteObjectOutput> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;

        if let Some(version_id) = version_id {
            // Resolve "null" to the stored null-version row first.
            let Some(version) = self
                .meta
                .get_version(&bucket.id, key, version_id)
                .await
                .map_err(StorageError::from)?
            else {
                // Deleting an absent version is a no-op, like AWS.
                return Ok(DeleteObjectOutput {
                    version_id: Some(version_id.to_owned()),
                    delete_marker: false,
                });
            };

            let removed = self
                .meta
                .delete_version(&bucket.id, key, &version.version_id)
                .await
                .map_err(StorageError::from)?;
            debug!(bucket = %bucket.name, key, version_id, "deleted specific version");
            return Ok(DeleteObjectOutput {
                version_id: Some(version_id.to_owned()),
                delete_marker: removed.is_some_and(|v| v.is_delete_marker),
            });
        }

        let outcome = self
            .meta
            .delete_object(&bucket, key)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %bucket.name, key, "delete_object completed");

        Ok(match outcome {
            DeleteOutcome::NoSuchObject | DeleteOutcome::Removed(_) => DeleteObjectOutput {
                version_id: None,
                delete_marker: false,
            },
            DeleteOutcome::Marker(marker) => DeleteObjectOutput {
                version_id: Some(marker.wire_version_id().to_owned()),
                delete_marker: true,
            },
        })
    }

    /// Bulk delete: per-key DeleteObject semantics, partial failures
    /// reported per entry.
    pub async fn delete_objects(
        &self,
        principal: &Principal,
        bucket_name: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> StorageResult<Vec<ObjectDeletion>> {
        let mut results = Vec::with_capacity(objects.len());
        for object in objects {
            let result = self
                .delete_object(
                    principal,
                    bucket_name,
                    &object.key,
                    object.version_id.as_deref(),
                )
                .await
                .map_err(|e| (e.s3_code().to_owned(), e.to_string()));
            results.push(ObjectDeletion {
                key: object.key,
                result,
            });
        }
        Ok(results)
    }

    /// Server-side copy. The destination version references the source
    /// blob; no bytes move.
    pub async fn copy_object(
        &self,
        principal: &Principal,
        input: CopyObjectInput,
    ) -> StorageResult<CopyObjectOutput> {
        validate_object_key(&input.dst_key)?;

        let src_bucket = self.resolve_bucket(&input.src_bucket).await?;
        let source = self
            .resolve_readable_version(&src_bucket, &input.src_key, input.src_version_id.as_deref())
            .await?;
        authorize(principal, &src_bucket, source.acl, AccessMode::Read)?;

        let dst_bucket = self.resolve_bucket(&input.dst_bucket).await?;
        authorize(principal, &dst_bucket, None, AccessMode::Write)?;

        let content_hash = source
            .content_hash
            .clone()
            .ok_or_else(|| StorageError::NoSuchKey {
                key: input.src_key.clone(),
            })?;
        let blob = self
            .meta
            .get_blob(&content_hash)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::Corrupt {
                content_hash: content_hash.clone(),
                detail: "source version references a missing blob row".to_owned(),
            })?;

        let new_version = NewVersion {
            content_hash,
            size: source.size,
            storage_path: blob.storage_path.clone(),
            etag: source.etag.clone(),
            content_type: source.content_type.clone(),
            user_metadata: input
                .user_metadata
                .unwrap_or_else(|| source.user_metadata.clone()),
            sse: input.sse.unwrap_or(source.sse),
            acl: input.acl,
            blob_encrypted: blob.is_encrypted,
        };

        let (record, _) = self
            .meta
            .commit_put(&dst_bucket, &input.dst_key, new_version)
            .await
            .map_err(StorageError::from)?;

        debug!(
            src = %format_args!("{}/{}", input.src_bucket, input.src_key),
            dst = %format_args!("{}/{}", input.dst_bucket, input.dst_key),
            "copy_object completed"
        );

        Ok(CopyObjectOutput {
            etag: source.etag,
            version_id: versioned_wire_id(&dst_bucket, &record),
        })
    }

    // -----------------------------------------------------------------------
    // Internal plumbing shared with the multipart coordinator
    // -----------------------------------------------------------------------

    /// Stream a body into a staged blob, enforcing the size cap.
    pub(crate) async fn stage_body(
        &self,
        mut body: BodyStream,
        sse: SseMode,
        max_size: u64,
    ) -> StorageResult<alexander_blob::StagedBlob> {
        let mut sink = DedupSink::begin(&self.blobs)
            .await
            .map_err(StorageError::from)?;

        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::Internal(e.into()))?;
            received += chunk.len() as u64;
            if received > max_size {
                return Err(StorageError::EntityTooLarge);
            }
            sink.write_chunk(&chunk).await.map_err(StorageError::from)?;
        }

        let master_key = match sse {
            SseMode::Aes256 => Some(&self.config.master_key),
            SseMode::None => None,
        };
        sink.finish(master_key).await.map_err(StorageError::from)
    }

    /// Land a staged blob in the blob tree, deduplicating against an
    /// existing identical blob. Returns the effective on-disk encryption
    /// state.
    pub(crate) async fn persist_staged(
        &self,
        staged: alexander_blob::StagedBlob,
    ) -> StorageResult<bool> {
        let hash_hex = staged.content_hash.to_hex();

        // Fast dedup path: the metadata row vouches for the file, so the
        // temp bytes are redundant whatever their encryption state.
        if let Some(existing) = self
            .meta
            .get_blob(&hash_hex)
            .await
            .map_err(StorageError::from)?
        {
            if self.blobs.exists(&staged.content_hash).await {
                debug!(hash = %hash_hex, "dedup hit, discarding staged bytes");
                return Ok(existing.is_encrypted);
            }
            // Row without file: re-admit the bytes. The read path would
            // have reported this as corruption.
            warn!(hash = %hash_hex, "blob row had no file, re-admitting");
            if existing.is_encrypted != staged.encrypted {
                self.meta
                    .set_blob_encryption(&hash_hex, staged.encrypted)
                    .await
                    .map_err(StorageError::from)?;
            }
        }

        let encrypted = staged.encrypted;
        staged.admit(&self.blobs).await.map_err(StorageError::from)?;
        Ok(encrypted)
    }

    /// Resolve a readable (non-delete-marker) version of a key.
    pub(crate) async fn resolve_readable_version(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<VersionRecord> {
        let version = match version_id {
            Some(version_id) => self
                .meta
                .get_version(&bucket.id, key, version_id)
                .await
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::NoSuchVersion {
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })?,
            None => self
                .meta
                .get_current(&bucket.id, key)
                .await
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::NoSuchKey {
                    key: key.to_owned(),
                })?,
        };

        if version.is_delete_marker {
            return Err(StorageError::NoSuchKey {
                key: key.to_owned(),
            });
        }
        Ok(version)
    }

    /// Read and verify a version's plaintext.
    pub(crate) async fn read_version_content(
        &self,
        version: &VersionRecord,
    ) -> StorageResult<Bytes> {
        let hash_hex = version
            .content_hash
            .as_deref()
            .ok_or_else(|| StorageError::NoSuchKey {
                key: version.key.clone(),
            })?;
        self.read_blob_plaintext(hash_hex).await
    }

    /// Read a blob's plaintext, consulting its metadata row for the
    /// encryption state and expected length, and verifying the content
    /// hashes back to its key.
    pub(crate) async fn read_blob_plaintext(&self, hash_hex: &str) -> StorageResult<Bytes> {
        let hash = ContentHash::from_hex(hash_hex)?;

        let blob = self
            .meta
            .get_blob(hash_hex)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::Corrupt {
                content_hash: hash_hex.to_owned(),
                detail: "referenced blob row is missing".to_owned(),
            })?;

        let expected_len = if blob.is_encrypted {
            u64::try_from(blob.size).unwrap_or_default() + alexander_blob::store::SSE_OVERHEAD
        } else {
            u64::try_from(blob.size).unwrap_or_default()
        };

        let stored = match self.blobs.read(&hash, Some(expected_len)).await {
            Ok(stored) => stored,
            Err(e @ BlobError::Corrupt { .. }) => return Err(self.report_corrupt(e.into())),
            Err(e) => return Err(e.into()),
        };

        let plaintext = if blob.is_encrypted {
            match crypto::open(&self.config.master_key, &hash, &stored) {
                Ok(plaintext) => plaintext,
                Err(e) => return Err(self.report_corrupt(e.into())),
            }
        } else {
            stored
        };

        // The hash is the identity contract; a mismatch is corruption even
        // when the file length agreed.
        let actual = Sha256::digest(&plaintext);
        if actual.as_slice() != hash.0 {
            return Err(self.report_corrupt(StorageError::Corrupt {
                content_hash: hash_hex.to_owned(),
                detail: "stored content does not hash to its key".to_owned(),
            }));
        }

        Ok(Bytes::from(plaintext))
    }

    /// Log and count a corruption before surfacing it.
    fn report_corrupt(&self, err: StorageError) -> StorageError {
        error!(error = %err, "corrupt blob detected");
        EngineMetrics::incr(&self.metrics.corrupt_reads);
        err
    }
}

/// The version id reported on the wire: only versioned buckets expose ids.
fn versioned_wire_id(bucket: &BucketRecord, version: &VersionRecord) -> Option<String> {
    match bucket.versioning {
        alexander_core::types::VersioningState::Disabled => None,
        _ => Some(version.wire_version_id().to_owned()),
    }
}

/// Evaluate `If-Match` / `If-None-Match` against a version's ETag.
fn check_conditionals(
    version: &VersionRecord,
    if_match: Option<&str>,
    if_none_match: Option<&str>,
) -> StorageResult<()> {
    if let Some(condition) = if_match {
        if !if_match_holds(&version.etag, condition) {
            return Err(StorageError::PreconditionFailed);
        }
    }
    if let Some(condition) = if_none_match {
        if !if_none_match_holds(&version.etag, condition) {
            return Err(StorageError::PreconditionFailed);
        }
    }
    Ok(())
}
