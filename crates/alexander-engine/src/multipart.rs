//! Multipart upload coordination.
//!
//! The session state machine lives in the metadata store; this module
//! enforces the wire rules (part numbering, minimum sizes, ETag matching),
//! streams part bodies through the dedup writer, and assembles the final
//! object on complete. The composite ETag is
//! `hex(md5(concat(part-md5s)))-<count>`, matching S3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use alexander_core::metrics::EngineMetrics;
use alexander_core::types::{BucketAcl, Principal, SseMode};
use alexander_core::{StorageError, StorageResult};
use alexander_metadata::{MultipartRepo, NewPart, NewVersion, SessionRecord};

use crate::access::{AccessMode, authorize};
use crate::object::blob_rel_path;
use crate::service::ObjectService;
use crate::util::{composite_etag, generate_upload_id, normalize_etag, validate_object_key};
use crate::BodyStream;

/// Highest part number S3 accepts.
const MAX_PART_NUMBER: i64 = 10_000;

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// InitiateMultipartUpload request.
#[derive(Debug, Clone, Default)]
pub struct InitiateMultipartInput {
    /// Destination bucket name.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Content type for the final object.
    pub content_type: Option<String>,
    /// User metadata for the final object.
    pub user_metadata: HashMap<String, String>,
    /// SSE choice, frozen for the session.
    pub sse: Option<SseMode>,
    /// Canned ACL for the final object.
    pub acl: Option<BucketAcl>,
}

/// One part reference in a CompleteMultipartUpload request.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    /// Part number as uploaded.
    pub part_number: i64,
    /// The ETag returned by UploadPart.
    pub etag: String,
}

/// CompleteMultipartUpload response.
#[derive(Debug, Clone)]
pub struct CompleteMultipartOutput {
    /// Composite ETag, `<hex>-<count>`.
    pub etag: String,
    /// Version id on versioning-enabled buckets.
    pub version_id: Option<String>,
    /// Final object size.
    pub size: u64,
}

/// One part in a ListParts response.
#[derive(Debug, Clone)]
pub struct PartSummary {
    /// Part number.
    pub part_number: i64,
    /// Unquoted part ETag.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
    /// Upload time.
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl ObjectService {
    /// Open a multipart session.
    pub async fn initiate_multipart(
        &self,
        principal: &Principal,
        input: InitiateMultipartInput,
    ) -> StorageResult<String> {
        validate_object_key(&input.key)?;
        let bucket = self.resolve_bucket(&input.bucket).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;

        let session = SessionRecord {
            upload_id: generate_upload_id(),
            bucket_id: bucket.id.clone(),
            key: input.key.clone(),
            initiator_user_id: principal.user_id().map(ToOwned::to_owned),
            sse: input.sse.unwrap_or_default(),
            content_type: input.content_type,
            user_metadata: input.user_metadata,
            acl: input.acl,
            created_at: Utc::now(),
        };
        self.meta
            .create_session(&session)
            .await
            .map_err(StorageError::from)?;

        debug!(
            bucket = %bucket.name,
            key = %input.key,
            upload_id = %session.upload_id,
            "initiate_multipart completed"
        );
        Ok(session.upload_id)
    }

    /// Upload one part. Returns the part's ETag (hex plaintext MD5).
    pub async fn upload_part(
        &self,
        principal: &Principal,
        bucket_name: &str,
        upload_id: &str,
        part_number: i64,
        body: BodyStream,
    ) -> StorageResult<String> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidArgument {
                message: format!("part number must be between 1 and {MAX_PART_NUMBER}"),
            });
        }

        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;
        let session = self.resolve_session(&bucket.id, upload_id).await?;

        // Parts are staged as plaintext blobs; encryption applies to the
        // assembled object, whose data key depends on the full content hash.
        let staged = self
            .stage_body(body, SseMode::None, self.config.max_part_size)
            .await?;

        let hash_hex = staged.content_hash.to_hex();
        let etag = staged.md5_hex.clone();
        let size = staged.size;
        self.persist_staged(staged).await?;

        self.meta
            .put_part(
                &session.upload_id,
                part_number,
                NewPart {
                    content_hash: hash_hex.clone(),
                    size: i64::try_from(size).unwrap_or(i64::MAX),
                    storage_path: blob_rel_path(&hash_hex),
                    etag: etag.clone(),
                },
            )
            .await
            .map_err(StorageError::from)?;

        EngineMetrics::add(&self.metrics.put_bytes, size);
        debug!(
            bucket = %bucket.name,
            upload_id,
            part_number,
            size,
            "upload_part completed"
        );
        Ok(etag)
    }

    /// Assemble the final object from the named parts.
    pub async fn complete_multipart(
        &self,
        principal: &Principal,
        bucket_name: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<CompleteMultipartOutput> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;
        let session = self.resolve_session(&bucket.id, upload_id).await?;

        if parts.is_empty() {
            return Err(StorageError::InvalidArgument {
                message: "complete requires at least one part".to_owned(),
            });
        }

        let stored_parts = self
            .meta
            .list_session_parts(upload_id)
            .await
            .map_err(StorageError::from)?;
        let by_number: HashMap<i64, _> = stored_parts
            .iter()
            .map(|p| (p.part_number, p))
            .collect();

        // Validate ordering, existence, ETag match, and minimum sizes.
        let mut last_number = 0i64;
        let mut selected = Vec::with_capacity(parts.len());
        for requested in &parts {
            if requested.part_number <= last_number {
                return Err(StorageError::InvalidPartOrder);
            }
            last_number = requested.part_number;

            let stored = by_number
                .get(&requested.part_number)
                .copied()
                .ok_or(StorageError::InvalidPart)?;
            if normalize_etag(&stored.etag) != normalize_etag(&requested.etag) {
                return Err(StorageError::InvalidPart);
            }
            selected.push(stored);
        }
        for (idx, part) in selected.iter().enumerate() {
            let is_last = idx == selected.len() - 1;
            if !is_last && part.size < i64::try_from(self.config.min_part_size).unwrap_or(i64::MAX)
            {
                return Err(StorageError::EntityTooSmall);
            }
        }

        // Assemble the plaintext by streaming each part blob through a
        // fresh dedup sink, sealing per the session's frozen SSE choice.
        let mut sink = alexander_blob::DedupSink::begin(&self.blobs)
            .await
            .map_err(StorageError::from)?;
        let mut part_md5s = Vec::with_capacity(selected.len());
        for part in &selected {
            // Route through the blob row so a part that deduplicated
            // against an encrypted blob decrypts correctly.
            let data = self.read_blob_plaintext(&part.content_hash).await?;
            sink.write_chunk(&data).await.map_err(StorageError::from)?;
            part_md5s.push(part.etag.clone());
        }
        let master_key = match session.sse {
            SseMode::Aes256 => Some(&self.config.master_key),
            SseMode::None => None,
        };
        let staged = sink.finish(master_key).await.map_err(StorageError::from)?;

        let etag = composite_etag(&part_md5s)?;
        let hash_hex = staged.content_hash.to_hex();
        let size = staged.size;
        let blob_encrypted = self.persist_staged(staged).await?;

        let final_version = NewVersion {
            content_hash: hash_hex.clone(),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            storage_path: blob_rel_path(&hash_hex),
            etag: etag.clone(),
            content_type: session.content_type.clone(),
            user_metadata: session.user_metadata.clone(),
            sse: session.sse,
            acl: session.acl,
            blob_encrypted,
        };
        let (record, _) = self
            .meta
            .complete_session(&bucket, &session, final_version)
            .await
            .map_err(StorageError::from)?;

        debug!(
            bucket = %bucket.name,
            key = %session.key,
            upload_id,
            parts = selected.len(),
            size,
            "complete_multipart completed"
        );

        Ok(CompleteMultipartOutput {
            etag,
            version_id: match bucket.versioning {
                alexander_core::types::VersioningState::Disabled => None,
                _ => Some(record.wire_version_id().to_owned()),
            },
            size,
        })
    }

    /// Abort a session, releasing every part reference.
    pub async fn abort_multipart(
        &self,
        principal: &Principal,
        bucket_name: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Write)?;
        // Resolve first so an unknown id fails with NoSuchUpload.
        self.resolve_session(&bucket.id, upload_id).await?;

        self.meta
            .abort_session(upload_id)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %bucket.name, upload_id, "abort_multipart completed");
        Ok(())
    }

    /// Parts uploaded so far, part-number-ordered.
    pub async fn list_parts(
        &self,
        principal: &Principal,
        bucket_name: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<PartSummary>> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;
        self.resolve_session(&bucket.id, upload_id).await?;

        let parts = self
            .meta
            .list_session_parts(upload_id)
            .await
            .map_err(StorageError::from)?;
        Ok(parts
            .into_iter()
            .map(|p| PartSummary {
                part_number: p.part_number,
                etag: p.etag,
                size: u64::try_from(p.size).unwrap_or_default(),
                last_modified: p.created_at,
            })
            .collect())
    }

    /// Resolve a session and pin it to the bucket it was opened in.
    async fn resolve_session(
        &self,
        bucket_id: &str,
        upload_id: &str,
    ) -> StorageResult<SessionRecord> {
        let session = self
            .meta
            .get_session(upload_id)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            })?;
        if session.bucket_id != bucket_id {
            return Err(StorageError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            });
        }
        Ok(session)
    }
}
