//! Listing operations: ListObjects (V1), ListObjectsV2, ListObjectVersions.
//!
//! Keys compare lexicographically byte-wise. The scan walks key-ordered
//! pages out of the metadata store, applies the prefix filter, collapses
//! common prefixes when a delimiter is set, and stops once a page's worth
//! of entries (objects plus common prefixes) is assembled. Collapse happens
//! after filtering and before pagination, so a page boundary can land on a
//! common prefix; the continuation token records whichever entry was
//! emitted last.

use chrono::{DateTime, Utc};
use tracing::debug;

use alexander_core::types::Principal;
use alexander_core::{StorageError, StorageResult};
use alexander_metadata::{BucketRecord, ObjectRepo, VersionRecord};

use crate::access::{AccessMode, authorize};
use crate::service::ObjectService;
use crate::util::{decode_continuation_token, encode_continuation_token};

/// Keys fetched from the metadata store per page.
const SCAN_PAGE: i64 = 1000;

/// `max-keys` ceiling, per the S3 contract.
const MAX_KEYS_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One object in a listing.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    /// Object key.
    pub key: String,
    /// Unquoted ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// ListObjects (V1) response.
#[derive(Debug, Clone)]
pub struct ListObjectsOutput {
    /// Matching objects, key-ordered.
    pub objects: Vec<ObjectSummary>,
    /// Collapsed common prefixes, discovery-ordered.
    pub common_prefixes: Vec<String>,
    /// Whether more entries follow.
    pub is_truncated: bool,
    /// Marker to resume from, set when truncated.
    pub next_marker: Option<String>,
}

/// ListObjectsV2 response.
#[derive(Debug, Clone)]
pub struct ListObjectsV2Output {
    /// Matching objects, key-ordered.
    pub objects: Vec<ObjectSummary>,
    /// Collapsed common prefixes, discovery-ordered.
    pub common_prefixes: Vec<String>,
    /// Whether more entries follow.
    pub is_truncated: bool,
    /// Opaque token to resume from, set when truncated.
    pub next_continuation_token: Option<String>,
    /// Objects plus common prefixes in this page.
    pub key_count: usize,
}

/// One entry of a version listing.
#[derive(Debug, Clone)]
pub struct VersionSummary {
    /// Object key.
    pub key: String,
    /// Wire version id (`"null"` for null versions).
    pub version_id: String,
    /// Whether this is the key's current version.
    pub is_latest: bool,
    /// Whether the entry is a delete marker.
    pub is_delete_marker: bool,
    /// Unquoted ETag (empty for delete markers).
    pub etag: String,
    /// Size in bytes (zero for delete markers).
    pub size: u64,
    /// Creation time of the version.
    pub last_modified: DateTime<Utc>,
}

/// ListObjectVersions response.
#[derive(Debug, Clone)]
pub struct ListObjectVersionsOutput {
    /// Version and delete-marker entries, key-ordered, newest first within
    /// a key.
    pub versions: Vec<VersionSummary>,
    /// Collapsed common prefixes.
    pub common_prefixes: Vec<String>,
    /// Whether more entries follow.
    pub is_truncated: bool,
    /// Key to resume from, set when truncated.
    pub next_key_marker: Option<String>,
    /// Version to resume from, set when truncated.
    pub next_version_id_marker: Option<String>,
}

// ---------------------------------------------------------------------------
// Internal scan machinery
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ListEntry {
    Object(VersionRecord),
    CommonPrefix(String),
}

impl ListEntry {
    fn resume_point(&self) -> &str {
        match self {
            Self::Object(v) => &v.key,
            Self::CommonPrefix(p) => p,
        }
    }
}

#[derive(Debug, Default)]
struct ScanOutcome {
    entries: Vec<ListEntry>,
    is_truncated: bool,
    next_marker: Option<String>,
}

/// Clamp a caller-supplied `max-keys` into `1..=1000`.
fn clamp_max_keys(max_keys: Option<i32>) -> usize {
    match max_keys {
        None => MAX_KEYS_LIMIT,
        Some(n) if n < 1 => 1,
        Some(n) => (n as usize).min(MAX_KEYS_LIMIT),
    }
}

impl ObjectService {
    /// Walk current versions and assemble one listing page.
    async fn scan_current(
        &self,
        bucket: &BucketRecord,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> StorageResult<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut seen_prefixes = std::collections::HashSet::new();

        // A marker that is itself an emitted common prefix means every key
        // underneath it is already represented; skip the whole group.
        let skip_group = (!delimiter.is_empty() && !marker.is_empty() && marker.ends_with(delimiter))
            .then(|| marker.to_owned());

        // Start at the prefix floor when the marker sits before it.
        let (mut cursor, mut inclusive) = if marker < prefix {
            (prefix.to_owned(), true)
        } else {
            (marker.to_owned(), false)
        };

        'scan: loop {
            let page = self
                .meta
                .list_current_page(&bucket.id, &cursor, inclusive, SCAN_PAGE)
                .await
                .map_err(StorageError::from)?;
            if page.is_empty() {
                break;
            }
            inclusive = false;

            for version in page {
                cursor = version.key.clone();

                if !version.key.starts_with(prefix) {
                    if version.key.as_str() > prefix {
                        // Keys are sorted; nothing later can match.
                        break 'scan;
                    }
                    continue;
                }
                if let Some(group) = &skip_group {
                    if version.key.starts_with(group) {
                        continue;
                    }
                }

                let entry = if delimiter.is_empty() {
                    ListEntry::Object(version)
                } else {
                    let rest = &version.key[prefix.len()..];
                    match rest.find(delimiter) {
                        None => ListEntry::Object(version),
                        Some(pos) => {
                            let collapsed =
                                format!("{prefix}{}{delimiter}", &rest[..pos]);
                            if !seen_prefixes.insert(collapsed.clone()) {
                                continue;
                            }
                            ListEntry::CommonPrefix(collapsed)
                        }
                    }
                };

                if outcome.entries.len() == max_keys {
                    outcome.is_truncated = true;
                    outcome.next_marker = outcome
                        .entries
                        .last()
                        .map(|e| e.resume_point().to_owned());
                    break 'scan;
                }
                outcome.entries.push(entry);
            }
        }

        Ok(outcome)
    }

    /// ListObjects (V1).
    pub async fn list_objects(
        &self,
        principal: &Principal,
        bucket_name: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListObjectsOutput> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;

        let outcome = self
            .scan_current(
                &bucket,
                prefix.unwrap_or(""),
                delimiter.unwrap_or(""),
                marker.unwrap_or(""),
                clamp_max_keys(max_keys),
            )
            .await?;

        let (objects, common_prefixes) = split_entries(outcome.entries);
        debug!(
            bucket = %bucket_name,
            count = objects.len(),
            is_truncated = outcome.is_truncated,
            "list_objects completed"
        );
        Ok(ListObjectsOutput {
            objects,
            common_prefixes,
            is_truncated: outcome.is_truncated,
            next_marker: outcome.next_marker,
        })
    }

    /// ListObjectsV2.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_objects_v2(
        &self,
        principal: &Principal,
        bucket_name: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        start_after: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListObjectsV2Output> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;

        // The continuation token wins over start-after, like AWS.
        let marker = match continuation_token {
            Some(token) => decode_continuation_token(token)?,
            None => start_after.unwrap_or("").to_owned(),
        };

        let outcome = self
            .scan_current(
                &bucket,
                prefix.unwrap_or(""),
                delimiter.unwrap_or(""),
                &marker,
                clamp_max_keys(max_keys),
            )
            .await?;

        let next_continuation_token = outcome
            .next_marker
            .as_deref()
            .map(encode_continuation_token);
        let key_count = outcome.entries.len();
        let (objects, common_prefixes) = split_entries(outcome.entries);

        debug!(
            bucket = %bucket_name,
            key_count,
            is_truncated = outcome.is_truncated,
            "list_objects_v2 completed"
        );
        Ok(ListObjectsV2Output {
            objects,
            common_prefixes,
            is_truncated: outcome.is_truncated,
            next_continuation_token,
            key_count,
        })
    }

    /// ListObjectVersions.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_object_versions(
        &self,
        principal: &Principal,
        bucket_name: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        key_marker: Option<&str>,
        version_id_marker: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListObjectVersionsOutput> {
        let bucket = self.resolve_bucket(bucket_name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;

        let prefix = prefix.unwrap_or("");
        let delimiter = delimiter.unwrap_or("");
        let key_marker = key_marker.unwrap_or("");
        let version_id_marker = version_id_marker.unwrap_or("");
        let max_keys = clamp_max_keys(max_keys);

        let mut output = ListObjectVersionsOutput {
            versions: Vec::new(),
            common_prefixes: Vec::new(),
            is_truncated: false,
            next_key_marker: None,
            next_version_id_marker: None,
        };
        let mut seen_prefixes = std::collections::HashSet::new();
        let mut entry_count = 0usize;
        // Resume point of the most recently emitted entry: a key plus
        // version id for version entries, a bare prefix for collapsed ones.
        let mut last_emitted: Option<(String, Option<String>)> = None;

        // With a version marker the marker key itself still has versions to
        // emit; without one the listing resumes after the key.
        let resume_within_key = !version_id_marker.is_empty();
        let (mut cursor, mut inclusive) = if key_marker.is_empty() || key_marker < prefix {
            (prefix.to_owned(), true)
        } else {
            (key_marker.to_owned(), resume_within_key)
        };

        // A key marker that is itself an emitted common prefix covers every
        // key underneath it.
        let skip_group = (!delimiter.is_empty()
            && !key_marker.is_empty()
            && key_marker.ends_with(delimiter))
        .then(|| key_marker.to_owned());

        'scan: loop {
            let keys = self
                .meta
                .list_keys_with_versions(&bucket.id, &cursor, inclusive, SCAN_PAGE)
                .await
                .map_err(StorageError::from)?;
            if keys.is_empty() {
                break;
            }
            inclusive = false;

            for key in keys {
                cursor = key.clone();

                if !key.starts_with(prefix) {
                    if key.as_str() > prefix {
                        break 'scan;
                    }
                    continue;
                }
                if let Some(group) = &skip_group {
                    if key.starts_with(group) {
                        continue;
                    }
                }

                if !delimiter.is_empty() {
                    let rest = &key[prefix.len()..];
                    if let Some(pos) = rest.find(delimiter) {
                        let collapsed = format!("{prefix}{}{delimiter}", &rest[..pos]);
                        if seen_prefixes.insert(collapsed.clone()) {
                            if entry_count == max_keys {
                                output.is_truncated = true;
                                break 'scan;
                            }
                            entry_count += 1;
                            last_emitted = Some((collapsed.clone(), None));
                            output.common_prefixes.push(collapsed);
                        }
                        continue;
                    }
                }

                let versions = self
                    .meta
                    .versions_for_key(&bucket.id, &key)
                    .await
                    .map_err(StorageError::from)?;

                let mut skipping = key == key_marker && resume_within_key;
                for (idx, version) in versions.iter().enumerate() {
                    if skipping {
                        if version.version_id == version_id_marker
                            || version.wire_version_id() == version_id_marker
                        {
                            skipping = false;
                        }
                        continue;
                    }

                    if entry_count == max_keys {
                        output.is_truncated = true;
                        break 'scan;
                    }

                    entry_count += 1;
                    last_emitted = Some((
                        version.key.clone(),
                        Some(version.wire_version_id().to_owned()),
                    ));
                    output.versions.push(VersionSummary {
                        key: version.key.clone(),
                        version_id: version.wire_version_id().to_owned(),
                        is_latest: idx == 0,
                        is_delete_marker: version.is_delete_marker,
                        etag: version.etag.clone(),
                        size: u64::try_from(version.size).unwrap_or_default(),
                        last_modified: version.created_at,
                    });
                }
            }
        }

        if output.is_truncated {
            if let Some((key, version_id)) = last_emitted {
                output.next_key_marker = Some(key);
                output.next_version_id_marker = version_id;
            }
        }

        debug!(
            bucket = %bucket_name,
            versions = output.versions.len(),
            is_truncated = output.is_truncated,
            "list_object_versions completed"
        );
        Ok(output)
    }
}

fn split_entries(entries: Vec<ListEntry>) -> (Vec<ObjectSummary>, Vec<String>) {
    let mut objects = Vec::new();
    let mut prefixes = Vec::new();
    for entry in entries {
        match entry {
            ListEntry::Object(v) => objects.push(ObjectSummary {
                key: v.key,
                etag: v.etag,
                size: u64::try_from(v.size).unwrap_or_default(),
                last_modified: v.created_at,
            }),
            ListEntry::CommonPrefix(p) => prefixes.push(p),
        }
    }
    (objects, prefixes)
}
