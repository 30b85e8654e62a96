//! End-to-end engine scenarios: the object service, multipart coordinator,
//! and sweeper driven together against a temp blob root and an in-memory
//! metadata store.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sha2::Digest;

use alexander_core::types::{BucketAcl, Principal, RuleStatus, SseMode, VersioningState};
use alexander_core::{AlexanderConfig, StorageError};
use alexander_engine::bucket::LifecycleRule;
use alexander_engine::multipart::{CompletedPart, InitiateMultipartInput};
use alexander_engine::object::{GetObjectInput, PutObjectInput};
use alexander_engine::{body_from_bytes, ObjectService, Sweeper};
use alexander_metadata::{BlobRepo, MultipartRepo, UserRepo};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    service: ObjectService,
    owner: Principal,
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

async fn harness_with(tune: impl FnOnce(&mut AlexanderConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AlexanderConfig {
        data_root: dir.path().to_path_buf(),
        metadata_dsn: "sqlite::memory:".to_owned(),
        master_key: [0x51; 32],
        ..AlexanderConfig::default()
    };
    tune(&mut config);

    let service = ObjectService::open(config).await.expect("open service");
    let user = service
        .metadata()
        .create_user("owner", "owner@example.com")
        .await
        .expect("create user");
    let owner = Principal::User {
        user_id: user.id,
        access_key_id: "AKIDOWNER".to_owned(),
    };
    Harness {
        _dir: dir,
        service,
        owner,
    }
}

fn put_input(bucket: &str, key: &str, body: &[u8]) -> PutObjectInput {
    PutObjectInput {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        body: body_from_bytes(body.to_vec()),
        content_type: Some("text/plain".to_owned()),
        user_metadata: std::collections::HashMap::new(),
        sse: None,
        acl: None,
        content_md5: None,
        content_sha256: None,
    }
}

fn get_input(bucket: &str, key: &str) -> GetObjectInput {
    GetObjectInput {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        ..GetObjectInput::default()
    }
}

/// Count regular files under `<root>/blobs`.
fn count_blob_files(root: &Path) -> usize {
    fn walk(dir: &Path, count: &mut usize) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, count);
            } else {
                *count += 1;
            }
        }
    }
    let mut count = 0;
    walk(&root.join("blobs"), &mut count);
    count
}

/// Backdate every version of a key so lifecycle rules see it as old.
async fn backdate_versions(service: &ObjectService, key: &str, days: i64) {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
    sqlx::query("UPDATE object_versions SET created_at = ?1 WHERE key = ?2")
        .bind(cutoff)
        .bind(key)
        .execute(service.metadata().pool())
        .await
        .expect("backdate versions");
}

// ---------------------------------------------------------------------------
// S1: basic put/get roundtrip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_roundtrip_object_with_md5_etag() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "b1", None, None, false)
        .await
        .expect("create bucket");

    let put = h
        .service
        .put_object(&h.owner, put_input("b1", "a.txt", b"hello"))
        .await
        .expect("put");
    assert_eq!(put.etag, "5d41402abc4b2a76b9719d911017c592");
    assert!(put.version_id.is_none(), "unversioned bucket has no version id");

    let got = h
        .service
        .get_object(&h.owner, get_input("b1", "a.txt"))
        .await
        .expect("get");
    assert_eq!(got.body.as_ref(), b"hello");
    assert_eq!(got.etag, "5d41402abc4b2a76b9719d911017c592");
    assert_eq!(got.size, 5);

    let head = h
        .service
        .head_object(&h.owner, get_input("b1", "a.txt"))
        .await
        .expect("head");
    assert_eq!(head.etag, put.etag);
    assert!(head.body.is_empty());
}

// ---------------------------------------------------------------------------
// S2: versioning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_append_versions_and_list_newest_first() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "vb", None, None, false)
        .await
        .expect("create bucket");
    h.service
        .put_bucket_versioning(&h.owner, "vb", VersioningState::Enabled)
        .await
        .expect("enable versioning");

    let v1 = h
        .service
        .put_object(&h.owner, put_input("vb", "k", b"v1"))
        .await
        .expect("put v1");
    let v2 = h
        .service
        .put_object(&h.owner, put_input("vb", "k", b"v2"))
        .await
        .expect("put v2");
    assert_ne!(v1.version_id, v2.version_id);

    let got = h
        .service
        .get_object(&h.owner, get_input("vb", "k"))
        .await
        .expect("get");
    assert_eq!(got.body.as_ref(), b"v2");

    let listing = h
        .service
        .list_object_versions(&h.owner, "vb", None, None, None, None, None)
        .await
        .expect("list versions");
    assert_eq!(listing.versions.len(), 2);
    assert!(listing.versions[0].is_latest);
    assert_eq!(
        listing.versions[0].version_id,
        v2.version_id.clone().expect("v2 id")
    );
    assert!(!listing.versions[1].is_latest);

    // A specific-version read still sees the old content.
    let old = h
        .service
        .get_object(
            &h.owner,
            GetObjectInput {
                version_id: v1.version_id.clone(),
                ..get_input("vb", "k")
            },
        )
        .await
        .expect("get v1");
    assert_eq!(old.body.as_ref(), b"v1");
}

#[tokio::test]
async fn test_should_hide_key_behind_delete_marker_and_keep_blobs() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "vb", None, None, false)
        .await
        .expect("create bucket");
    h.service
        .put_bucket_versioning(&h.owner, "vb", VersioningState::Enabled)
        .await
        .expect("enable versioning");

    h.service
        .put_object(&h.owner, put_input("vb", "k", b"content"))
        .await
        .expect("put");
    let deleted = h
        .service
        .delete_object(&h.owner, "vb", "k", None)
        .await
        .expect("delete");
    assert!(deleted.delete_marker);

    let result = h.service.get_object(&h.owner, get_input("vb", "k")).await;
    assert!(matches!(result, Err(StorageError::NoSuchKey { .. })));

    // The content version's blob keeps its reference.
    let hash = hex::encode(sha2::Sha256::digest(b"content"));
    let blob = h
        .service
        .metadata()
        .get_blob(&hash)
        .await
        .expect("get blob")
        .expect("blob row");
    assert_eq!(blob.ref_count, 1);
}

// ---------------------------------------------------------------------------
// S3: multipart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_assemble_multipart_object_with_composite_etag() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "mp", None, None, false)
        .await
        .expect("create bucket");

    let upload_id = h
        .service
        .initiate_multipart(
            &h.owner,
            InitiateMultipartInput {
                bucket: "mp".to_owned(),
                key: "big".to_owned(),
                ..InitiateMultipartInput::default()
            },
        )
        .await
        .expect("initiate");

    let part1 = vec![0x41u8; 5 * 1024 * 1024];
    let etag1 = h
        .service
        .upload_part(&h.owner, "mp", &upload_id, 1, body_from_bytes(part1.clone()))
        .await
        .expect("part 1");
    let etag2 = h
        .service
        .upload_part(&h.owner, "mp", &upload_id, 2, body_from_bytes(b"tail".to_vec()))
        .await
        .expect("part 2");

    let done = h
        .service
        .complete_multipart(
            &h.owner,
            "mp",
            &upload_id,
            vec![
                CompletedPart {
                    part_number: 1,
                    etag: etag1,
                },
                CompletedPart {
                    part_number: 2,
                    etag: etag2,
                },
            ],
        )
        .await
        .expect("complete");

    assert_eq!(done.size, 5 * 1024 * 1024 + 4);
    assert!(done.etag.ends_with("-2"), "composite etag: {}", done.etag);

    let got = h
        .service
        .get_object(&h.owner, get_input("mp", "big"))
        .await
        .expect("get assembled");
    assert_eq!(got.size, 5 * 1024 * 1024 + 4);
    assert_eq!(&got.body[..4], b"AAAA");
    assert_eq!(&got.body[got.body.len() - 4..], b"tail");

    // The session is gone.
    assert!(matches!(
        h.service.list_parts(&h.owner, "mp", &upload_id).await,
        Err(StorageError::NoSuchUpload { .. })
    ));
}

#[tokio::test]
async fn test_should_enforce_part_rules_on_complete() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "mp", None, None, false)
        .await
        .expect("create bucket");
    let upload_id = h
        .service
        .initiate_multipart(
            &h.owner,
            InitiateMultipartInput {
                bucket: "mp".to_owned(),
                key: "obj".to_owned(),
                ..InitiateMultipartInput::default()
            },
        )
        .await
        .expect("initiate");

    let etag1 = h
        .service
        .upload_part(&h.owner, "mp", &upload_id, 1, body_from_bytes(b"tiny".to_vec()))
        .await
        .expect("part 1");
    let etag2 = h
        .service
        .upload_part(&h.owner, "mp", &upload_id, 2, body_from_bytes(b"tail".to_vec()))
        .await
        .expect("part 2");

    // Out of order.
    let result = h
        .service
        .complete_multipart(
            &h.owner,
            "mp",
            &upload_id,
            vec![
                CompletedPart {
                    part_number: 2,
                    etag: etag2.clone(),
                },
                CompletedPart {
                    part_number: 1,
                    etag: etag1.clone(),
                },
            ],
        )
        .await;
    assert!(matches!(result, Err(StorageError::InvalidPartOrder)));

    // Wrong etag.
    let result = h
        .service
        .complete_multipart(
            &h.owner,
            "mp",
            &upload_id,
            vec![CompletedPart {
                part_number: 1,
                etag: "0".repeat(32),
            }],
        )
        .await;
    assert!(matches!(result, Err(StorageError::InvalidPart)));

    // A non-final part below the 5 MiB minimum.
    let result = h
        .service
        .complete_multipart(
            &h.owner,
            "mp",
            &upload_id,
            vec![
                CompletedPart {
                    part_number: 1,
                    etag: etag1,
                },
                CompletedPart {
                    part_number: 2,
                    etag: etag2,
                },
            ],
        )
        .await;
    assert!(matches!(result, Err(StorageError::EntityTooSmall)));
}

#[tokio::test]
async fn test_should_release_part_refs_on_abort() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "mp", None, None, false)
        .await
        .expect("create bucket");
    let upload_id = h
        .service
        .initiate_multipart(
            &h.owner,
            InitiateMultipartInput {
                bucket: "mp".to_owned(),
                key: "obj".to_owned(),
                ..InitiateMultipartInput::default()
            },
        )
        .await
        .expect("initiate");

    h.service
        .upload_part(&h.owner, "mp", &upload_id, 1, body_from_bytes(b"part-one".to_vec()))
        .await
        .expect("part 1");

    h.service
        .abort_multipart(&h.owner, "mp", &upload_id)
        .await
        .expect("abort");

    let hash = hex::encode(sha2::Sha256::digest(b"part-one"));
    let blob = h
        .service
        .metadata()
        .get_blob(&hash)
        .await
        .expect("get blob")
        .expect("blob row survives until GC");
    assert_eq!(blob.ref_count, 0);

    assert!(matches!(
        h.service.abort_multipart(&h.owner, "mp", &upload_id).await,
        Err(StorageError::NoSuchUpload { .. })
    ));
}

// ---------------------------------------------------------------------------
// S4: dedup across keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_store_identical_payloads_once_with_two_refs() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "dd", None, None, false)
        .await
        .expect("create bucket");

    let payload = vec![0x5A; 1024 * 1024];
    let (a, b) = tokio::join!(
        h.service
            .put_object(&h.owner, put_input("dd", "key-a", &payload)),
        h.service
            .put_object(&h.owner, put_input("dd", "key-b", &payload)),
    );
    a.expect("put a");
    b.expect("put b");

    assert_eq!(count_blob_files(h.service.config().data_root.as_path()), 1);

    let hash = hex::encode(sha2::Sha256::digest(&payload));
    let blob = h
        .service
        .metadata()
        .get_blob(&hash)
        .await
        .expect("get blob")
        .expect("blob row");
    assert_eq!(blob.ref_count, 2);
    assert_eq!(h.service.metrics().snapshot().dedup_hits, 1);
}

// ---------------------------------------------------------------------------
// S6 + invariant 9: delete, grace, sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_collect_orphan_blob_after_grace() {
    let h = harness_with(|config| {
        config.orphan_grace = Duration::ZERO;
    })
    .await;
    h.service
        .create_bucket(&h.owner, "gc", None, None, false)
        .await
        .expect("create bucket");

    h.service
        .put_object(&h.owner, put_input("gc", "victim", b"doomed bytes"))
        .await
        .expect("put");
    h.service
        .delete_object(&h.owner, "gc", "victim", None)
        .await
        .expect("delete");

    let hash = hex::encode(sha2::Sha256::digest(b"doomed bytes"));
    let blob = h
        .service
        .metadata()
        .get_blob(&hash)
        .await
        .expect("get blob")
        .expect("blob row");
    assert_eq!(blob.ref_count, 0);
    assert_eq!(count_blob_files(h.service.config().data_root.as_path()), 1);

    let sweeper = Sweeper::new(&h.service);
    let stats = sweeper.orphan_sweep_once().await.expect("sweep");
    assert!(!stats.skipped);
    assert_eq!(stats.collected_blobs, 1);
    assert_eq!(stats.freed_bytes, 12);

    assert_eq!(count_blob_files(h.service.config().data_root.as_path()), 0);
    assert!(
        h.service
            .metadata()
            .get_blob(&hash)
            .await
            .expect("get blob")
            .is_none()
    );
}

#[tokio::test]
async fn test_should_spare_blob_inside_grace_window() {
    // Default grace is one hour; a just-released blob must survive.
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "gc", None, None, false)
        .await
        .expect("create bucket");

    h.service
        .put_object(&h.owner, put_input("gc", "young", b"fresh"))
        .await
        .expect("put");
    h.service
        .delete_object(&h.owner, "gc", "young", None)
        .await
        .expect("delete");

    let sweeper = Sweeper::new(&h.service);
    let stats = sweeper.orphan_sweep_once().await.expect("sweep");
    assert_eq!(stats.collected_blobs, 0);
    assert_eq!(count_blob_files(h.service.config().data_root.as_path()), 1);
}

// ---------------------------------------------------------------------------
// Listing: pagination and common prefixes (invariant 5)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_paginate_listing_completely_in_order() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "ls", None, None, false)
        .await
        .expect("create bucket");

    let mut expected = Vec::new();
    for i in 0..10 {
        let key = format!("key-{i:02}");
        h.service
            .put_object(&h.owner, put_input("ls", &key, b"x"))
            .await
            .expect("put");
        expected.push(key);
    }

    let mut collected = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = h
            .service
            .list_objects_v2(
                &h.owner,
                "ls",
                None,
                None,
                None,
                token.as_deref(),
                Some(3),
            )
            .await
            .expect("list page");
        collected.extend(page.objects.iter().map(|o| o.key.clone()));
        if !page.is_truncated {
            break;
        }
        token = page.next_continuation_token;
        assert!(token.is_some(), "truncated page must carry a token");
    }

    assert_eq!(collected, expected);
    let unique: HashSet<_> = collected.iter().collect();
    assert_eq!(unique.len(), collected.len(), "no key listed twice");
}

#[tokio::test]
async fn test_should_collapse_common_prefixes_after_filtering() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "ls", None, None, false)
        .await
        .expect("create bucket");

    for key in [
        "photos/2023/a.jpg",
        "photos/2023/b.jpg",
        "photos/2024/c.jpg",
        "photos/readme.txt",
        "videos/d.mp4",
    ] {
        h.service
            .put_object(&h.owner, put_input("ls", key, b"x"))
            .await
            .expect("put");
    }

    let page = h
        .service
        .list_objects_v2(&h.owner, "ls", Some("photos/"), Some("/"), None, None, None)
        .await
        .expect("list");
    assert_eq!(
        page.common_prefixes,
        vec!["photos/2023/".to_owned(), "photos/2024/".to_owned()]
    );
    let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["photos/readme.txt"]);
    assert_eq!(page.key_count, 3);
}

#[tokio::test]
async fn test_should_resume_pagination_across_common_prefixes() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "ls", None, None, false)
        .await
        .expect("create bucket");

    for key in ["a/1", "a/2", "b/1", "b/2", "c/1", "top"] {
        h.service
            .put_object(&h.owner, put_input("ls", key, b"x"))
            .await
            .expect("put");
    }

    let mut entries = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = h
            .service
            .list_objects_v2(&h.owner, "ls", None, Some("/"), None, token.as_deref(), Some(2))
            .await
            .expect("list page");
        entries.extend(page.common_prefixes.clone());
        entries.extend(page.objects.iter().map(|o| o.key.clone()));
        if !page.is_truncated {
            break;
        }
        token = page.next_continuation_token;
    }

    assert_eq!(entries, vec!["a/", "b/", "c/", "top"]);
}

// ---------------------------------------------------------------------------
// Range GET (invariant 7)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_serve_exact_byte_ranges() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "rg", None, None, false)
        .await
        .expect("create bucket");

    let body: Vec<u8> = (0..=255).collect();
    h.service
        .put_object(&h.owner, put_input("rg", "bytes", &body))
        .await
        .expect("put");

    for (range, want_start, want_end) in [
        ("bytes=0-9", 0usize, 9usize),
        ("bytes=100-", 100, 255),
        ("bytes=-16", 240, 255),
        ("bytes=255-255", 255, 255),
    ] {
        let got = h
            .service
            .get_object(
                &h.owner,
                GetObjectInput {
                    range: Some(range.to_owned()),
                    ..get_input("rg", "bytes")
                },
            )
            .await
            .expect("range get");
        assert_eq!(got.body.as_ref(), &body[want_start..=want_end], "{range}");
        assert_eq!(
            got.content_range,
            Some((want_start as u64, want_end as u64, 256))
        );
    }

    let result = h
        .service
        .get_object(
            &h.owner,
            GetObjectInput {
                range: Some("bytes=300-400".to_owned()),
                ..get_input("rg", "bytes")
            },
        )
        .await;
    assert!(matches!(result, Err(StorageError::InvalidRange)));
}

// ---------------------------------------------------------------------------
// Lifecycle expiration (invariant 8)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_expire_old_versions_and_spare_young_ones() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "lc", None, None, false)
        .await
        .expect("create bucket");

    h.service
        .put_object(&h.owner, put_input("lc", "old-log", b"ancient"))
        .await
        .expect("put old");
    h.service
        .put_object(&h.owner, put_input("lc", "new-log", b"recent"))
        .await
        .expect("put new");
    backdate_versions(&h.service, "old-log", 30).await;

    h.service
        .put_bucket_lifecycle(
            &h.owner,
            "lc",
            vec![LifecycleRule {
                rule_id: "expire-logs".to_owned(),
                prefix: String::new(),
                expiration_days: Some(7),
                status: RuleStatus::Enabled,
            }],
        )
        .await
        .expect("put lifecycle");

    let sweeper = Sweeper::new(&h.service);
    let stats = sweeper.expiration_sweep_once().await.expect("sweep");
    assert_eq!(stats.expired_versions, 1);

    assert!(matches!(
        h.service.get_object(&h.owner, get_input("lc", "old-log")).await,
        Err(StorageError::NoSuchKey { .. })
    ));
    assert!(
        h.service
            .get_object(&h.owner, get_input("lc", "new-log"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_should_insert_marker_instead_of_deleting_on_versioned_bucket() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "lcv", None, None, false)
        .await
        .expect("create bucket");
    h.service
        .put_bucket_versioning(&h.owner, "lcv", VersioningState::Enabled)
        .await
        .expect("enable versioning");

    h.service
        .put_object(&h.owner, put_input("lcv", "doc", b"history"))
        .await
        .expect("put");
    backdate_versions(&h.service, "doc", 30).await;

    h.service
        .put_bucket_lifecycle(
            &h.owner,
            "lcv",
            vec![LifecycleRule {
                rule_id: "expire".to_owned(),
                prefix: String::new(),
                expiration_days: Some(7),
                status: RuleStatus::Enabled,
            }],
        )
        .await
        .expect("put lifecycle");

    let sweeper = Sweeper::new(&h.service);
    let stats = sweeper.expiration_sweep_once().await.expect("sweep");
    assert_eq!(stats.expired_versions, 1);

    // Hidden, not hard-deleted: the history remains in the version list.
    assert!(matches!(
        h.service.get_object(&h.owner, get_input("lcv", "doc")).await,
        Err(StorageError::NoSuchKey { .. })
    ));
    let listing = h
        .service
        .list_object_versions(&h.owner, "lcv", None, None, None, None, None)
        .await
        .expect("list versions");
    assert_eq!(listing.versions.len(), 2);
    assert!(listing.versions.iter().any(|v| v.is_delete_marker));
    assert!(listing.versions.iter().any(|v| !v.is_delete_marker));
}

// ---------------------------------------------------------------------------
// Abandoned multipart sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_abort_abandoned_sessions_during_gc() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "mp", None, None, false)
        .await
        .expect("create bucket");
    let upload_id = h
        .service
        .initiate_multipart(
            &h.owner,
            InitiateMultipartInput {
                bucket: "mp".to_owned(),
                key: "stale".to_owned(),
                ..InitiateMultipartInput::default()
            },
        )
        .await
        .expect("initiate");

    // Push the session past the timeout.
    let eight_days_ago = chrono::Utc::now() - chrono::Duration::days(8);
    sqlx::query("UPDATE multipart_sessions SET created_at = ?1 WHERE upload_id = ?2")
        .bind(eight_days_ago)
        .bind(&upload_id)
        .execute(h.service.metadata().pool())
        .await
        .expect("backdate session");

    let sweeper = Sweeper::new(&h.service);
    let stats = sweeper.orphan_sweep_once().await.expect("sweep");
    assert_eq!(stats.aborted_sessions, 1);
    assert!(
        h.service
            .metadata()
            .get_session(&upload_id)
            .await
            .expect("get session")
            .is_none()
    );
}

// ---------------------------------------------------------------------------
// SSE-S3
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_encrypt_at_rest_and_decrypt_on_get() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "enc", None, None, false)
        .await
        .expect("create bucket");

    let put = h
        .service
        .put_object(
            &h.owner,
            PutObjectInput {
                sse: Some(SseMode::Aes256),
                ..put_input("enc", "secret", b"top secret payload")
            },
        )
        .await
        .expect("put");
    // ETag stays the plaintext MD5 under SSE-S3.
    assert_eq!(put.etag, hex::encode(md5::Md5::digest(b"top secret payload")));
    assert_eq!(put.sse, SseMode::Aes256);

    let got = h
        .service
        .get_object(&h.owner, get_input("enc", "secret"))
        .await
        .expect("get");
    assert_eq!(got.body.as_ref(), b"top secret payload");
    assert_eq!(got.sse, SseMode::Aes256);

    // The bytes on disk are the sealed envelope, not the plaintext.
    let hash = hex::encode(sha2::Sha256::digest(b"top secret payload"));
    let path = h
        .service
        .config()
        .data_root
        .join("blobs")
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(&hash);
    let on_disk = std::fs::read(path).expect("read blob file");
    assert_eq!(on_disk.len(), 18 + 28);
    assert!(!on_disk.windows(6).any(|w| w == b"secret".as_slice()));
}

// ---------------------------------------------------------------------------
// ACLs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_gate_anonymous_access_by_bucket_acl() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "pub", None, Some(BucketAcl::PublicRead), false)
        .await
        .expect("create public bucket");
    h.service
        .create_bucket(&h.owner, "priv", None, None, false)
        .await
        .expect("create private bucket");

    h.service
        .put_object(&h.owner, put_input("pub", "open", b"shared"))
        .await
        .expect("put public");
    h.service
        .put_object(&h.owner, put_input("priv", "closed", b"mine"))
        .await
        .expect("put private");

    let anon = Principal::Anonymous;
    let got = h
        .service
        .get_object(&anon, get_input("pub", "open"))
        .await
        .expect("anonymous read of public bucket");
    assert_eq!(got.body.as_ref(), b"shared");

    assert!(matches!(
        h.service.get_object(&anon, get_input("priv", "closed")).await,
        Err(StorageError::AccessDenied)
    ));

    // public-read does not grant writes.
    assert!(matches!(
        h.service
            .put_object(&anon, put_input("pub", "nope", b"x"))
            .await,
        Err(StorageError::AccessDenied)
    ));
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_copy_by_reference_without_duplicating_bytes() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "src", None, None, false)
        .await
        .expect("create src");
    h.service
        .create_bucket(&h.owner, "dst", None, None, false)
        .await
        .expect("create dst");

    let put = h
        .service
        .put_object(&h.owner, put_input("src", "orig", b"copy me"))
        .await
        .expect("put");

    let copied = h
        .service
        .copy_object(
            &h.owner,
            alexander_engine::object::CopyObjectInput {
                src_bucket: "src".to_owned(),
                src_key: "orig".to_owned(),
                src_version_id: None,
                dst_bucket: "dst".to_owned(),
                dst_key: "duplicate".to_owned(),
                user_metadata: None,
                sse: None,
                acl: None,
            },
        )
        .await
        .expect("copy");
    assert_eq!(copied.etag, put.etag);

    let got = h
        .service
        .get_object(&h.owner, get_input("dst", "duplicate"))
        .await
        .expect("get copy");
    assert_eq!(got.body.as_ref(), b"copy me");

    // One file, two references.
    assert_eq!(count_blob_files(h.service.config().data_root.as_path()), 1);
    let hash = hex::encode(sha2::Sha256::digest(b"copy me"));
    let blob = h
        .service
        .metadata()
        .get_blob(&hash)
        .await
        .expect("get blob")
        .expect("blob row");
    assert_eq!(blob.ref_count, 2);
}

// ---------------------------------------------------------------------------
// Bucket lifecycle of the bucket itself
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_refuse_to_delete_nonempty_bucket() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "full", None, None, false)
        .await
        .expect("create bucket");
    h.service
        .put_object(&h.owner, put_input("full", "blocker", b"x"))
        .await
        .expect("put");

    assert!(matches!(
        h.service.delete_bucket(&h.owner, "full").await,
        Err(StorageError::BucketNotEmpty { .. })
    ));

    h.service
        .delete_object(&h.owner, "full", "blocker", None)
        .await
        .expect("delete object");
    h.service
        .delete_bucket(&h.owner, "full")
        .await
        .expect("delete now-empty bucket");
    assert!(matches!(
        h.service.head_bucket(&h.owner, "full").await,
        Err(StorageError::NoSuchBucket { .. })
    ));
}

#[tokio::test]
async fn test_should_reject_duplicate_bucket_names_globally() {
    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "taken", None, None, false)
        .await
        .expect("create");

    let other = Principal::User {
        user_id: "someone-else".to_owned(),
        access_key_id: "AKID2".to_owned(),
    };
    assert!(matches!(
        h.service
            .create_bucket(&other, "taken", None, None, false)
            .await,
        Err(StorageError::BucketAlreadyExists { .. })
    ));
}

// ---------------------------------------------------------------------------
// Digest enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_should_reject_mismatched_content_md5() {
    use base64::Engine as _;

    let h = harness().await;
    h.service
        .create_bucket(&h.owner, "dig", None, None, false)
        .await
        .expect("create bucket");

    let wrong_md5 =
        base64::engine::general_purpose::STANDARD.encode(md5::Md5::digest(b"different"));
    let result = h
        .service
        .put_object(
            &h.owner,
            PutObjectInput {
                content_md5: Some(wrong_md5),
                ..put_input("dig", "k", b"actual body")
            },
        )
        .await;
    assert!(matches!(result, Err(StorageError::BadDigest)));

    // No metadata was written and the key does not exist.
    assert!(matches!(
        h.service.get_object(&h.owner, get_input("dig", "k")).await,
        Err(StorageError::NoSuchKey { .. })
    ));
}
