//! ACL evaluation.
//!
//! Authorization is canned-ACL based: the bucket owner can do everything,
//! `public-read` opens reads and listings to anonymous principals, and
//! `public-read-write` additionally opens writes and deletes. A per-object
//! ACL, when present, overrides the bucket ACL for that object.
//! Authenticated non-owners get the same treatment as anonymous callers;
//! cross-account grants are outside this engine.

use alexander_core::StorageError;
use alexander_core::types::{BucketAcl, Principal};
use alexander_metadata::BucketRecord;

/// What the request wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// GetObject, HeadObject, listings.
    Read,
    /// PutObject, DeleteObject, multipart mutations.
    Write,
    /// Bucket configuration: ACL, versioning, lifecycle. Owner only.
    Configure,
}

/// Authorize `principal` for `mode` against a bucket, honoring an optional
/// per-object ACL override.
///
/// # Errors
///
/// Returns [`StorageError::AccessDenied`] when the principal is not
/// allowed.
pub fn authorize(
    principal: &Principal,
    bucket: &BucketRecord,
    object_acl: Option<BucketAcl>,
    mode: AccessMode,
) -> Result<(), StorageError> {
    if principal.user_id() == Some(bucket.owner_id.as_str()) {
        return Ok(());
    }

    let effective = object_acl.unwrap_or(bucket.acl);
    let allowed = match mode {
        AccessMode::Read => {
            matches!(effective, BucketAcl::PublicRead | BucketAcl::PublicReadWrite)
        }
        AccessMode::Write => matches!(effective, BucketAcl::PublicReadWrite),
        AccessMode::Configure => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(StorageError::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alexander_core::types::VersioningState;
    use chrono::Utc;

    fn bucket(acl: BucketAcl) -> BucketRecord {
        BucketRecord {
            id: "b1".to_owned(),
            owner_id: "owner".to_owned(),
            name: "bucket".to_owned(),
            region: "us-east-1".to_owned(),
            versioning: VersioningState::Disabled,
            object_lock: false,
            acl,
            created_at: Utc::now(),
        }
    }

    fn owner() -> Principal {
        Principal::User {
            user_id: "owner".to_owned(),
            access_key_id: "AKID".to_owned(),
        }
    }

    fn stranger() -> Principal {
        Principal::User {
            user_id: "someone-else".to_owned(),
            access_key_id: "AKID2".to_owned(),
        }
    }

    #[test]
    fn test_should_allow_owner_everything() {
        let bucket = bucket(BucketAcl::Private);
        for mode in [AccessMode::Read, AccessMode::Write, AccessMode::Configure] {
            assert!(authorize(&owner(), &bucket, None, mode).is_ok());
        }
    }

    #[test]
    fn test_should_deny_anonymous_on_private_bucket() {
        let bucket = bucket(BucketAcl::Private);
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Read).is_err());
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Write).is_err());
    }

    #[test]
    fn test_should_allow_anonymous_read_on_public_read() {
        let bucket = bucket(BucketAcl::PublicRead);
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Read).is_ok());
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Write).is_err());
    }

    #[test]
    fn test_should_allow_anonymous_write_on_public_read_write() {
        let bucket = bucket(BucketAcl::PublicReadWrite);
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Write).is_ok());
    }

    #[test]
    fn test_should_treat_non_owner_like_anonymous() {
        let private_bucket = bucket(BucketAcl::Private);
        assert!(authorize(&stranger(), &private_bucket, None, AccessMode::Read).is_err());

        let public_bucket = bucket(BucketAcl::PublicRead);
        assert!(authorize(&stranger(), &public_bucket, None, AccessMode::Read).is_ok());
    }

    #[test]
    fn test_should_let_object_acl_override_bucket_acl() {
        // Private bucket, public object.
        let bucket_record = bucket(BucketAcl::Private);
        assert!(
            authorize(
                &Principal::Anonymous,
                &bucket_record,
                Some(BucketAcl::PublicRead),
                AccessMode::Read
            )
            .is_ok()
        );

        // Public bucket, private object.
        let bucket_record = bucket(BucketAcl::PublicRead);
        assert!(
            authorize(
                &Principal::Anonymous,
                &bucket_record,
                Some(BucketAcl::Private),
                AccessMode::Read
            )
            .is_err()
        );
    }

    #[test]
    fn test_should_reserve_configuration_for_owner() {
        let bucket = bucket(BucketAcl::PublicReadWrite);
        assert!(authorize(&Principal::Anonymous, &bucket, None, AccessMode::Configure).is_err());
        assert!(authorize(&stranger(), &bucket, None, AccessMode::Configure).is_err());
    }
}
