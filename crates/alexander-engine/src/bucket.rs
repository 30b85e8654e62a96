//! Bucket operations and bucket configuration.

use std::net::Ipv4Addr;

use tracing::debug;

use alexander_core::types::{BucketAcl, Principal, RuleStatus, VersioningState};
use alexander_core::{StorageError, StorageResult};
use alexander_metadata::{
    BucketRecord, BucketRepo, LifecycleRepo, LifecycleRuleRecord, MetadataError,
};

use crate::access::{AccessMode, authorize};
use crate::service::ObjectService;

/// Default region reported when the caller does not name one.
const DEFAULT_REGION: &str = "us-east-1";

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

/// A lifecycle rule as accepted from and returned to the wire layer.
#[derive(Debug, Clone)]
pub struct LifecycleRule {
    /// Rule id, unique within the bucket.
    pub rule_id: String,
    /// Key prefix the rule applies to.
    pub prefix: String,
    /// Days after creation at which a current version expires.
    pub expiration_days: Option<i64>,
    /// Whether the rule participates in sweeps.
    pub status: RuleStatus,
}

/// Validate an S3 bucket name against the AWS naming rules.
///
/// # Errors
///
/// Returns [`StorageError::InvalidBucketName`] naming the violated rule.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let fail = |reason: &str| {
        Err(StorageError::InvalidBucketName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        })
    };

    let len = name.len();
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return fail("bucket name must be between 3 and 63 characters long");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return fail("bucket name must only contain lowercase letters, numbers, hyphens, and dots");
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[len - 1];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit())
        || !(last.is_ascii_lowercase() || last.is_ascii_digit())
    {
        return fail("bucket name must start and end with a letter or number");
    }
    if name.contains("..") {
        return fail("bucket name must not contain consecutive dots");
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return fail("bucket name must not be formatted as an IP address");
    }
    if name.starts_with("xn--") || name.starts_with("sthree-") {
        return fail("bucket name uses a reserved prefix");
    }
    if name.ends_with("-s3alias") {
        return fail("bucket name uses a reserved suffix");
    }
    Ok(())
}

impl ObjectService {
    /// Resolve a bucket by name or fail with `NoSuchBucket`.
    pub(crate) async fn resolve_bucket(&self, name: &str) -> StorageResult<BucketRecord> {
        self.meta
            .get_bucket(name)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::NoSuchBucket {
                bucket: name.to_owned(),
            })
    }

    /// Create a bucket owned by the calling principal.
    pub async fn create_bucket(
        &self,
        principal: &Principal,
        name: &str,
        region: Option<&str>,
        acl: Option<BucketAcl>,
        object_lock: bool,
    ) -> StorageResult<BucketRecord> {
        let Some(owner_id) = principal.user_id() else {
            return Err(StorageError::AccessDenied);
        };
        validate_bucket_name(name)?;

        let region = region.unwrap_or(DEFAULT_REGION);
        match self
            .meta
            .create_bucket(owner_id, name, region, object_lock, acl.unwrap_or_default())
            .await
        {
            Ok(bucket) => {
                debug!(bucket = %name, owner = %owner_id, "create_bucket completed");
                Ok(bucket)
            }
            Err(MetadataError::AlreadyExists { .. }) => Err(StorageError::BucketAlreadyExists {
                bucket: name.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Existence and access probe.
    pub async fn head_bucket(
        &self,
        principal: &Principal,
        name: &str,
    ) -> StorageResult<BucketRecord> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;
        Ok(bucket)
    }

    /// Buckets owned by the calling principal, name-ordered.
    pub async fn list_buckets(&self, principal: &Principal) -> StorageResult<Vec<BucketRecord>> {
        let Some(owner_id) = principal.user_id() else {
            return Err(StorageError::AccessDenied);
        };
        self.meta
            .list_buckets(owner_id)
            .await
            .map_err(StorageError::from)
    }

    /// Delete an empty bucket.
    pub async fn delete_bucket(&self, principal: &Principal, name: &str) -> StorageResult<()> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Configure)?;

        let versions = self
            .meta
            .count_versions(&bucket.id)
            .await
            .map_err(StorageError::from)?;
        if versions > 0 {
            return Err(StorageError::BucketNotEmpty {
                bucket: name.to_owned(),
            });
        }

        self.meta
            .delete_bucket(&bucket.id)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %name, "delete_bucket completed");
        Ok(())
    }

    /// The bucket's canned ACL.
    pub async fn get_bucket_acl(
        &self,
        principal: &Principal,
        name: &str,
    ) -> StorageResult<BucketAcl> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;
        Ok(bucket.acl)
    }

    /// Replace the bucket's canned ACL. Owner only.
    pub async fn put_bucket_acl(
        &self,
        principal: &Principal,
        name: &str,
        acl: BucketAcl,
    ) -> StorageResult<()> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Configure)?;
        self.meta
            .set_acl(&bucket.id, acl)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %name, acl = %acl, "put_bucket_acl completed");
        Ok(())
    }

    /// The bucket's versioning state.
    pub async fn get_bucket_versioning(
        &self,
        principal: &Principal,
        name: &str,
    ) -> StorageResult<VersioningState> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;
        Ok(bucket.versioning)
    }

    /// Switch versioning between Enabled and Suspended. A bucket that was
    /// never versioned reports Disabled, but Disabled cannot be set back.
    pub async fn put_bucket_versioning(
        &self,
        principal: &Principal,
        name: &str,
        state: VersioningState,
    ) -> StorageResult<()> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Configure)?;

        if state == VersioningState::Disabled {
            return Err(StorageError::InvalidArgument {
                message: "versioning cannot be set to Disabled once configured".to_owned(),
            });
        }
        if bucket.object_lock && state == VersioningState::Suspended {
            return Err(StorageError::InvalidArgument {
                message: "versioning cannot be suspended on an object-lock bucket".to_owned(),
            });
        }

        self.meta
            .set_versioning(&bucket.id, state)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %name, state = %state, "put_bucket_versioning completed");
        Ok(())
    }

    /// The bucket's lifecycle rules.
    pub async fn get_bucket_lifecycle(
        &self,
        principal: &Principal,
        name: &str,
    ) -> StorageResult<Vec<LifecycleRule>> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Read)?;

        let rules = self
            .meta
            .get_rules(&bucket.id)
            .await
            .map_err(StorageError::from)?;
        if rules.is_empty() {
            return Err(StorageError::NoSuchLifecycleConfiguration);
        }
        Ok(rules
            .into_iter()
            .map(|r| LifecycleRule {
                rule_id: r.rule_id,
                prefix: r.prefix,
                expiration_days: r.expiration_days,
                status: r.status,
            })
            .collect())
    }

    /// Replace the bucket's lifecycle configuration.
    pub async fn put_bucket_lifecycle(
        &self,
        principal: &Principal,
        name: &str,
        rules: Vec<LifecycleRule>,
    ) -> StorageResult<()> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Configure)?;

        if rules.is_empty() {
            return Err(StorageError::InvalidArgument {
                message: "lifecycle configuration needs at least one rule".to_owned(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            if rule.rule_id.is_empty() {
                return Err(StorageError::InvalidArgument {
                    message: "lifecycle rule id must not be empty".to_owned(),
                });
            }
            if !seen.insert(rule.rule_id.as_str()) {
                return Err(StorageError::InvalidArgument {
                    message: format!("duplicate lifecycle rule id: {}", rule.rule_id),
                });
            }
            if let Some(days) = rule.expiration_days {
                if days <= 0 {
                    return Err(StorageError::InvalidArgument {
                        message: "expiration days must be positive".to_owned(),
                    });
                }
            }
        }

        let records: Vec<LifecycleRuleRecord> = rules
            .into_iter()
            .map(|r| LifecycleRuleRecord {
                bucket_id: bucket.id.clone(),
                rule_id: r.rule_id,
                prefix: r.prefix,
                expiration_days: r.expiration_days,
                status: r.status,
            })
            .collect();
        self.meta
            .put_rules(&bucket.id, &records)
            .await
            .map_err(StorageError::from)?;
        debug!(bucket = %name, rules = records.len(), "put_bucket_lifecycle completed");
        Ok(())
    }

    /// Drop the bucket's lifecycle configuration.
    pub async fn delete_bucket_lifecycle(
        &self,
        principal: &Principal,
        name: &str,
    ) -> StorageResult<()> {
        let bucket = self.resolve_bucket(name).await?;
        authorize(principal, &bucket, None, AccessMode::Configure)?;
        self.meta
            .delete_rules(&bucket.id)
            .await
            .map_err(StorageError::from)
    }
}
