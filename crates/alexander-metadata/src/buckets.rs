//! Bucket repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::debug;
use uuid::Uuid;

use alexander_core::types::{BucketAcl, VersioningState};

use crate::MetadataStore;
use crate::error::MetadataError;

/// One row of the `buckets` table.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    /// Opaque bucket id (UUID).
    pub id: String,
    /// Owning user id.
    pub owner_id: String,
    /// Globally unique bucket name.
    pub name: String,
    /// Region label reported on the wire.
    pub region: String,
    /// Versioning state.
    pub versioning: VersioningState,
    /// Whether object lock was requested at creation.
    pub object_lock: bool,
    /// Canned bucket ACL.
    pub acl: BucketAcl,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn row_to_bucket(row: &SqliteRow) -> Result<BucketRecord, MetadataError> {
    let versioning: String = row.try_get("versioning")?;
    let acl: String = row.try_get("acl")?;
    Ok(BucketRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        region: row.try_get("region")?,
        versioning: versioning
            .parse()
            .map_err(|_| MetadataError::Conflict(format!("bad versioning value: {versioning}")))?,
        object_lock: row.try_get("object_lock")?,
        acl: acl
            .parse()
            .map_err(|_| MetadataError::Conflict(format!("bad acl value: {acl}")))?,
        created_at: row.try_get("created_at")?,
    })
}

/// Repository for bucket rows.
#[async_trait]
pub trait BucketRepo: Send + Sync {
    /// Create a bucket. The unique constraint on `name` decides races.
    async fn create_bucket(
        &self,
        owner_id: &str,
        name: &str,
        region: &str,
        object_lock: bool,
        acl: BucketAcl,
    ) -> Result<BucketRecord, MetadataError>;

    /// Look up a bucket by name.
    async fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>, MetadataError>;

    /// Look up a bucket by id.
    async fn get_bucket_by_id(&self, bucket_id: &str)
    -> Result<Option<BucketRecord>, MetadataError>;

    /// All buckets owned by `owner_id`, name-ordered.
    async fn list_buckets(&self, owner_id: &str) -> Result<Vec<BucketRecord>, MetadataError>;

    /// Delete a bucket row. The caller checks emptiness first.
    async fn delete_bucket(&self, bucket_id: &str) -> Result<(), MetadataError>;

    /// Count of live object entries (current pointers) in the bucket.
    async fn count_objects(&self, bucket_id: &str) -> Result<i64, MetadataError>;

    /// Count of version rows (including delete markers) in the bucket.
    async fn count_versions(&self, bucket_id: &str) -> Result<i64, MetadataError>;

    /// Update the versioning state.
    async fn set_versioning(
        &self,
        bucket_id: &str,
        state: VersioningState,
    ) -> Result<(), MetadataError>;

    /// Update the canned ACL.
    async fn set_acl(&self, bucket_id: &str, acl: BucketAcl) -> Result<(), MetadataError>;
}

#[async_trait]
impl BucketRepo for MetadataStore {
    async fn create_bucket(
        &self,
        owner_id: &str,
        name: &str,
        region: &str,
        object_lock: bool,
        acl: BucketAcl,
    ) -> Result<BucketRecord, MetadataError> {
        let record = BucketRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_owned(),
            name: name.to_owned(),
            region: region.to_owned(),
            versioning: if object_lock {
                // Object lock requires versioning from birth.
                VersioningState::Enabled
            } else {
                VersioningState::Disabled
            },
            object_lock,
            acl,
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT INTO buckets (id, owner_id, name, region, versioning, object_lock, acl, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.name)
        .bind(&record.region)
        .bind(record.versioning.as_str())
        .bind(record.object_lock)
        .bind(record.acl.as_str())
        .bind(record.created_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {
                debug!(bucket = %record.name, id = %record.id, "created bucket");
                Ok(record)
            }
            Err(e) if MetadataError::is_unique_violation(&e) => Err(MetadataError::AlreadyExists {
                entity: format!("bucket {name}"),
            }),
            Err(e) => Err(MetadataError::from_sqlx(e)),
        }
    }

    async fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM buckets WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_bucket).transpose()
    }

    async fn get_bucket_by_id(
        &self,
        bucket_id: &str,
    ) -> Result<Option<BucketRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM buckets WHERE id = ?1")
            .bind(bucket_id)
            .fetch_optional(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_bucket).transpose()
    }

    async fn list_buckets(&self, owner_id: &str) -> Result<Vec<BucketRecord>, MetadataError> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE owner_id = ?1 ORDER BY name")
            .bind(owner_id)
            .fetch_all(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_bucket).collect()
    }

    async fn delete_bucket(&self, bucket_id: &str) -> Result<(), MetadataError> {
        sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?1")
            .bind(bucket_id)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        sqlx::query("DELETE FROM buckets WHERE id = ?1")
            .bind(bucket_id)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        debug!(bucket_id, "deleted bucket");
        Ok(())
    }

    async fn count_objects(&self, bucket_id: &str) -> Result<i64, MetadataError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket_id = ?1")
            .bind(bucket_id)
            .fetch_one(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)
    }

    async fn count_versions(&self, bucket_id: &str) -> Result<i64, MetadataError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM object_versions WHERE bucket_id = ?1")
            .bind(bucket_id)
            .fetch_one(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)
    }

    async fn set_versioning(
        &self,
        bucket_id: &str,
        state: VersioningState,
    ) -> Result<(), MetadataError> {
        sqlx::query("UPDATE buckets SET versioning = ?2 WHERE id = ?1")
            .bind(bucket_id)
            .bind(state.as_str())
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }

    async fn set_acl(&self, bucket_id: &str, acl: BucketAcl) -> Result<(), MetadataError> {
        sqlx::query("UPDATE buckets SET acl = ?2 WHERE id = ?1")
            .bind(bucket_id)
            .bind(acl.as_str())
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
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

    #[tokio::test]
    async fn test_should_create_and_fetch_bucket() {
        let store = store().await;
        let created = store
            .create_bucket("u1", "photos", "us-east-1", false, BucketAcl::Private)
            .await
            .expect("create");

        let fetched = store
            .get_bucket("photos")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.versioning, VersioningState::Disabled);
        assert_eq!(fetched.acl, BucketAcl::Private);
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_bucket_name() {
        let store = store().await;
        store
            .create_bucket("u1", "taken", "us-east-1", false, BucketAcl::Private)
            .await
            .expect("create");

        let result = store
            .create_bucket("u2", "taken", "us-east-1", false, BucketAcl::Private)
            .await;
        assert!(matches!(result, Err(MetadataError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_should_enable_versioning_with_object_lock() {
        let store = store().await;
        let bucket = store
            .create_bucket("u1", "locked", "us-east-1", true, BucketAcl::Private)
            .await
            .expect("create");
        assert!(bucket.object_lock);
        assert_eq!(bucket.versioning, VersioningState::Enabled);
    }

    #[tokio::test]
    async fn test_should_list_buckets_by_owner_sorted() {
        let store = store().await;
        for name in ["zeta", "alpha", "mid"] {
            store
                .create_bucket("u1", name, "us-east-1", false, BucketAcl::Private)
                .await
                .expect("create");
        }
        store
            .create_bucket("u2", "other", "us-east-1", false, BucketAcl::Private)
            .await
            .expect("create");

        let names: Vec<String> = store
            .list_buckets("u1")
            .await
            .expect("list")
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_should_update_versioning_and_acl() {
        let store = store().await;
        let bucket = store
            .create_bucket("u1", "b", "us-east-1", false, BucketAcl::Private)
            .await
            .expect("create");

        store
            .set_versioning(&bucket.id, VersioningState::Enabled)
            .await
            .expect("set versioning");
        store
            .set_acl(&bucket.id, BucketAcl::PublicRead)
            .await
            .expect("set acl");

        let fetched = store.get_bucket("b").await.expect("get").expect("present");
        assert_eq!(fetched.versioning, VersioningState::Enabled);
        assert_eq!(fetched.acl, BucketAcl::PublicRead);
    }

    #[tokio::test]
    async fn test_should_delete_bucket_and_its_rules() {
        let store = store().await;
        let bucket = store
            .create_bucket("u1", "doomed", "us-east-1", false, BucketAcl::Private)
            .await
            .expect("create");

        store.delete_bucket(&bucket.id).await.expect("delete");
        assert!(store.get_bucket("doomed").await.expect("get").is_none());
    }
}
