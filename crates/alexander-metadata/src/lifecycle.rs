//! Lifecycle rule repository.

use async_trait::async_trait;
use sqlx::{Row, sqlite::SqliteRow};
use tracing::debug;

use alexander_core::types::RuleStatus;

use crate::MetadataStore;
use crate::error::MetadataError;

/// One row of `lifecycle_rules`.
#[derive(Debug, Clone)]
pub struct LifecycleRuleRecord {
    /// Owning bucket id.
    pub bucket_id: String,
    /// Rule id, unique within the bucket.
    pub rule_id: String,
    /// Key prefix the rule applies to; empty matches every key.
    pub prefix: String,
    /// Days after creation at which a version expires; `None` disables
    /// expiration for the rule.
    pub expiration_days: Option<i64>,
    /// Whether sweeps evaluate the rule.
    pub status: RuleStatus,
}

fn row_to_rule(row: &SqliteRow) -> Result<LifecycleRuleRecord, MetadataError> {
    let status: String = row.try_get("status")?;
    Ok(LifecycleRuleRecord {
        bucket_id: row.try_get("bucket_id")?,
        rule_id: row.try_get("rule_id")?,
        prefix: row.try_get("prefix")?,
        expiration_days: row.try_get("expiration_days")?,
        status: status
            .parse()
            .map_err(|_| MetadataError::Conflict(format!("bad rule status: {status}")))?,
    })
}

/// Repository for lifecycle configurations.
#[async_trait]
pub trait LifecycleRepo: Send + Sync {
    /// Replace the bucket's whole rule set.
    async fn put_rules(
        &self,
        bucket_id: &str,
        rules: &[LifecycleRuleRecord],
    ) -> Result<(), MetadataError>;

    /// The bucket's rules, rule-id-ordered.
    async fn get_rules(&self, bucket_id: &str) -> Result<Vec<LifecycleRuleRecord>, MetadataError>;

    /// Drop the bucket's rule set.
    async fn delete_rules(&self, bucket_id: &str) -> Result<(), MetadataError>;

    /// Every enabled rule across all buckets, for the expiration sweep.
    async fn enabled_rules(&self) -> Result<Vec<LifecycleRuleRecord>, MetadataError>;
}

#[async_trait]
impl LifecycleRepo for MetadataStore {
    async fn put_rules(
        &self,
        bucket_id: &str,
        rules: &[LifecycleRuleRecord],
    ) -> Result<(), MetadataError> {
        let mut tx = self.pool().begin().await.map_err(MetadataError::from_sqlx)?;

        sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?1")
            .bind(bucket_id)
            .execute(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;

        for rule in rules {
            sqlx::query(
                "INSERT INTO lifecycle_rules (bucket_id, rule_id, prefix, expiration_days, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(bucket_id)
            .bind(&rule.rule_id)
            .bind(&rule.prefix)
            .bind(rule.expiration_days)
            .bind(rule.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(MetadataError::from_sqlx)?;
        }

        tx.commit().await.map_err(MetadataError::from_sqlx)?;
        debug!(bucket_id, rules = rules.len(), "replaced lifecycle rules");
        Ok(())
    }

    async fn get_rules(&self, bucket_id: &str) -> Result<Vec<LifecycleRuleRecord>, MetadataError> {
        let rows =
            sqlx::query("SELECT * FROM lifecycle_rules WHERE bucket_id = ?1 ORDER BY rule_id")
                .bind(bucket_id)
                .fetch_all(self.pool())
                .await
                .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn delete_rules(&self, bucket_id: &str) -> Result<(), MetadataError> {
        sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?1")
            .bind(bucket_id)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }

    async fn enabled_rules(&self) -> Result<Vec<LifecycleRuleRecord>, MetadataError> {
        let rows = sqlx::query(
            "SELECT * FROM lifecycle_rules WHERE status = 'Enabled' ORDER BY bucket_id, rule_id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;
        rows.iter().map(row_to_rule).collect()
    }
}
