//! Users, access keys, and dashboard sessions.
//!
//! The engine only reads access keys (for SigV4 secret lookup); the create,
//! rotate, and session-expiry methods are the surface the external authn
//! CLI drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::debug;
use uuid::Uuid;

use crate::MetadataStore;
use crate::error::MetadataError;

/// One row of `users`.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// User id (UUID).
    pub id: String,
    /// Unique login name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One row of `access_keys`. The secret never leaves this crate except
/// through [`AccessKeyRepo::lookup_secret`].
#[derive(Debug, Clone)]
pub struct AccessKeyRecord {
    /// Public access key id.
    pub access_key_id: String,
    /// Secret key.
    pub secret_key: String,
    /// Owning user id.
    pub user_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Disabled keys fail authentication but keep their row.
    pub disabled: bool,
}

fn row_to_user(row: &SqliteRow) -> Result<UserRecord, MetadataError> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Repository for user rows.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user.
    async fn create_user(&self, name: &str, email: &str) -> Result<UserRecord, MetadataError>;

    /// Look up a user by id.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, MetadataError>;
}

/// Repository for access keys.
#[async_trait]
pub trait AccessKeyRepo: Send + Sync {
    /// Issue a new key pair for a user.
    async fn create_access_key(
        &self,
        user_id: &str,
        access_key_id: &str,
        secret_key: &str,
    ) -> Result<AccessKeyRecord, MetadataError>;

    /// Replace the secret of an existing key.
    async fn rotate_access_key(
        &self,
        access_key_id: &str,
        new_secret: &str,
    ) -> Result<(), MetadataError>;

    /// Resolve `(user_id, secret_key)` for an enabled key.
    async fn lookup_secret(
        &self,
        access_key_id: &str,
    ) -> Result<Option<(String, String)>, MetadataError>;
}

/// Repository for dashboard sessions; the engine only expires them.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Remove sessions past their expiry. Returns how many were removed.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, MetadataError>;
}

#[async_trait]
impl UserRepo for MetadataStore {
    async fn create_user(&self, name: &str, email: &str) -> Result<UserRecord, MetadataError> {
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            email: email.to_owned(),
            created_at: Utc::now(),
        };
        let result = sqlx::query(
            "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(record.created_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {
                debug!(user = %record.name, id = %record.id, "created user");
                Ok(record)
            }
            Err(e) if MetadataError::is_unique_violation(&e) => Err(MetadataError::AlreadyExists {
                entity: format!("user {name}"),
            }),
            Err(e) => Err(MetadataError::from_sqlx(e)),
        }
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        row.as_ref().map(row_to_user).transpose()
    }
}

#[async_trait]
impl AccessKeyRepo for MetadataStore {
    async fn create_access_key(
        &self,
        user_id: &str,
        access_key_id: &str,
        secret_key: &str,
    ) -> Result<AccessKeyRecord, MetadataError> {
        let record = AccessKeyRecord {
            access_key_id: access_key_id.to_owned(),
            secret_key: secret_key.to_owned(),
            user_id: user_id.to_owned(),
            created_at: Utc::now(),
            disabled: false,
        };
        let result = sqlx::query(
            "INSERT INTO access_keys (access_key_id, secret_key, user_id, created_at, disabled)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(&record.access_key_id)
        .bind(&record.secret_key)
        .bind(&record.user_id)
        .bind(record.created_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(e) if MetadataError::is_unique_violation(&e) => Err(MetadataError::AlreadyExists {
                entity: format!("access key {access_key_id}"),
            }),
            Err(e) => Err(MetadataError::from_sqlx(e)),
        }
    }

    async fn rotate_access_key(
        &self,
        access_key_id: &str,
        new_secret: &str,
    ) -> Result<(), MetadataError> {
        let result = sqlx::query(
            "UPDATE access_keys SET secret_key = ?2 WHERE access_key_id = ?1",
        )
        .bind(access_key_id)
        .bind(new_secret)
        .execute(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound {
                entity: format!("access key {access_key_id}"),
            });
        }
        debug!(access_key_id, "rotated access key");
        Ok(())
    }

    async fn lookup_secret(
        &self,
        access_key_id: &str,
    ) -> Result<Option<(String, String)>, MetadataError> {
        let row = sqlx::query(
            "SELECT user_id, secret_key FROM access_keys
             WHERE access_key_id = ?1 AND disabled = 0",
        )
        .bind(access_key_id)
        .fetch_optional(self.pool())
        .await
        .map_err(MetadataError::from_sqlx)?;

        row.map(|r| {
            Ok::<_, MetadataError>((r.try_get::<String, _>("user_id")?, r.try_get("secret_key")?))
        })
        .transpose()
    }
}

#[async_trait]
impl SessionRepo for MetadataStore {
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, MetadataError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(result.rows_affected())
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
    async fn test_should_create_user_and_key_then_lookup_secret() {
        let store = store().await;
        let user = store
            .create_user("alice", "alice@example.com")
            .await
            .expect("create user");
        store
            .create_access_key(&user.id, "AKIDALICE", "s3cret")
            .await
            .expect("create key");

        let (user_id, secret) = store
            .lookup_secret("AKIDALICE")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(user_id, user.id);
        assert_eq!(secret, "s3cret");
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_user_name() {
        let store = store().await;
        store
            .create_user("bob", "bob@example.com")
            .await
            .expect("create");
        let result = store.create_user("bob", "other@example.com").await;
        assert!(matches!(result, Err(MetadataError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_should_rotate_secret() {
        let store = store().await;
        let user = store
            .create_user("carol", "carol@example.com")
            .await
            .expect("create user");
        store
            .create_access_key(&user.id, "AKIDCAROL", "old")
            .await
            .expect("create key");

        store
            .rotate_access_key("AKIDCAROL", "new")
            .await
            .expect("rotate");
        let (_, secret) = store
            .lookup_secret("AKIDCAROL")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(secret, "new");
    }

    #[tokio::test]
    async fn test_should_fail_rotation_of_unknown_key() {
        let store = store().await;
        let result = store.rotate_access_key("GHOST", "x").await;
        assert!(matches!(result, Err(MetadataError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_should_miss_lookup_for_unknown_key() {
        let store = store().await;
        assert!(store.lookup_secret("NOPE").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_should_delete_expired_sessions_only() {
        let store = store().await;
        let user = store
            .create_user("dave", "dave@example.com")
            .await
            .expect("create user");

        let now = Utc::now();
        for (token, expires) in [
            ("live", now + chrono::Duration::hours(1)),
            ("dead", now - chrono::Duration::hours(1)),
        ] {
            sqlx::query(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(token)
            .bind(&user.id)
            .bind(now)
            .bind(expires)
            .execute(store.pool())
            .await
            .expect("insert session");
        }

        let removed = store.delete_expired_sessions(now).await.expect("expire");
        assert_eq!(removed, 1);
    }
}
