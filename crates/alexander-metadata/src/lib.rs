//! Relational metadata store for Alexander Storage.
//!
//! Every entity the engine tracks (buckets, objects, versions, blobs,
//! multipart sessions, lifecycle rules, users and access keys) lives in a
//! transactional SQL store behind a typed repository trait. The shipped
//! implementation targets SQLite through `sqlx`; the statements stay inside
//! an ANSI-portable subset so a PostgreSQL implementation can be injected
//! behind the same traits.
//!
//! Mutations that touch more than one row run inside a single transaction.
//! The four load-bearing boundaries are blob admit (insert-or-increment),
//! version insert + ref, version delete + unref, and multipart complete;
//! each is a repository method that owns its transaction and retries
//! transient conflicts with exponential backoff.

pub mod blobs;
pub mod buckets;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod multipart;
pub mod objects;
pub mod schema;
pub mod users;

mod retry;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

pub use blobs::{BlobAdmission, BlobRecord, BlobRepo};
pub use buckets::{BucketRecord, BucketRepo};
pub use error::MetadataError;
pub use lifecycle::{LifecycleRepo, LifecycleRuleRecord};
pub use lock::LockRepo;
pub use multipart::{MultipartRepo, NewPart, PartRecord, SessionRecord};
pub use objects::{DeleteOutcome, NewVersion, ObjectRepo, VersionRecord};
pub use users::{AccessKeyRecord, AccessKeyRepo, SessionRepo, UserRecord, UserRepo};

/// The SQLite-backed metadata store.
///
/// Cheap to clone; all clones share one connection pool. Implements every
/// repository trait in this crate.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: Pool<Sqlite>,
}

impl MetadataStore {
    /// Connect to `dsn` and apply the schema.
    ///
    /// In-memory DSNs are pinned to a single pooled connection, since every
    /// SQLite `:memory:` connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Backend`] when the connection or schema
    /// application fails.
    pub async fn connect(dsn: &str) -> Result<Self, MetadataError> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(MetadataError::Backend)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let in_memory = dsn.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .connect_with(options)
            .await
            .map_err(MetadataError::Backend)?;

        schema::apply(&pool).await?;
        info!(dsn, "metadata store ready");
        Ok(Self { pool })
    }

    /// The underlying pool. An escape hatch for embedders that need raw
    /// queries (migrations, admin tooling); engine code goes through the
    /// repository traits.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
