//! Embedded schema, applied at connect time.
//!
//! Statements are `CREATE ... IF NOT EXISTS` so re-applying on every start
//! is safe. The partial indexes back the two hot scans: orphan-blob
//! selection and enabled-lifecycle-rule lookup.

use sqlx::{Pool, Sqlite};

use crate::error::MetadataError;

/// Every DDL statement, in dependency order.
const STATEMENTS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS access_keys (
        access_key_id TEXT PRIMARY KEY,
        secret_key TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        disabled INTEGER NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS buckets (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL UNIQUE,
        region TEXT NOT NULL,
        versioning TEXT NOT NULL DEFAULT 'Disabled',
        object_lock INTEGER NOT NULL DEFAULT 0,
        acl TEXT NOT NULL DEFAULT 'private',
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS blobs (
        content_hash TEXT PRIMARY KEY,
        size INTEGER NOT NULL,
        storage_path TEXT NOT NULL,
        ref_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        last_accessed TEXT NOT NULL,
        is_encrypted INTEGER NOT NULL DEFAULT 0
    )",
    r"CREATE INDEX IF NOT EXISTS idx_blobs_orphans
        ON blobs (ref_count, last_accessed) WHERE ref_count = 0",
    r"CREATE TABLE IF NOT EXISTS objects (
        bucket_id TEXT NOT NULL REFERENCES buckets(id),
        key TEXT NOT NULL,
        current_version_id TEXT,
        PRIMARY KEY (bucket_id, key)
    )",
    r"CREATE TABLE IF NOT EXISTS object_versions (
        version_id TEXT PRIMARY KEY,
        bucket_id TEXT NOT NULL,
        key TEXT NOT NULL,
        content_hash TEXT,
        size INTEGER NOT NULL DEFAULT 0,
        etag TEXT NOT NULL DEFAULT '',
        content_type TEXT,
        user_metadata TEXT NOT NULL DEFAULT '{}',
        sse TEXT NOT NULL DEFAULT 'none',
        acl TEXT,
        is_delete_marker INTEGER NOT NULL DEFAULT 0,
        is_null_version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_versions_bucket_key
        ON object_versions (bucket_id, key, version_id)",
    r"CREATE TABLE IF NOT EXISTS multipart_sessions (
        upload_id TEXT PRIMARY KEY,
        bucket_id TEXT NOT NULL,
        key TEXT NOT NULL,
        initiator_user_id TEXT,
        sse TEXT NOT NULL DEFAULT 'none',
        content_type TEXT,
        user_metadata TEXT NOT NULL DEFAULT '{}',
        acl TEXT,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS multipart_parts (
        upload_id TEXT NOT NULL REFERENCES multipart_sessions(upload_id) ON DELETE CASCADE,
        part_number INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        size INTEGER NOT NULL,
        etag TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (upload_id, part_number)
    )",
    r"CREATE TABLE IF NOT EXISTS lifecycle_rules (
        bucket_id TEXT NOT NULL,
        rule_id TEXT NOT NULL,
        prefix TEXT NOT NULL DEFAULT '',
        expiration_days INTEGER,
        status TEXT NOT NULL DEFAULT 'Enabled',
        PRIMARY KEY (bucket_id, rule_id)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_lifecycle_enabled
        ON lifecycle_rules (bucket_id, status) WHERE status = 'Enabled'",
    r"CREATE TABLE IF NOT EXISTS advisory_locks (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        acquired_at TEXT NOT NULL
    )",
];

/// Apply the schema to a fresh or existing database.
pub async fn apply(pool: &Pool<Sqlite>) -> Result<(), MetadataError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(MetadataError::Backend)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::MetadataStore;

    #[tokio::test]
    async fn test_should_apply_schema_idempotently() {
        let store = MetadataStore::connect("sqlite::memory:")
            .await
            .expect("connect");
        // A second application must be a no-op.
        super::apply(store.pool()).await.expect("re-apply");
    }
}
