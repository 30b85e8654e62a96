//! Metadata-layer error type.

use alexander_core::StorageError;

/// Errors raised by the metadata repositories.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The row does not exist.
    #[error("metadata row not found: {entity}")]
    NotFound {
        /// What was looked up.
        entity: String,
    },

    /// A uniqueness constraint rejected the insert.
    #[error("metadata row already exists: {entity}")]
    AlreadyExists {
        /// What collided.
        entity: String,
    },

    /// A transient conflict (busy database, serialization failure). Retried
    /// internally; only surfaces once the retry budget is exhausted.
    #[error("metadata store conflict: {0}")]
    Conflict(String),

    /// Any other backend failure.
    #[error("metadata store error: {0}")]
    Backend(#[from] sqlx::Error),
}

impl MetadataError {
    /// Whether the retry loop should try again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Backend(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6); message match covers
                // drivers that do not expose the numeric code.
                db.code().as_deref() == Some("5")
                    || db.code().as_deref() == Some("6")
                    || db.message().contains("locked")
                    || db.message().contains("busy")
            }
            Self::Backend(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    /// Classify a raw sqlx error, promoting transient conditions to
    /// [`MetadataError::Conflict`].
    #[must_use]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let wrapped = Self::Backend(err);
        if wrapped.is_transient() {
            match wrapped {
                Self::Backend(e) => Self::Conflict(e.to_string()),
                other => other,
            }
        } else {
            wrapped
        }
    }

    /// Whether `err` is a uniqueness violation.
    #[must_use]
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

impl From<MetadataError> for StorageError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound { entity } => Self::NoSuchKey { key: entity },
            MetadataError::AlreadyExists { entity } => Self::InvalidArgument {
                message: format!("{entity} already exists"),
            },
            MetadataError::Conflict(msg) => Self::Internal(anyhow::anyhow!(
                "metadata conflict persisted after retries: {msg}"
            )),
            MetadataError::Backend(e) => Self::Internal(e.into()),
        }
    }
}
