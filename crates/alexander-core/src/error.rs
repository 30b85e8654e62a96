//! Domain error type shared by every engine crate.
//!
//! [`StorageError`] covers the error kinds the engine can surface. Each
//! variant knows the S3 error code string and HTTP status the external
//! transport should render, so the wire boundary never has to re-match on
//! error contents.
//!
//! # Usage
//!
//! ```
//! use alexander_core::error::StorageError;
//!
//! let err = StorageError::NoSuchBucket { bucket: "b1".to_owned() };
//! assert_eq!(err.s3_code(), "NoSuchBucket");
//! assert_eq!(err.http_status(), 404);
//! ```

/// Errors surfaced by the storage engine.
///
/// Recoverable conditions (transient metadata conflicts, temp-file retries)
/// are handled inside the owning component and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    // -----------------------------------------------------------------------
    // Not-found family
    // -----------------------------------------------------------------------
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket name that was not found.
        bucket: String,
    },

    /// The specified key does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified object version does not exist.
    #[error("The specified version does not exist: key={key}, version_id={version_id}")]
    NoSuchVersion {
        /// The key the version was requested for.
        key: String,
        /// The version ID that was not found.
        version_id: String,
    },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload ID that was not found.
        upload_id: String,
    },

    /// The lifecycle configuration does not exist.
    #[error("The lifecycle configuration does not exist")]
    NoSuchLifecycleConfiguration,

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------
    /// The requested bucket name is already taken.
    #[error("The requested bucket name is not available: {bucket}")]
    BucketAlreadyExists {
        /// The bucket name that already exists.
        bucket: String,
    },

    /// The bucket still contains objects and cannot be deleted.
    #[error("The bucket you tried to delete is not empty: {bucket}")]
    BucketNotEmpty {
        /// The bucket name that is not empty.
        bucket: String,
    },

    /// A precondition specified in the request was not met.
    #[error("At least one of the preconditions you specified did not hold")]
    PreconditionFailed,

    // -----------------------------------------------------------------------
    // Invalid arguments
    // -----------------------------------------------------------------------
    /// The bucket name violates the S3 naming rules.
    #[error("Invalid bucket name: {name}: {reason}")]
    InvalidBucketName {
        /// The rejected name.
        name: String,
        /// Which rule it broke.
        reason: String,
    },

    /// A request argument is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Multipart part numbers were not strictly increasing.
    #[error("The list of parts was not in ascending order")]
    InvalidPartOrder,

    /// A named part does not exist or its ETag does not match.
    #[error("One or more of the specified parts could not be found")]
    InvalidPart,

    /// A non-final multipart part is below the minimum size.
    #[error("Your proposed upload is smaller than the minimum allowed object size")]
    EntityTooSmall,

    /// A part or object exceeds the maximum size.
    #[error("Your proposed upload exceeds the maximum allowed object size")]
    EntityTooLarge,

    /// The requested byte range cannot be satisfied.
    #[error("The requested range is not satisfiable")]
    InvalidRange,

    /// The supplied content digest does not match the received body.
    #[error("The digest you specified did not match what we received")]
    BadDigest,

    // -----------------------------------------------------------------------
    // Authn / authz
    // -----------------------------------------------------------------------
    /// The principal is not allowed to perform the operation.
    #[error("Access Denied")]
    AccessDenied,

    /// The access key ID is not known to the service.
    #[error("The AWS access key ID you provided does not exist: {access_key_id}")]
    InvalidAccessKeyId {
        /// The unknown access key ID.
        access_key_id: String,
    },

    /// The request signature does not match the computed signature.
    #[error("The request signature we calculated does not match the signature you provided")]
    SignatureDoesNotMatch,

    /// The request timestamp is outside the accepted skew window.
    #[error("The difference between the request time and the server's time is too large")]
    RequestTimeTooSkewed,

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------
    /// The request did not complete within its deadline.
    #[error("Your socket connection to the server was not read from or written to within the timeout period")]
    RequestTimeout,

    // -----------------------------------------------------------------------
    // Data integrity
    // -----------------------------------------------------------------------
    /// A blob row exists but its file is missing or its content does not
    /// hash to the recorded value. Never masked as `NoSuchKey`.
    #[error("Stored content for {content_hash} is corrupt: {detail}")]
    Corrupt {
        /// Hex content hash of the damaged blob.
        content_hash: String,
        /// What disagreed.
        detail: String,
    },

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------
    /// Internal error with an opaque cause.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StorageError {
    /// The S3 error code string for the wire `<Error><Code>` element.
    #[must_use]
    pub fn s3_code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket { .. } => "NoSuchBucket",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchVersion { .. } => "NoSuchVersion",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::NoSuchLifecycleConfiguration => "NoSuchLifecycleConfiguration",
            Self::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            Self::BucketNotEmpty { .. } => "BucketNotEmpty",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidPart => "InvalidPart",
            Self::EntityTooSmall => "EntityTooSmall",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::InvalidRange => "InvalidRange",
            Self::BadDigest => "BadDigest",
            Self::AccessDenied => "AccessDenied",
            Self::InvalidAccessKeyId { .. } => "InvalidAccessKeyId",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::RequestTimeout => "RequestTimeout",
            Self::Corrupt { .. } | Self::Internal(_) => "InternalError",
        }
    }

    /// The HTTP status the external transport should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoSuchBucket { .. }
            | Self::NoSuchKey { .. }
            | Self::NoSuchVersion { .. }
            | Self::NoSuchUpload { .. }
            | Self::NoSuchLifecycleConfiguration => 404,
            Self::BucketAlreadyExists { .. } | Self::BucketNotEmpty { .. } => 409,
            Self::PreconditionFailed => 412,
            Self::InvalidBucketName { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidPartOrder
            | Self::InvalidPart
            | Self::EntityTooSmall
            | Self::EntityTooLarge
            | Self::BadDigest => 400,
            Self::InvalidRange => 416,
            Self::AccessDenied
            | Self::InvalidAccessKeyId { .. }
            | Self::SignatureDoesNotMatch
            | Self::RequestTimeTooSkewed => 403,
            Self::RequestTimeout => 408,
            Self::Corrupt { .. } | Self::Internal(_) => 500,
        }
    }

    /// Whether this error is the corruption signal that must be logged and
    /// counted rather than masked.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Convenience result type for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_not_found_errors_to_404() {
        let err = StorageError::NoSuchBucket {
            bucket: "b".to_owned(),
        };
        assert_eq!(err.s3_code(), "NoSuchBucket");
        assert_eq!(err.http_status(), 404);

        let err = StorageError::NoSuchKey {
            key: "k".to_owned(),
        };
        assert_eq!(err.s3_code(), "NoSuchKey");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_should_map_auth_errors_to_403() {
        assert_eq!(StorageError::AccessDenied.http_status(), 403);
        assert_eq!(StorageError::SignatureDoesNotMatch.http_status(), 403);
        assert_eq!(StorageError::RequestTimeTooSkewed.http_status(), 403);
        assert_eq!(
            StorageError::InvalidAccessKeyId {
                access_key_id: "AKID".to_owned()
            }
            .http_status(),
            403
        );
    }

    #[test]
    fn test_should_map_range_error_to_416() {
        assert_eq!(StorageError::InvalidRange.http_status(), 416);
    }

    #[test]
    fn test_should_not_mask_corruption_as_not_found() {
        let err = StorageError::Corrupt {
            content_hash: "ab".repeat(32),
            detail: "file missing".to_owned(),
        };
        assert!(err.is_corrupt());
        assert_eq!(err.s3_code(), "InternalError");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_should_wrap_internal_errors() {
        let err = StorageError::Internal(anyhow::anyhow!("disk full"));
        assert_eq!(err.s3_code(), "InternalError");
        assert_eq!(err.http_status(), 500);
    }
}
