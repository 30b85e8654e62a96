//! String-backed domain enums and the content-hash newtype.
//!
//! Enum values serialize to their canonical strings at the storage edge and
//! reject unknown strings on read, so a hand-edited metadata row cannot
//! smuggle an undefined state into the engine.

use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// SHA-256 content hash identifying a blob.
///
/// Always 32 bytes; displayed and stored as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hex rendering used for storage paths and metadata rows.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char hex string.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] when the input is not
    /// exactly 32 hex-encoded bytes.
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        let bytes = hex::decode(s).map_err(|_| StorageError::InvalidArgument {
            message: format!("invalid content hash: {s}"),
        })?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidArgument {
                message: format!("content hash must be 32 bytes: {s}"),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// VersioningState
// ---------------------------------------------------------------------------

/// Bucket versioning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersioningState {
    /// Versioning has never been enabled; PUT replaces in place.
    #[default]
    Disabled,
    /// Every PUT appends a new version; DELETE inserts a delete marker.
    Enabled,
    /// New PUTs occupy the null-version slot; existing versions remain.
    Suspended,
}

impl VersioningState {
    /// Canonical string stored in the metadata row.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for VersioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersioningState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Disabled" => Ok(Self::Disabled),
            "Enabled" => Ok(Self::Enabled),
            "Suspended" => Ok(Self::Suspended),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown versioning state: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// BucketAcl
// ---------------------------------------------------------------------------

/// Canned bucket (or per-object) ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketAcl {
    /// Only the owner may read or write.
    #[default]
    Private,
    /// Anonymous principals may read objects and listings.
    PublicRead,
    /// Anonymous principals may additionally write and delete.
    PublicReadWrite,
}

impl BucketAcl {
    /// Canonical string stored in the metadata row and used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
        }
    }
}

impl fmt::Display for BucketAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketAcl {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown canned ACL: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RuleStatus
// ---------------------------------------------------------------------------

/// Lifecycle rule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    /// The rule participates in expiration sweeps.
    Enabled,
    /// The rule is retained but skipped by sweeps.
    Disabled,
}

impl RuleStatus {
    /// Canonical string stored in the metadata row.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Enabled" => Ok(Self::Enabled),
            "Disabled" => Ok(Self::Disabled),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown rule status: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SseMode
// ---------------------------------------------------------------------------

/// Server-side-encryption choice recorded on a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SseMode {
    /// Stored as plaintext.
    #[default]
    None,
    /// SSE-S3: AES-256-GCM under a service-derived data key.
    Aes256,
}

impl SseMode {
    /// Canonical string; `AES256` matches the `x-amz-server-side-encryption`
    /// header value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Aes256 => "AES256",
        }
    }

    /// Whether bytes on disk are ciphertext.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Aes256)
    }
}

impl fmt::Display for SseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SseMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "AES256" => Ok(Self::Aes256),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown server-side-encryption mode: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// The identity a request acts as, as established by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// An unauthenticated request (public-ACL paths only).
    Anonymous,
    /// An authenticated user.
    User {
        /// The user's id in the metadata store.
        user_id: String,
        /// The access key the request was signed with.
        access_key_id: String,
    },
}

impl Principal {
    /// The user id, when authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { user_id, .. } => Some(user_id),
        }
    }

    /// Whether the request carries no identity.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_roundtrip_content_hash_hex() {
        let hash = ContentHash([0xAB; 32]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex).expect("parse"), hash);
    }

    #[test]
    fn test_should_reject_malformed_content_hash() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_should_roundtrip_versioning_state() {
        for state in [
            VersioningState::Disabled,
            VersioningState::Enabled,
            VersioningState::Suspended,
        ] {
            assert_eq!(state.as_str().parse::<VersioningState>().unwrap(), state);
        }
    }

    #[test]
    fn test_should_reject_unknown_versioning_state() {
        assert!("enabled".parse::<VersioningState>().is_err());
    }

    #[test]
    fn test_should_roundtrip_bucket_acl() {
        for acl in [
            BucketAcl::Private,
            BucketAcl::PublicRead,
            BucketAcl::PublicReadWrite,
        ] {
            assert_eq!(acl.as_str().parse::<BucketAcl>().unwrap(), acl);
        }
    }

    #[test]
    fn test_should_reject_unknown_acl() {
        assert!("authenticated-read".parse::<BucketAcl>().is_err());
    }

    #[test]
    fn test_should_roundtrip_sse_mode() {
        assert_eq!("AES256".parse::<SseMode>().unwrap(), SseMode::Aes256);
        assert_eq!("none".parse::<SseMode>().unwrap(), SseMode::None);
        assert!(SseMode::Aes256.is_encrypted());
        assert!(!SseMode::None.is_encrypted());
    }

    #[test]
    fn test_should_expose_principal_identity() {
        let p = Principal::User {
            user_id: "u1".to_owned(),
            access_key_id: "AKID".to_owned(),
        };
        assert_eq!(p.user_id(), Some("u1"));
        assert!(!p.is_anonymous());
        assert!(Principal::Anonymous.is_anonymous());
    }
}
