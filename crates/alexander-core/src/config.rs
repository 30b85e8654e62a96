//! Service configuration.
//!
//! All configuration is driven by `ALEXANDER_*` environment variables with
//! sensible defaults for local development. Durations are accepted as
//! integer seconds in the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Minimum size of every multipart part except the last (5 MiB).
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum size of a single multipart part (5 GiB).
pub const DEFAULT_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in a multipart upload.
pub const DEFAULT_MAX_PARTS: u32 = 10_000;

/// Global configuration for an Alexander Storage node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlexanderConfig {
    /// Root directory for blob data and temp files.
    pub data_root: PathBuf,
    /// Metadata store DSN (e.g. `sqlite://alexander.db` or `sqlite::memory:`).
    pub metadata_dsn: String,
    /// Bind address handed to the external HTTP transport.
    pub listen_addr: String,
    /// 32-byte master key (hex-encoded in the environment) for SSE-S3
    /// data-key derivation. Never serialized.
    #[serde(skip)]
    pub master_key: [u8; 32],
    /// How long a zero-ref blob must stay unreferenced before GC may
    /// collect it.
    pub orphan_grace: Duration,
    /// Interval between orphan-blob sweeps.
    pub gc_interval: Duration,
    /// Interval between lifecycle-expiration sweeps.
    pub lifecycle_interval: Duration,
    /// Age after which an abandoned multipart session is aborted.
    pub multipart_timeout: Duration,
    /// Maximum size of a single part.
    pub max_part_size: u64,
    /// Minimum size of every part but the last.
    pub min_part_size: u64,
    /// Maximum part count per upload.
    pub max_parts: u32,
    /// Accepted clock skew between client `x-amz-date` and server time.
    pub clock_skew_tolerance: Duration,
}

impl Default for AlexanderConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/alexander"),
            metadata_dsn: "sqlite://alexander.db".to_owned(),
            listen_addr: "0.0.0.0:9600".to_owned(),
            master_key: [0u8; 32],
            orphan_grace: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(600),
            lifecycle_interval: Duration::from_secs(3600),
            multipart_timeout: Duration::from_secs(7 * 24 * 3600),
            max_part_size: DEFAULT_MAX_PART_SIZE,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
            clock_skew_tolerance: Duration::from_secs(15 * 60),
        }
    }
}

impl AlexanderConfig {
    /// Load configuration from `ALEXANDER_*` environment variables.
    ///
    /// Unset variables keep their defaults. `ALEXANDER_AUTH_MASTER_KEY`
    /// must decode to exactly 32 bytes of hex when present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] when a variable is present
    /// but malformed.
    pub fn from_env() -> StorageResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ALEXANDER_DATA_ROOT") {
            config.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ALEXANDER_METADATA_DSN") {
            config.metadata_dsn = v;
        }
        if let Ok(v) = std::env::var("ALEXANDER_LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ALEXANDER_AUTH_MASTER_KEY") {
            config.master_key = parse_master_key(&v)?;
        }
        if let Some(v) = duration_var("ALEXANDER_ORPHAN_GRACE_SECS")? {
            config.orphan_grace = v;
        }
        if let Some(v) = duration_var("ALEXANDER_GC_INTERVAL_SECS")? {
            config.gc_interval = v;
        }
        if let Some(v) = duration_var("ALEXANDER_LIFECYCLE_INTERVAL_SECS")? {
            config.lifecycle_interval = v;
        }
        if let Some(v) = duration_var("ALEXANDER_MULTIPART_TIMEOUT_SECS")? {
            config.multipart_timeout = v;
        }
        if let Some(v) = duration_var("ALEXANDER_CLOCK_SKEW_TOLERANCE_SECS")? {
            config.clock_skew_tolerance = v;
        }

        Ok(config)
    }
}

/// Decode a 64-char hex string into the 32-byte master key.
fn parse_master_key(hex_key: &str) -> StorageResult<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| StorageError::InvalidArgument {
        message: "master key must be hex-encoded".to_owned(),
    })?;
    bytes
        .try_into()
        .map_err(|_| StorageError::InvalidArgument {
            message: "master key must be exactly 32 bytes".to_owned(),
        })
}

/// Read an integer-seconds environment variable as a [`Duration`].
fn duration_var(name: &str) -> StorageResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(v) => {
            let secs: u64 = v.parse().map_err(|_| StorageError::InvalidArgument {
                message: format!("{name} must be an integer number of seconds"),
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_create_default_config() {
        let config = AlexanderConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:9600");
        assert_eq!(config.orphan_grace, Duration::from_secs(3600));
        assert_eq!(config.gc_interval, Duration::from_secs(600));
        assert_eq!(config.multipart_timeout, Duration::from_secs(604_800));
        assert_eq!(config.min_part_size, 5 * 1024 * 1024);
        assert_eq!(config.max_parts, 10_000);
    }

    #[test]
    fn test_should_parse_master_key_from_hex() {
        let key = parse_master_key(&"ab".repeat(32)).expect("valid key");
        assert_eq!(key, [0xAB; 32]);
    }

    #[test]
    fn test_should_reject_short_master_key() {
        assert!(parse_master_key("abcd").is_err());
    }

    #[test]
    fn test_should_reject_non_hex_master_key() {
        assert!(parse_master_key(&"zz".repeat(32)).is_err());
    }
}
