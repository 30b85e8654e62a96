//! Shared helpers: id generation, range parsing, ETag matching,
//! continuation tokens, digest conversions.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use rand::Rng;
use uuid::Uuid;

use alexander_core::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// ID generation
// ---------------------------------------------------------------------------

/// Generate an opaque multipart upload id (64 hex chars).
#[must_use]
pub fn generate_upload_id() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill(&mut buf);
    hex::encode(buf)
}

/// Generate a request id for error envelopes (UUID v4 without dashes).
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ---------------------------------------------------------------------------
// Range header parsing
// ---------------------------------------------------------------------------

/// Parse an HTTP `Range` header value into an inclusive byte range.
///
/// Supported forms: `bytes=a-b`, `bytes=a-`, `bytes=-n`. The end is clamped
/// to the content length.
///
/// # Errors
///
/// Returns [`StorageError::InvalidRange`] for malformed or unsatisfiable
/// ranges.
pub fn parse_range(range: &str, content_length: u64) -> StorageResult<(u64, u64)> {
    let spec = range
        .strip_prefix("bytes=")
        .ok_or(StorageError::InvalidRange)?;

    if content_length == 0 {
        return Err(StorageError::InvalidRange);
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        // bytes=-n: the last n bytes.
        let n: u64 = suffix.parse().map_err(|_| StorageError::InvalidRange)?;
        if n == 0 || n > content_length {
            return Err(StorageError::InvalidRange);
        }
        Ok((content_length - n, content_length - 1))
    } else if let Some(prefix) = spec.strip_suffix('-') {
        // bytes=a-: from a to the end.
        let start: u64 = prefix.parse().map_err(|_| StorageError::InvalidRange)?;
        if start >= content_length {
            return Err(StorageError::InvalidRange);
        }
        Ok((start, content_length - 1))
    } else {
        let (a, b) = spec.split_once('-').ok_or(StorageError::InvalidRange)?;
        let start: u64 = a.parse().map_err(|_| StorageError::InvalidRange)?;
        let end: u64 = b.parse().map_err(|_| StorageError::InvalidRange)?;
        if start > end || start >= content_length {
            return Err(StorageError::InvalidRange);
        }
        Ok((start, end.min(content_length - 1)))
    }
}

// ---------------------------------------------------------------------------
// ETag helpers
// ---------------------------------------------------------------------------

/// Strip surrounding double quotes from an ETag.
#[must_use]
pub fn normalize_etag(etag: &str) -> &str {
    etag.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(etag)
}

/// `If-Match` test: `*` matches anything.
#[must_use]
pub fn if_match_holds(etag: &str, condition: &str) -> bool {
    condition == "*" || normalize_etag(etag) == normalize_etag(condition)
}

/// `If-None-Match` test: returns `true` when the object should be served.
#[must_use]
pub fn if_none_match_holds(etag: &str, condition: &str) -> bool {
    condition != "*" && normalize_etag(etag) != normalize_etag(condition)
}

// ---------------------------------------------------------------------------
// Continuation tokens
// ---------------------------------------------------------------------------

/// Encode a listing resume point as an opaque token.
#[must_use]
pub fn encode_continuation_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a continuation token back to its resume point.
///
/// # Errors
///
/// Returns [`StorageError::InvalidArgument`] for tokens this service never
/// produced.
pub fn decode_continuation_token(token: &str) -> StorageResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StorageError::InvalidArgument {
            message: "invalid continuation token".to_owned(),
        })?;
    String::from_utf8(bytes).map_err(|_| StorageError::InvalidArgument {
        message: "continuation token is not valid UTF-8".to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Digest conversions
// ---------------------------------------------------------------------------

/// Convert a `Content-MD5` header value (base64 of the raw digest) to the
/// hex form the blob layer compares against.
///
/// # Errors
///
/// Returns [`StorageError::InvalidArgument`] when the value is not a
/// base64-encoded 16-byte digest.
pub fn content_md5_to_hex(content_md5: &str) -> StorageResult<String> {
    let bytes = BASE64_STANDARD
        .decode(content_md5)
        .map_err(|_| StorageError::InvalidArgument {
            message: "Content-MD5 is not valid base64".to_owned(),
        })?;
    if bytes.len() != 16 {
        return Err(StorageError::InvalidArgument {
            message: "Content-MD5 must decode to 16 bytes".to_owned(),
        });
    }
    Ok(hex::encode(bytes))
}

/// Compute the multipart composite ETag: `hex(md5(part-md5 bytes)) - count`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPart`] when a part ETag is not hex.
pub fn composite_etag(part_md5_hexes: &[String]) -> StorageResult<String> {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    for part in part_md5_hexes {
        let bytes = hex::decode(normalize_etag(part)).map_err(|_| StorageError::InvalidPart)?;
        hasher.update(&bytes);
    }
    Ok(format!(
        "{}-{}",
        hex::encode(hasher.finalize()),
        part_md5_hexes.len()
    ))
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Validate an object key: non-empty, at most 1024 bytes.
///
/// # Errors
///
/// Returns [`StorageError::InvalidArgument`] for invalid keys.
pub fn validate_object_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidArgument {
            message: "object key must not be empty".to_owned(),
        });
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StorageError::InvalidArgument {
            message: format!("object key exceeds {MAX_KEY_BYTES} bytes"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_bounded_range() {
        assert_eq!(parse_range("bytes=0-499", 1000).unwrap(), (0, 499));
    }

    #[test]
    fn test_should_parse_open_ended_range() {
        assert_eq!(parse_range("bytes=500-", 1000).unwrap(), (500, 999));
    }

    #[test]
    fn test_should_parse_suffix_range() {
        assert_eq!(parse_range("bytes=-200", 1000).unwrap(), (800, 999));
    }

    #[test]
    fn test_should_clamp_range_end() {
        assert_eq!(parse_range("bytes=0-99999", 100).unwrap(), (0, 99));
    }

    #[test]
    fn test_should_reject_bad_ranges() {
        assert!(parse_range("0-10", 100).is_err());
        assert!(parse_range("bytes=50-10", 100).is_err());
        assert!(parse_range("bytes=100-", 100).is_err());
        assert!(parse_range("bytes=-0", 100).is_err());
        assert!(parse_range("bytes=-500", 100).is_err());
        assert!(parse_range("bytes=0-0", 0).is_err());
    }

    #[test]
    fn test_should_match_etags_with_and_without_quotes() {
        assert!(if_match_holds("\"abc\"", "abc"));
        assert!(if_match_holds("abc", "\"abc\""));
        assert!(if_match_holds("abc", "*"));
        assert!(!if_match_holds("abc", "xyz"));

        assert!(if_none_match_holds("abc", "xyz"));
        assert!(!if_none_match_holds("abc", "\"abc\""));
        assert!(!if_none_match_holds("abc", "*"));
    }

    #[test]
    fn test_should_roundtrip_continuation_token() {
        let token = encode_continuation_token("photos/2024/a.jpg");
        assert_eq!(decode_continuation_token(&token).unwrap(), "photos/2024/a.jpg");
    }

    #[test]
    fn test_should_reject_foreign_continuation_token() {
        assert!(decode_continuation_token("!!!").is_err());
    }

    #[test]
    fn test_should_convert_content_md5_header() {
        // base64(md5("hello")) -> hex
        let b64 = {
            use base64::Engine as _;
            use md5::{Digest, Md5};
            BASE64_STANDARD.encode(Md5::digest(b"hello"))
        };
        assert_eq!(
            content_md5_to_hex(&b64).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_should_reject_malformed_content_md5() {
        assert!(content_md5_to_hex("not-base64!!!").is_err());
        assert!(content_md5_to_hex(&BASE64_STANDARD.encode(b"short")).is_err());
    }

    #[test]
    fn test_should_compute_composite_etag_with_part_count() {
        let parts = vec![
            "5d41402abc4b2a76b9719d911017c592".to_owned(),
            "7d793037a0760186574b0282f2f435e7".to_owned(),
        ];
        let etag = composite_etag(&parts).unwrap();
        assert!(etag.ends_with("-2"));
        let digest_part = etag.split('-').next().unwrap();
        assert_eq!(digest_part.len(), 32);
    }

    #[test]
    fn test_should_validate_object_keys() {
        assert!(validate_object_key("a.txt").is_ok());
        assert!(validate_object_key("path/to/深い/key").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn test_should_generate_opaque_ids() {
        let upload = generate_upload_id();
        assert_eq!(upload.len(), 64);
        assert!(upload.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(generate_upload_id(), upload);
        assert_eq!(generate_request_id().len(), 32);
    }
}
