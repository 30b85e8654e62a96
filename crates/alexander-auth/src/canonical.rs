//! Canonical request construction.
//!
//! SigV4 signs a normalized rendering of the request:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Normalization must be byte-identical to what the client computed or the
//! signatures diverge, so the rules here are deliberately conservative:
//! path segments are decoded once and re-encoded with the AWS unreserved
//! set, and query values are kept exactly as they appeared on the wire
//! (clients disagree about encoding `:` and `*`, and the server must sign
//! whatever the client signed).

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters that stay raw in URI path segments: the RFC 3986 unreserved
/// set. Everything else is percent-encoded; slashes are handled per-segment.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Assemble the canonical request string.
///
/// `headers` carries the raw request headers; only those named in
/// `signed_headers` participate.
#[must_use]
pub fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{}\n{}\n{}\n\n{}\n{payload_hash}",
        canonical_uri(path),
        canonical_query(query),
        canonical_headers(headers, signed_headers),
        signed_header_list(signed_headers),
    )
}

/// Canonicalize the URI path: decode once, re-encode each segment with the
/// unreserved set, preserve `/` separators, normalize empty to `/`.
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            utf8_percent_encode(&decoded, PATH_ENCODE_SET).to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonicalize the query string: split on `&`, sort by key then value,
/// keep the wire encoding of every key and value untouched.
#[must_use]
pub fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();
    params.sort_unstable();

    let mut out = String::with_capacity(query.len());
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Render the signed headers, lowercased and sorted, values trimmed with
/// runs of whitespace collapsed to one space. No trailing newline; the
/// canonical request supplies the blank-line separator.
#[must_use]
pub fn canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let mut by_name: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.to_lowercase();
        let value = collapse_whitespace(value.trim());
        by_name
            .entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let mut sorted: Vec<&str> = signed_headers.to_vec();
    sorted.sort_unstable();

    sorted
        .iter()
        .filter_map(|name| by_name.get(*name).map(|value| format!("{name}:{value}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The `SignedHeaders` component: lowercase names, sorted, `;`-joined.
#[must_use]
pub fn signed_header_list(signed_headers: &[&str]) -> String {
    let mut sorted: Vec<&str> = signed_headers.to_vec();
    sorted.sort_unstable();
    sorted.join(";")
}

/// Rejoin the whitespace-separated words of a header value with single
/// spaces, as the canonical-headers rule requires.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_should_normalize_empty_path_to_slash() {
        assert_eq!(canonical_uri(""), "/");
        assert_eq!(canonical_uri("/"), "/");
    }

    #[test]
    fn test_should_encode_path_without_double_encoding() {
        assert_eq!(canonical_uri("/hello world"), "/hello%20world");
        assert_eq!(canonical_uri("/hello%20world"), "/hello%20world");
    }

    #[test]
    fn test_should_sort_query_parameters_by_key_then_value() {
        assert_eq!(canonical_query("b=2&a=1&c=3"), "a=1&b=2&c=3");
        assert_eq!(canonical_query("k=2&k=1"), "k=1&k=2");
    }

    #[test]
    fn test_should_keep_query_values_exactly_as_sent() {
        assert_eq!(
            canonical_query("events=s3%3AObjectCreated%3A%2A&prefix=p"),
            "events=s3%3AObjectCreated%3A%2A&prefix=p"
        );
        assert_eq!(
            canonical_query("events=s3:ObjectCreated:*&prefix=p"),
            "events=s3:ObjectCreated:*&prefix=p"
        );
    }

    #[test]
    fn test_should_handle_valueless_query_parameters() {
        assert_eq!(canonical_query("acl"), "acl=");
        assert_eq!(canonical_query("versioning&prefix=a"), "prefix=a&versioning=");
    }

    #[test]
    fn test_should_lowercase_sort_and_trim_headers() {
        let headers = [("Host", "  example.com "), ("X-Custom", "a   b  c")];
        let signed = ["host", "x-custom"];
        assert_eq!(
            canonical_headers(&headers, &signed),
            "host:example.com\nx-custom:a b c"
        );
    }

    #[test]
    fn test_should_build_signed_header_list_sorted() {
        assert_eq!(
            signed_header_list(&["x-amz-date", "host", "range"]),
            "host;range;x-amz-date"
        );
    }

    #[test]
    fn test_should_match_aws_get_object_test_vector() {
        let empty_hash = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let headers = [
            ("host", "examplebucket.s3.amazonaws.com"),
            ("range", "bytes=0-9"),
            ("x-amz-content-sha256", empty_hash),
            ("x-amz-date", "20130524T000000Z"),
        ];
        let signed = ["host", "range", "x-amz-content-sha256", "x-amz-date"];

        let canonical =
            canonical_request("GET", "/test.txt", "", &headers, &signed, empty_hash);

        let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(
            hash,
            "7344ae5b7ee6c3e7e6b0fe0640412a37625d1fbfff95c48bbb2dc43964946972"
        );
    }
}
