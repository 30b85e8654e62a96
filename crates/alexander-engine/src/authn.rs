//! Request authentication against the metadata store.
//!
//! Ties the transport-neutral SigV4 verifier to the `access_keys` table:
//! peek the access key ID, resolve its secret asynchronously, then verify
//! with a single-entry keyring. Requests without any auth material become
//! [`Principal::Anonymous`] and are left to ACL evaluation.

use chrono::Utc;

use alexander_auth::credentials::StaticKeyring;
use alexander_auth::presigned::{is_presigned, verify_presigned};
use alexander_auth::sigv4::{V4Verifier, VerifiedRequest, peek_access_key_id};
use alexander_core::types::Principal;
use alexander_core::{StorageError, StorageResult};
use alexander_metadata::{AccessKeyRepo, MetadataStore};
use tracing::debug;

/// Authenticates incoming requests for the engine.
#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    meta: MetadataStore,
    clock_skew_tolerance: std::time::Duration,
}

/// A verified identity plus the signature context a streaming upload needs
/// for its chunk chain.
#[derive(Debug)]
pub struct AuthenticatedRequest {
    /// The principal engine operations act as.
    pub principal: Principal,
    /// Verification detail; `None` for anonymous requests.
    pub verified: Option<VerifiedRequest>,
}

impl RequestAuthenticator {
    /// Build an authenticator over the metadata store.
    #[must_use]
    pub fn new(meta: MetadataStore, clock_skew_tolerance: std::time::Duration) -> Self {
        Self {
            meta,
            clock_skew_tolerance,
        }
    }

    /// Authenticate a request.
    ///
    /// `payload_hash` is the transport-computed `x-amz-content-sha256`
    /// value (ignored for presigned requests, which sign
    /// `UNSIGNED-PAYLOAD`).
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidAccessKeyId`] for unknown keys.
    /// - [`StorageError::RequestTimeTooSkewed`] outside the clock window.
    /// - [`StorageError::SignatureDoesNotMatch`] on mismatch.
    pub async fn authenticate(
        &self,
        parts: &http::request::Parts,
        payload_hash: &str,
    ) -> StorageResult<AuthenticatedRequest> {
        let Some(access_key_id) =
            peek_access_key_id(parts).map_err(StorageError::from)?
        else {
            debug!("request carries no auth material, treating as anonymous");
            return Ok(AuthenticatedRequest {
                principal: Principal::Anonymous,
                verified: None,
            });
        };

        let (user_id, secret_key) = self
            .meta
            .lookup_secret(&access_key_id)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::InvalidAccessKeyId {
                access_key_id: access_key_id.clone(),
            })?;

        let keyring = StaticKeyring::new(vec![(access_key_id.clone(), secret_key)]);
        let now = Utc::now();

        let verified = if is_presigned(parts) {
            verify_presigned(parts, &keyring, now).map_err(StorageError::from)?
        } else {
            let verifier = V4Verifier::new(&keyring, self.clock_skew_tolerance);
            verifier
                .verify(parts, payload_hash, now)
                .map_err(StorageError::from)?
        };

        debug!(access_key_id = %access_key_id, user_id = %user_id, "request authenticated");
        Ok(AuthenticatedRequest {
            principal: Principal::User {
                user_id,
                access_key_id,
            },
            verified: Some(verified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alexander_auth::sigv4::{derive_signing_key, hash_payload, sign, string_to_sign};
    use alexander_metadata::UserRepo;
    use sha2::{Digest, Sha256};

    const ACCESS_KEY: &str = "AKIDTEST";
    const SECRET_KEY: &str = "test-secret";

    async fn authenticator() -> (RequestAuthenticator, String) {
        let meta = MetadataStore::connect("sqlite::memory:")
            .await
            .expect("connect");
        let user = meta
            .create_user("tester", "tester@example.com")
            .await
            .expect("user");
        meta.create_access_key(&user.id, ACCESS_KEY, SECRET_KEY)
            .await
            .expect("key");
        (
            RequestAuthenticator::new(meta, std::time::Duration::from_secs(900)),
            user.id,
        )
    }

    /// Sign a GET request the way a client would, returning its parts.
    fn signed_request(secret: &str, now: chrono::DateTime<chrono::Utc>) -> http::request::Parts {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let empty_hash = hash_payload(b"");

        let canonical = alexander_auth::canonical::canonical_request(
            "GET",
            "/bucket/key.txt",
            "",
            &[
                ("host", "localhost:9600"),
                ("x-amz-content-sha256", &empty_hash),
                ("x-amz-date", &timestamp),
            ],
            &["host", "x-amz-content-sha256", "x-amz-date"],
            &empty_hash,
        );
        let scope = format!("{date}/us-east-1/s3/aws4_request");
        let sts = string_to_sign(
            &timestamp,
            &scope,
            &hex::encode(Sha256::digest(canonical.as_bytes())),
        );
        let signature = sign(&derive_signing_key(secret, &date, "us-east-1", "s3"), &sts);

        let auth = format!(
            "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope},\
             SignedHeaders=host;x-amz-content-sha256;x-amz-date,Signature={signature}"
        );
        let (parts, ()) = http::Request::builder()
            .method("GET")
            .uri("http://localhost:9600/bucket/key.txt")
            .header("host", "localhost:9600")
            .header("x-amz-content-sha256", &empty_hash)
            .header("x-amz-date", &timestamp)
            .header(http::header::AUTHORIZATION, auth)
            .body(())
            .expect("request")
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_should_authenticate_signed_request_to_user() {
        let (authn, user_id) = authenticator().await;
        let parts = signed_request(SECRET_KEY, Utc::now());

        let authed = authn
            .authenticate(&parts, &hash_payload(b""))
            .await
            .expect("authenticate");
        assert_eq!(authed.principal.user_id(), Some(user_id.as_str()));
        assert!(authed.verified.is_some());
    }

    #[tokio::test]
    async fn test_should_pass_anonymous_requests_through() {
        let (authn, _) = authenticator().await;
        let (parts, ()) = http::Request::builder()
            .method("GET")
            .uri("http://localhost:9600/public-bucket/key")
            .body(())
            .expect("request")
            .into_parts();

        let authed = authn
            .authenticate(&parts, &hash_payload(b""))
            .await
            .expect("authenticate");
        assert!(authed.principal.is_anonymous());
        assert!(authed.verified.is_none());
    }

    #[tokio::test]
    async fn test_should_reject_unknown_access_key() {
        let (authn, _) = authenticator().await;

        // Same request shape, signed with a credential the store has never
        // seen.
        let mut parts = signed_request(SECRET_KEY, Utc::now());
        let auth = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .replace(ACCESS_KEY, "AKIDUNKNOWN");
        parts
            .headers
            .insert(http::header::AUTHORIZATION, auth.parse().unwrap());

        let result = authn.authenticate(&parts, &hash_payload(b"")).await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidAccessKeyId { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_reject_wrong_secret() {
        let (authn, _) = authenticator().await;
        let parts = signed_request("wrong-secret", Utc::now());

        let result = authn.authenticate(&parts, &hash_payload(b"")).await;
        assert!(matches!(result, Err(StorageError::SignatureDoesNotMatch)));
    }

    #[tokio::test]
    async fn test_should_reject_skewed_clock() {
        let (authn, _) = authenticator().await;
        // Signed 20 minutes in the past.
        let parts = signed_request(SECRET_KEY, Utc::now() - chrono::Duration::minutes(20));

        let result = authn.authenticate(&parts, &hash_payload(b"")).await;
        assert!(matches!(result, Err(StorageError::RequestTimeTooSkewed)));
    }
}
