//! Authentication failure modes.

/// Errors produced while verifying a SigV4-signed request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither an `Authorization` header nor presigned query parameters
    /// were present.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header could not be parsed.
    #[error("Invalid Authorization header format")]
    MalformedAuthHeader,

    /// Only `AWS4-HMAC-SHA256` is supported.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The `Credential` component does not have the
    /// `AKID/date/region/service/aws4_request` shape.
    #[error("Invalid credential scope format")]
    MalformedCredential,

    /// A header named in `SignedHeaders` is absent from the request.
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// A required presigned-URL query parameter is absent.
    #[error("Missing required query parameter: {0}")]
    MissingQueryParam(String),

    /// The `x-amz-date` / `X-Amz-Date` value is not an ISO 8601 basic
    /// timestamp.
    #[error("Malformed request timestamp: {0}")]
    MalformedTimestamp(String),

    /// The access key ID is not known to the credential provider.
    #[error("Access key not found: {0}")]
    UnknownAccessKey(String),

    /// The request timestamp is outside the accepted skew window.
    #[error("Request time differs from server time by more than the allowed skew")]
    RequestTimeTooSkewed,

    /// The presigned URL is past `X-Amz-Date` + `X-Amz-Expires`.
    #[error("Request has expired")]
    RequestExpired,

    /// The computed signature does not match the provided one.
    #[error("Signature does not match")]
    SignatureMismatch,

    /// A streaming chunk did not carry a well-formed signature frame.
    #[error("Malformed streaming chunk")]
    MalformedChunk,
}

impl From<AuthError> for alexander_core::StorageError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownAccessKey(access_key_id) => {
                Self::InvalidAccessKeyId { access_key_id }
            }
            AuthError::RequestTimeTooSkewed => Self::RequestTimeTooSkewed,
            AuthError::RequestExpired => Self::AccessDenied,
            AuthError::SignatureMismatch => Self::SignatureDoesNotMatch,
            AuthError::MissingAuthHeader => Self::AccessDenied,
            other => Self::InvalidArgument {
                message: other.to_string(),
            },
        }
    }
}
