//! SSE-S3 envelope encryption.
//!
//! Each encrypted blob gets its own data key, derived from the service
//! master key with HKDF-SHA256 using the blob's plaintext SHA-256 as the
//! salt. The on-disk layout is:
//!
//! ```text
//! [ 12-byte nonce | ciphertext | 16-byte GCM tag ]
//! ```
//!
//! The plaintext hash stays the dedup key, so identical content encrypts to
//! the same logical blob even though the sealed bytes differ per write.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use alexander_core::types::ContentHash;

use crate::error::BlobError;

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Domain-separation label for the data-key derivation.
const HKDF_INFO: &[u8] = b"alexander-sse-s3";

/// Derive the per-blob data key.
#[must_use]
pub fn derive_data_key(master_key: &[u8; 32], plaintext_hash: &ContentHash) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(&plaintext_hash.0), master_key);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("32-byte HKDF output is always valid");
    key
}

/// Encrypt `plaintext` into the sealed on-disk form.
///
/// # Errors
///
/// Returns [`BlobError::Corrupt`] when the cipher rejects the input, which
/// only happens for pathological plaintext sizes.
pub fn seal(
    master_key: &[u8; 32],
    plaintext_hash: &ContentHash,
    plaintext: &[u8],
) -> Result<Vec<u8>, BlobError> {
    let key = derive_data_key(master_key, plaintext_hash);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| BlobError::Corrupt {
            content_hash: plaintext_hash.to_hex(),
            detail: "encryption failed".to_owned(),
        })?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed blob back to plaintext.
///
/// # Errors
///
/// Returns [`BlobError::Corrupt`] when the frame is too short or the GCM
/// tag fails to authenticate; a failed tag means the stored bytes were
/// damaged or sealed under a different master key.
pub fn open(
    master_key: &[u8; 32],
    plaintext_hash: &ContentHash,
    sealed: &[u8],
) -> Result<Vec<u8>, BlobError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(BlobError::Corrupt {
            content_hash: plaintext_hash.to_hex(),
            detail: format!("sealed blob is only {} bytes", sealed.len()),
        });
    }

    let key = derive_data_key(master_key, plaintext_hash);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);

    cipher
        .decrypt(nonce, &sealed[NONCE_LEN..])
        .map_err(|_| BlobError::Corrupt {
            content_hash: plaintext_hash.to_hex(),
            detail: "authentication tag mismatch".to_owned(),
        })
}
