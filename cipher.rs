//! Authenticated encryption with XChaCha20-Poly1305.
//!
//! [`seal`] and [`open`] work in detached mode: the 16-byte Poly1305 tag is
//! returned separately from the ciphertext so the container codec can place
//! it at a fixed offset.
//!
//! `open` fails closed. On a tag mismatch the working buffer is scrubbed and
//! only [`VaultError::Authentication`] is returned.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use zeroize::Zeroize;

use crate::error::VaultError;
use crate::kdf::{fill_random, SymmetricKey};

/// Nonce size for XChaCha20-Poly1305 (24 bytes)
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag size (16 bytes)
pub const TAG_LEN: usize = 16;

/// Random per-encryption nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub fn generate() -> Result<Self, VaultError> {
        let mut nonce = [0u8; NONCE_LEN];
        fill_random(&mut nonce)?;
        Ok(Self(nonce))
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        let bytes: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| {
            VaultError::invalid_input(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

fn make_cipher(key: &SymmetricKey) -> XChaCha20Poly1305 {
    // The cipher scrubs its own key copy on drop.
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext`, authenticating it together with `associated_data`.
///
/// Returns the ciphertext (same length as the plaintext) and the tag.
pub fn seal(
    key: &SymmetricKey,
    nonce: &Nonce,
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), VaultError> {
    let cipher = make_cipher(key);
    let mut buffer = plaintext.to_vec();

    let tag = match cipher.encrypt_in_place_detached(
        XNonce::from_slice(nonce.as_bytes()),
        associated_data,
        &mut buffer,
    ) {
        Ok(tag) => tag,
        Err(_) => {
            // Only reachable for payloads beyond the cipher's length limit.
            buffer.zeroize();
            return Err(VaultError::invalid_input("plaintext too large for cipher"));
        }
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Verify and decrypt `ciphertext`.
///
/// # Errors
/// - `InvalidInput` if `tag` is not [`TAG_LEN`] bytes (checked before any
///   cryptographic work)
/// - `Authentication` on any tag mismatch; no plaintext is released
pub fn open(
    key: &SymmetricKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    tag: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, VaultError> {
    if tag.len() != TAG_LEN {
        return Err(VaultError::invalid_input(format!(
            "tag must be {} bytes, got {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let cipher = make_cipher(key);
    let mut buffer = ciphertext.to_vec();

    let verified = cipher.decrypt_in_place_detached(
        XNonce::from_slice(nonce.as_bytes()),
        associated_data,
        &mut buffer,
        Tag::from_slice(tag),
    );
    if verified.is_err() {
        buffer.zeroize();
        return Err(VaultError::Authentication);
    }

    Ok(buffer)
}
