//! Per-user file encryption engine.
//!
//! [`VaultEngine`] orchestrates one encrypt or decrypt call: fresh salt and
//! nonce, key derivation, AEAD, container packing. It holds no per-call state,
//! so a single engine can be shared across threads.
//!
//! Argon2 is deliberately slow. Async callers should run these methods on a
//! blocking worker (see [`crate::file_ops`]).

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cipher::{self, Nonce};
use crate::container::{self, FormatVersion};
use crate::error::VaultError;
use crate::kdf::{Kdf, Salt, KEY_LEN};

/// Associated data: `version || salt || nonce || BLAKE2b-256(identity)`.
///
/// Binds every header byte and the identity into the tag.
fn associated_data(version: FormatVersion, salt: &[u8], nonce: &[u8], identity: &str) -> Vec<u8> {
    let digest = Blake2b::<U32>::digest(identity.as_bytes());

    let mut aad = Vec::with_capacity(1 + salt.len() + nonce.len() + digest.len());
    aad.push(version.to_byte());
    aad.extend_from_slice(salt);
    aad.extend_from_slice(nonce);
    aad.extend_from_slice(&digest);
    aad
}

fn compress(data: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| VaultError::compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| VaultError::compression(e.to_string()))?;
    Ok(Zeroizing::new(compressed))
}

/// Default cap on the inflated size of a compressed payload (256 MiB).
pub const DEFAULT_MAX_INFLATED: usize = 256 * 1024 * 1024;

/// Inflate at most `limit` bytes; anything larger is rejected.
fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, VaultError> {
    let mut out = Zeroizing::new(Vec::<u8>::new());
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| VaultError::malformed(format!("compressed payload is corrupt: {}", e)))?;
    if out.len() > limit {
        return Err(VaultError::malformed(format!(
            "compressed payload inflates past {} bytes",
            limit
        )));
    }
    Ok(std::mem::take(&mut *out))
}

#[derive(Debug, Clone)]
pub struct VaultEngine {
    kdf: Kdf,
    compress: bool,
    max_inflated: usize,
}

impl Default for VaultEngine {
    fn default() -> Self {
        Self::new(Kdf::default())
    }
}

impl VaultEngine {
    pub fn new(kdf: Kdf) -> Self {
        Self {
            kdf,
            compress: false,
            max_inflated: DEFAULT_MAX_INFLATED,
        }
    }

    /// Compress payloads before encryption (version 2 containers).
    /// Decryption follows the container's version either way.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Largest plaintext a compressed container may inflate to. Compressed
    /// encryption refuses plaintexts above it.
    pub fn with_max_inflated(mut self, limit: usize) -> Self {
        self.max_inflated = limit;
        self
    }

    pub fn kdf(&self) -> &Kdf {
        &self.kdf
    }

    /// Encrypt `plaintext` for `identity` and return the container bytes.
    ///
    /// An empty plaintext is a valid zero-length file.
    pub fn encrypt_file(&self, identity: &str, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let version = if self.compress {
            FormatVersion::V2Compressed
        } else {
            FormatVersion::V1
        };
        debug!(version = version.to_byte(), size = plaintext.len(), "encrypting payload");

        if version.is_compressed() && plaintext.len() > self.max_inflated {
            return Err(VaultError::invalid_input(format!(
                "plaintext of {} bytes exceeds the {} byte limit for compressed containers",
                plaintext.len(),
                self.max_inflated
            )));
        }

        let compressed;
        let payload: &[u8] = if version.is_compressed() {
            compressed = compress(plaintext)?;
            &compressed[..]
        } else {
            plaintext
        };

        let salt = Salt::generate()?;
        let nonce = Nonce::generate()?;
        let key = self.kdf.derive_key(identity, salt.as_bytes(), KEY_LEN)?;

        let aad = associated_data(version, salt.as_bytes(), nonce.as_bytes(), identity);
        let (ciphertext, tag) = cipher::seal(&key, &nonce, payload, &aad)?;
        drop(key);

        let out = container::encode(version, salt.as_bytes(), nonce.as_bytes(), &ciphertext, &tag)?;
        debug!(
            version = version.to_byte(),
            plaintext_size = plaintext.len(),
            container_size = out.len(),
            "payload encrypted"
        );
        Ok(out)
    }

    /// Recover the plaintext of `container` for `identity`.
    ///
    /// # Errors
    /// - `MalformedContainer` if the container is truncated or has an
    ///   unknown version
    /// - `Authentication` if the identity is wrong or any byte was altered
    /// - `MalformedContainer` if a compressed payload is corrupt or inflates
    ///   past the engine's limit
    pub fn decrypt_file(&self, identity: &str, container: &[u8]) -> Result<Vec<u8>, VaultError> {
        let parsed = container::decode(container).map_err(|e| {
            warn!(error = %e, "rejecting container");
            e
        })?;
        debug!(
            version = parsed.version.to_byte(),
            container_size = container.len(),
            "decrypting container"
        );

        let nonce = Nonce::from_slice(parsed.nonce)?;
        let key = self.kdf.derive_key(identity, parsed.salt, KEY_LEN)?;
        let aad = associated_data(parsed.version, parsed.salt, parsed.nonce, identity);

        let payload = match cipher::open(&key, &nonce, parsed.ciphertext, parsed.tag, &aad) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("container failed authentication");
                return Err(e);
            }
        };
        drop(key);

        if parsed.version.is_compressed() {
            let payload = Zeroizing::new(payload);
            decompress(&payload, self.max_inflated).map_err(|e| {
                warn!(error = %e, "rejecting compressed payload");
                e
            })
        } else {
            Ok(payload)
        }
    }

    /// Boolean-success form of [`decrypt_file`](Self::decrypt_file): any
    /// failure yields `None`.
    pub fn try_decrypt(&self, identity: &str, container: &[u8]) -> Option<Vec<u8>> {
        self.decrypt_file(identity, container).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{NONCE_LEN, TAG_LEN};
    use crate::kdf::{KdfParams, SALT_LEN};
    use proptest::prelude::*;

    fn engine() -> VaultEngine {
        VaultEngine::new(Kdf::new(KdfParams::new(64, 1, 1)))
    }

    #[test]
    fn test_hello_vault_scenario() {
        let engine = engine();
        let container = engine.encrypt_file("alice", b"hello vault").unwrap();

        assert_eq!(container.len(), 1 + SALT_LEN + NONCE_LEN + 11 + TAG_LEN);
        assert_eq!(container[0], container::VERSION_V1);
        assert_eq!(engine.decrypt_file("alice", &container).unwrap(), b"hello vault");
        assert!(matches!(
            engine.decrypt_file("bob", &container),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let engine = engine();
        let container = engine.encrypt_file("alice", b"").unwrap();

        assert_eq!(container.len(), FormatVersion::V1.layout().min_len());
        assert!(engine.decrypt_file("alice", &container).unwrap().is_empty());
    }

    #[test]
    fn test_multi_megabyte_roundtrip() {
        let engine = engine();
        let plaintext: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

        let container = engine.encrypt_file("alice", &plaintext).unwrap();
        assert_eq!(engine.decrypt_file("alice", &container).unwrap(), plaintext);
    }

    #[test]
    fn test_compressed_roundtrip() {
        let engine = engine().with_compression(true);
        let plaintext = vec![b'a'; 64 * 1024];

        let container = engine.encrypt_file("alice", &plaintext).unwrap();
        assert_eq!(container[0], container::VERSION_V2_COMPRESSED);
        assert!(container.len() < plaintext.len());

        // Version dispatch does not depend on the engine's own setting.
        let plain_engine = self::engine();
        assert_eq!(plain_engine.decrypt_file("alice", &container).unwrap(), plaintext);
        assert!(matches!(
            plain_engine.decrypt_file("bob", &container),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_inflation_limit_enforced() {
        let producer = engine().with_compression(true).with_max_inflated(4096);
        let plaintext = vec![0u8; 4096];

        // Exactly at the limit is fine.
        let container = producer.encrypt_file("alice", &plaintext).unwrap();
        assert!(container.len() < 200);
        assert_eq!(producer.decrypt_file("alice", &container).unwrap(), plaintext);

        // A tiny authentic container must not inflate past the reader's cap.
        let reader = engine().with_max_inflated(1024);
        let err = reader.decrypt_file("alice", &container).unwrap_err();
        assert!(matches!(err, VaultError::MalformedContainer(_)));
        assert!(reader.try_decrypt("alice", &container).is_none());

        // Compressed output that could not be read back is refused up front.
        assert!(matches!(
            producer.encrypt_file("alice", &vec![0u8; 4097]),
            Err(VaultError::InvalidInput(_))
        ));
        // The limit only concerns compressed containers.
        assert!(engine()
            .with_max_inflated(16)
            .encrypt_file("alice", &plaintext)
            .is_ok());
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let engine = engine();
        let c1 = engine.encrypt_file("alice", b"same").unwrap();
        let c2 = engine.encrypt_file("alice", b"same").unwrap();

        assert_ne!(c1, c2);
        assert_ne!(&c1[1..1 + SALT_LEN], &c2[1..1 + SALT_LEN]);
    }

    #[test]
    fn test_every_bit_flip_rejected() {
        let engine = engine();
        let container = engine.encrypt_file("alice", b"tamper").unwrap();

        for byte in 0..container.len() {
            for bit in 0..8 {
                let mut tampered = container.clone();
                tampered[byte] ^= 1 << bit;
                let err = engine.decrypt_file("alice", &tampered).unwrap_err();
                assert!(err.is_rejection(), "byte {} bit {}: {:?}", byte, bit, err);
            }
        }
    }

    #[test]
    fn test_version_swap_rejected() {
        let engine = engine();
        let mut container = engine.encrypt_file("alice", b"payload").unwrap();
        container[0] = container::VERSION_V2_COMPRESSED;

        assert!(matches!(
            engine.decrypt_file("alice", &container),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_truncated_container_rejected() {
        let engine = engine();
        let container = engine.encrypt_file("alice", b"payload").unwrap();
        let min = FormatVersion::V1.layout().min_len();

        assert!(matches!(
            engine.decrypt_file("alice", &container[..min - 1]),
            Err(VaultError::MalformedContainer(_))
        ));
        assert!(matches!(
            engine.decrypt_file("alice", &[]),
            Err(VaultError::MalformedContainer(_))
        ));
        // Long enough to parse, but the tag no longer lines up.
        assert!(matches!(
            engine.decrypt_file("alice", &container[..container.len() - 1]),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_empty_identity_is_invalid_input() {
        let engine = engine();
        assert!(matches!(
            engine.encrypt_file("", b"data"),
            Err(VaultError::InvalidInput(_))
        ));

        let container = engine.encrypt_file("alice", b"data").unwrap();
        assert!(matches!(
            engine.decrypt_file("", &container),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pepper_mismatch_rejected() {
        let params = KdfParams::new(64, 1, 1);
        let peppered = VaultEngine::new(Kdf::new(params).with_pepper(&[1u8; 32]));
        let container = peppered.encrypt_file("alice", b"data").unwrap();

        let other = VaultEngine::new(Kdf::new(params).with_pepper(&[2u8; 32]));
        assert!(other.try_decrypt("alice", &container).is_none());
        assert_eq!(peppered.try_decrypt("alice", &container).unwrap(), b"data");
    }

    #[test]
    fn test_parallel_engines_share_nothing() {
        let engine = engine();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let engine = &engine;
                    scope.spawn(move || {
                        let identity = format!("user{}", i);
                        let plaintext = format!("file for {}", identity).into_bytes();
                        let container = engine.encrypt_file(&identity, &plaintext).unwrap();
                        assert_eq!(engine.decrypt_file(&identity, &container).unwrap(), plaintext);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip(identity in "[a-z]{1,12}", plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let engine = engine();
            let container = engine.encrypt_file(&identity, &plaintext).unwrap();
            prop_assert_eq!(engine.decrypt_file(&identity, &container).unwrap(), plaintext);
        }

        #[test]
        fn prop_wrong_identity_rejected(
            u1 in "[a-z]{1,8}",
            u2 in "[a-z]{1,8}",
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        ) {
            prop_assume!(u1 != u2);
            let engine = engine();
            let container = engine.encrypt_file(&u1, &plaintext).unwrap();
            prop_assert!(matches!(
                engine.decrypt_file(&u2, &container),
                Err(VaultError::Authentication)
            ));
        }
    }
}
