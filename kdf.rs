//! Key derivation from a user identity using Argon2id.
//!
//! This module provides [`Kdf`], which turns a user identity and a per-file
//! [`Salt`] into a [`SymmetricKey`].
//!
//! ## Key Source
//!
//! The identity bytes are the Argon2 password. A username alone has little
//! entropy, so the service may also supply a *pepper*: random bytes kept
//! outside the data directory and fed to Argon2 as its secret input. An
//! attacker holding containers but not the pepper cannot brute-force keys
//! offline.
//!
//! ## Security Features
//!
//! - Keys and the pepper are zeroized on drop
//! - Salts come from `OsRng`; a failing random source is an error, never a fallback
//! - Key material is never logged

use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::error::VaultError;

/// Length of derived keys in bytes (256-bit).
pub const KEY_LEN: usize = 32;

/// Length of the per-file salt in bytes.
pub const SALT_LEN: usize = 16;

/// Fill `buf` from the OS random source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), VaultError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| VaultError::randomness(e.to_string()))
}

/// Symmetric key living only for one encrypt/decrypt call.
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::invalid_input(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Random salt, regenerated for every encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn generate() -> Result<Self, VaultError> {
        let mut salt = [0u8; SALT_LEN];
        fill_random(&mut salt)?;
        Ok(Self(salt))
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

/// Argon2id cost parameters.
///
/// Containers do not record these, so changing them (or the pepper) makes
/// every previously produced container undecryptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost_kib: u32,
    /// Number of passes
    pub time_cost: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP's recommended Argon2id baseline (19 MiB, 2 passes, 1 lane).
    fn default() -> Self {
        Self {
            memory_cost_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(memory_cost_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost_kib,
            time_cost,
            parallelism,
        }
    }

    pub(crate) fn to_argon2(self) -> Result<Params, VaultError> {
        Params::new(
            self.memory_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::invalid_input(format!("invalid KDF parameters: {}", e)))
    }

    /// Check the parameters against Argon2's limits.
    pub fn validate(&self) -> Result<(), VaultError> {
        self.to_argon2().map(|_| ())
    }
}

/// Identity-based key derivation.
#[derive(Clone, Default)]
pub struct Kdf {
    params: KdfParams,
    pepper: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for Kdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kdf")
            .field("params", &self.params)
            .field("pepper", &self.pepper.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Kdf {
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            pepper: None,
        }
    }

    /// Mix a service-held secret into every derivation.
    pub fn with_pepper(mut self, pepper: &[u8]) -> Self {
        self.pepper = Some(Zeroizing::new(pepper.to_vec()));
        self
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Derive the key for `identity` under `salt`.
    ///
    /// Deterministic: the same identity, salt and configuration always yield
    /// the same key, which is what lets decryption re-derive it from the salt
    /// stored in a container.
    ///
    /// # Errors
    /// - `InvalidInput` if `identity` is empty, `salt` is not [`SALT_LEN`]
    ///   bytes, `out_len` is not [`KEY_LEN`], or the parameters are invalid
    pub fn derive_key(
        &self,
        identity: &str,
        salt: &[u8],
        out_len: usize,
    ) -> Result<SymmetricKey, VaultError> {
        if identity.is_empty() {
            return Err(VaultError::invalid_input("identity cannot be empty"));
        }
        if salt.len() != SALT_LEN {
            return Err(VaultError::invalid_input(format!(
                "salt must be {} bytes, got {}",
                SALT_LEN,
                salt.len()
            )));
        }
        if out_len != KEY_LEN {
            return Err(VaultError::invalid_input(format!(
                "key length must be {}, got {}",
                KEY_LEN, out_len
            )));
        }

        let params = self.params.to_argon2()?;
        let argon2 = match &self.pepper {
            Some(pepper) => {
                Argon2::new_with_secret(pepper, Algorithm::Argon2id, Version::V0x13, params)
                    .map_err(|e| VaultError::invalid_input(format!("invalid pepper: {}", e)))?
            }
            None => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        };

        // Derive straight into the key so no unscrubbed copy is left behind.
        let mut key = SymmetricKey::from_bytes([0u8; KEY_LEN]);
        argon2
            .hash_password_into(identity.as_bytes(), salt, &mut key.bytes)
            .map_err(|e| VaultError::invalid_input(format!("key derivation failed: {}", e)))?;

        Ok(key)
    }
}
