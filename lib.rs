//! # SecureVault - Per-User File Encryption
//!
//! SecureVault encrypts uploaded files under a key derived from the owner's
//! identity and recovers them later, rejecting tampered or wrong-user
//! ciphertext.
//!
//! ## Features
//!
//! - **Argon2id**: Memory-hard key derivation from the user identity, with an
//!   optional service-held pepper
//! - **XChaCha20-Poly1305**: Authenticated encryption over the whole header
//! - **Versioned containers**: Fixed-offset layout, dispatch on the version byte
//! - **Compression**: Optional gzip before encryption (version 2)
//! - **Fail closed**: Wrong identity and tampering are indistinguishable
//!
//! ## Quick Start
//!
//! ```no_run
//! use securevault::{kdf::{Kdf, KdfParams}, vault::VaultEngine};
//!
//! fn main() -> Result<(), securevault::VaultError> {
//!     let engine = VaultEngine::new(Kdf::new(KdfParams::default()));
//!
//!     let container = engine.encrypt_file("alice", b"hello vault")?;
//!     let plaintext = engine.decrypt_file("alice", &container)?;
//!     assert_eq!(plaintext, b"hello vault");
//!     Ok(())
//! }
//! ```
//!
//! ## Container Format
//!
//! `[version:1][salt:16][nonce:24][ciphertext][tag:16]`, see [`container`].

pub mod cipher;
pub mod config;
pub mod container;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod ledger;
pub mod pepper;
pub mod registry;
pub mod vault;

// Re-export common types for convenience
pub use error::VaultError;
pub use vault::VaultEngine;
