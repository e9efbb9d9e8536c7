//! Service-held pepper for key derivation.
//!
//! The pepper is 32 random bytes stored in a file readable only by the
//! service owner. It is mixed into every Argon2 derivation (see
//! [`crate::kdf::Kdf::with_pepper`]); losing it makes every container
//! produced with it unrecoverable.
//!
//! - Zeroized on drop
//! - Created with Unix permissions 0600, never overwritten
//! - Generated from `OsRng`

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::kdf::fill_random;

/// Pepper length in bytes.
pub const PEPPER_LEN: usize = 32;

pub struct Pepper {
    bytes: [u8; PEPPER_LEN],
}

impl Drop for Pepper {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Pepper {
    /// Load the pepper at `path`, generating it first if the file is missing.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if fs::try_exists(path)
            .await
            .with_context(|| format!("checking existence of {}", path.display()))?
        {
            info!(path = %path.display(), "loading pepper");
            let mut data = fs::read(path)
                .await
                .with_context(|| format!("reading pepper from {}", path.display()))?;
            if data.len() != PEPPER_LEN {
                let found = data.len();
                data.zeroize();
                warn!(path = %path.display(), found_bytes = found, "invalid pepper size");
                bail!(
                    "expected {}-byte pepper at {} but found {} bytes",
                    PEPPER_LEN,
                    path.display(),
                    found
                );
            }
            let mut bytes = [0u8; PEPPER_LEN];
            bytes.copy_from_slice(&data);
            data.zeroize();
            return Ok(Self { bytes });
        }

        info!(path = %path.display(), "generating new pepper");
        let mut pepper = Self {
            bytes: [0u8; PEPPER_LEN],
        };
        fill_random(&mut pepper.bytes)?;

        #[cfg(unix)]
        {
            let path_buf = path.to_path_buf();
            let mut bytes = pepper.bytes;
            tokio::task::spawn_blocking(move || {
                use std::fs::OpenOptions;
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;

                let result = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(&path_buf)
                    .and_then(|mut f| f.write_all(&bytes));
                bytes.zeroize();
                result.with_context(|| format!("writing pepper to {}", path_buf.display()))
            })
            .await??;
        }
        #[cfg(not(unix))]
        {
            fs::write(path, &pepper.bytes)
                .await
                .with_context(|| format!("writing pepper to {}", path.display()))?;
        }

        Ok(pepper)
    }

    pub fn as_bytes(&self) -> &[u8; PEPPER_LEN] {
        &self.bytes
    }
}
