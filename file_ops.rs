//! Upload-level file operations.
//!
//! [`VaultFileOps`] is the glue between uploaded files and the encryption
//! core: it runs the engine on a blocking worker, writes results into the data
//! directory, and records completed operations in the user's ledger.
//!
//! ## Output naming
//!
//! - Encrypt: `<data_dir>/<user>/<file>.enc`
//! - Decrypt: `<data_dir>/<user>/<file>` with `.enc` stripped, or `.dec`
//!   appended when the upload had no `.enc` suffix
//!
//! Only the final component of a client-supplied file name is used, and the
//! user directory must be a valid username, so nothing is written outside
//! the user's own directory.
//!
//! An output is only kept once its ledger entry is recorded.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::VaultError;
use crate::ledger::{FileRecord, Operation};
use crate::registry::{validate_username, UserIdentity, UserRegistry};
use crate::vault::VaultEngine;

/// Extension appended to encrypted outputs
pub const ENCRYPTED_EXT: &str = ".enc";

/// Extension appended to decrypted outputs whose upload lacked [`ENCRYPTED_EXT`]
pub const DECRYPTED_EXT: &str = ".dec";

/// Final path component of a client file name.
fn base_name(file_name: &str) -> Result<String> {
    let name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| VaultError::invalid_input(format!("invalid file name {:?}", file_name)))?;
    Ok(name)
}

/// Name of the plaintext recovered from an uploaded container.
fn decrypted_name(name: &str) -> String {
    match name.strip_suffix(ENCRYPTED_EXT) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{}{}", name, DECRYPTED_EXT),
    }
}

pub struct VaultFileOps {
    engine: Arc<VaultEngine>,
    registry: Arc<UserRegistry>,
    data_dir: PathBuf,
}

impl VaultFileOps {
    pub fn new(
        engine: VaultEngine,
        registry: Arc<UserRegistry>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            registry,
            data_dir: data_dir.into(),
        }
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    /// The user's own output directory, created on demand.
    async fn user_dir(&self, identity: &UserIdentity) -> Result<PathBuf> {
        validate_username(identity.as_str())
            .map_err(|e| VaultError::invalid_input(format!("unusable identity: {}", e)))?;
        let dir = self.data_dir.join(identity.as_str());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {:?}", &dir))?;
        Ok(dir)
    }

    /// Write `data` to `path`, then record it; the file is removed again if
    /// the ledger cannot be updated.
    async fn write_and_record(
        &self,
        identity: &UserIdentity,
        path: &Path,
        data: &[u8],
        record: FileRecord,
    ) -> Result<()> {
        fs::write(path, data)
            .await
            .with_context(|| format!("writing {:?}", path))?;

        if let Err(e) = self.registry.record_file(identity, record).await {
            if let Err(remove_err) = fs::remove_file(path).await {
                warn!(path = %path.display(), error = %remove_err, "could not remove unrecorded output");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Encrypt an uploaded file for `identity`.
    ///
    /// A missing upload (`None`) is an invalid request; an empty one is a
    /// valid zero-length file. Returns the path of the written container.
    pub async fn encrypt_upload(
        &self,
        identity: &UserIdentity,
        file_name: &str,
        upload: Option<Vec<u8>>,
    ) -> Result<PathBuf> {
        let data = upload.ok_or_else(|| VaultError::invalid_input("no file uploaded"))?;
        let name = base_name(file_name)?;
        debug!(user = %identity, file = %name, size = data.len(), "encrypting upload");

        let engine = Arc::clone(&self.engine);
        let user = identity.as_str().to_owned();
        let container =
            tokio::task::spawn_blocking(move || engine.encrypt_file(&user, &data)).await??;

        let path = self
            .user_dir(identity)
            .await?
            .join(format!("{}{}", name, ENCRYPTED_EXT));
        self.write_and_record(
            identity,
            &path,
            &container,
            FileRecord::new(name.as_str(), Operation::Encrypted),
        )
        .await?;

        info!(user = %identity, file = %name, container_size = container.len(), "file encrypted successfully");
        Ok(path)
    }

    /// Decrypt an uploaded container for `identity`.
    ///
    /// On rejection nothing is written and nothing is recorded; the returned
    /// error wraps the [`VaultError`].
    pub async fn decrypt_upload(
        &self,
        identity: &UserIdentity,
        file_name: &str,
        upload: Option<Vec<u8>>,
    ) -> Result<PathBuf> {
        let data = upload.ok_or_else(|| VaultError::invalid_input("no file uploaded"))?;
        let name = base_name(file_name)?;
        debug!(user = %identity, file = %name, size = data.len(), "decrypting upload");

        let engine = Arc::clone(&self.engine);
        let user = identity.as_str().to_owned();
        let result = tokio::task::spawn_blocking(move || engine.decrypt_file(&user, &data)).await?;
        let plaintext = match result {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!(user = %identity, file = %name, error = %e, "decryption failed");
                return Err(e.into());
            }
        };

        let out_name = decrypted_name(&name);
        let path = self.user_dir(identity).await?.join(&out_name);
        self.write_and_record(
            identity,
            &path,
            &plaintext,
            FileRecord::new(out_name.as_str(), Operation::Decrypted),
        )
        .await?;

        info!(user = %identity, file = %out_name, size = plaintext.len(), "file decrypted successfully");
        Ok(path)
    }

    /// Ledger entries for `identity`.
    pub async fn list_files(&self, identity: &UserIdentity) -> Vec<FileRecord> {
        self.registry.files(identity.as_str()).await
    }
}
