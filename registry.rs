//! User registry and per-user file ledger.
//!
//! [`UserRegistry`] stores usernames with Argon2id password hashes (PHC
//! strings) and the [`FileRecord`]s of each user's completed operations. The
//! whole store is a single JSON file, loaded once at open and rewritten
//! atomically (temp file + rename) on every change.
//!
//! Password hashing and verification run on blocking workers.

use anyhow::{bail, Context, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Version};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::kdf::KdfParams;
use crate::ledger::FileRecord;

/// A username that passed [`UserRegistry::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    password_hash: String,
    #[serde(default)]
    files: Vec<FileRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    users: BTreeMap<String, UserRecord>,
}

pub struct UserRegistry {
    path: PathBuf,
    params: KdfParams,
    state: Mutex<RegistryState>,
}

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Check that `username` is safe to use as a single path component:
/// ASCII letters, digits, `.`, `_` and `-` only, not starting with `.`.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        bail!("username cannot be empty");
    }
    if username.len() > MAX_USERNAME_LEN {
        bail!("username longer than {} bytes", MAX_USERNAME_LEN);
    }
    if username.starts_with('.') {
        bail!("username cannot start with '.'");
    }
    if !username
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        bail!("username may only contain letters, digits, '.', '_' and '-'");
    }
    Ok(())
}

fn hasher(params: KdfParams) -> Result<Argon2<'static>> {
    Ok(Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        params.to_argon2()?,
    ))
}

impl UserRegistry {
    /// Open the registry at `path`; a missing file is an empty registry.
    /// `params` sets the cost of newly created password hashes.
    pub async fn open(path: impl Into<PathBuf>, params: KdfParams) -> Result<Self> {
        let path = path.into();
        let exists = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking existence of {:?}", &path))?;
        let state = if exists {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading registry {:?}", &path))?;
            let state: RegistryState = serde_json::from_str(&content)
                .with_context(|| format!("parsing registry {:?}", &path))?;
            info!(path = %path.display(), users = state.users.len(), "registry loaded");
            state
        } else {
            debug!(path = %path.display(), "registry file missing, starting empty");
            RegistryState::default()
        };

        Ok(Self {
            path,
            params,
            state: Mutex::new(state),
        })
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.state.lock().await.users.contains_key(username)
    }

    /// Create an account. Fails if the username is not valid (see
    /// [`validate_username`]), the password is empty, or the username is taken.
    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;
        if password.is_empty() {
            bail!("password cannot be empty");
        }
        if self.contains(username).await {
            bail!("username already exists");
        }

        let argon2 = hasher(self.params)?;
        let password = Zeroizing::new(password.to_owned());
        let password_hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow::anyhow!("hashing password: {}", e))
        })
        .await??;

        let mut state = self.state.lock().await;
        // Re-check under the lock; another register may have won the race.
        if state.users.contains_key(username) {
            bail!("username already exists");
        }
        state.users.insert(
            username.to_string(),
            UserRecord {
                password_hash,
                files: Vec::new(),
            },
        );
        if let Err(e) = self.persist(&state).await {
            state.users.remove(username);
            return Err(e);
        }

        info!(user = username, "user registered");
        Ok(())
    }

    /// Check a username/password pair. Unknown users and wrong passwords
    /// produce the same error.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<UserIdentity> {
        let stored = self
            .state
            .lock()
            .await
            .users
            .get(username)
            .map(|record| record.password_hash.clone());

        let argon2 = hasher(self.params)?;
        let password = Zeroizing::new(password.to_owned());
        let verified = tokio::task::spawn_blocking(move || match stored {
            Some(stored) => match PasswordHash::new(&stored) {
                Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
                Err(_) => false,
            },
            None => {
                // Spend the same effort as a real check.
                let salt = SaltString::generate(&mut OsRng);
                let _ = argon2.hash_password(password.as_bytes(), &salt);
                false
            }
        })
        .await?;

        if !verified {
            warn!(user = username, "authentication failed");
            bail!("invalid credentials");
        }

        debug!(user = username, "user authenticated");
        Ok(UserIdentity(username.to_string()))
    }

    /// Append a ledger entry for an authenticated user.
    pub async fn record_file(&self, identity: &UserIdentity, record: FileRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = match state.users.get_mut(identity.as_str()) {
            Some(user) => user,
            None => bail!("unknown user {}", identity),
        };
        debug!(user = %identity, file = %record.name, operation = %record.operation, "recording file");
        user.files.push(record);
        if let Err(e) = self.persist(&state).await {
            // Memory must not hold entries the store does not.
            if let Some(user) = state.users.get_mut(identity.as_str()) {
                user.files.pop();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Ledger entries for `username`, oldest first. Unknown users have none.
    pub async fn files(&self, username: &str) -> Vec<FileRecord> {
        self.state
            .lock()
            .await
            .users
            .get(username)
            .map(|user| user.files.clone())
            .unwrap_or_default()
    }

    async fn persist(&self, state: &RegistryState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {:?}", &tmp))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {:?}", &self.path))?;
        Ok(())
    }
}
