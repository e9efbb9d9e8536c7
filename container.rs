//! Encrypted container format.
//!
//! Pure structural packing and unpacking; no cryptographic work happens here.
//!
//! ## Layout
//!
//! ```text
//! [version:1][salt:S][nonce:N][ciphertext:variable][tag:T]
//! ```
//!
//! The ciphertext length is implied by the total length. S, N and T are fixed
//! per version:
//!
//! | version | payload          | S  | N  | T  |
//! |---------|------------------|----|----|----|
//! | 1       | raw              | 16 | 24 | 16 |
//! | 2       | gzip-compressed  | 16 | 24 | 16 |

use crate::cipher::{NONCE_LEN, TAG_LEN};
use crate::error::VaultError;
use crate::kdf::SALT_LEN;

/// Version byte for raw payload containers
pub const VERSION_V1: u8 = 1;

/// Version byte for gzip-compressed payload containers
pub const VERSION_V2_COMPRESSED: u8 = 2;

/// Recognized container versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2Compressed,
}

impl FormatVersion {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            VERSION_V1 => Some(Self::V1),
            VERSION_V2_COMPRESSED => Some(Self::V2Compressed),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::V1 => VERSION_V1,
            Self::V2Compressed => VERSION_V2_COMPRESSED,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Self::V2Compressed)
    }

    /// Field lengths for this version.
    pub fn layout(self) -> Layout {
        match self {
            Self::V1 | Self::V2Compressed => Layout {
                salt_len: SALT_LEN,
                nonce_len: NONCE_LEN,
                tag_len: TAG_LEN,
            },
        }
    }
}

/// Fixed field lengths of one container version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub salt_len: usize,
    pub nonce_len: usize,
    pub tag_len: usize,
}

impl Layout {
    /// Version byte + salt + nonce
    pub fn header_len(&self) -> usize {
        1 + self.salt_len + self.nonce_len
    }

    /// Smallest valid container: header + tag, empty ciphertext
    pub fn min_len(&self) -> usize {
        self.header_len() + self.tag_len
    }
}

/// A decoded container borrowing from the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container<'a> {
    pub version: FormatVersion,
    pub salt: &'a [u8],
    pub nonce: &'a [u8],
    pub ciphertext: &'a [u8],
    pub tag: &'a [u8],
}

/// Pack the fields into the versioned layout.
///
/// Fails with `InvalidInput` if salt, nonce or tag length does not match
/// the version's layout.
pub fn encode(
    version: FormatVersion,
    salt: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, VaultError> {
    let layout = version.layout();
    check_len("salt", salt, layout.salt_len)?;
    check_len("nonce", nonce, layout.nonce_len)?;
    check_len("tag", tag, layout.tag_len)?;

    let mut out = Vec::with_capacity(layout.min_len() + ciphertext.len());
    out.push(version.to_byte());
    out.extend_from_slice(salt);
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tag);
    Ok(out)
}

/// Split a container into its fields.
///
/// Fails with `MalformedContainer` if the input is empty, carries an unknown
/// version, or is shorter than that version's minimum length.
pub fn decode(bytes: &[u8]) -> Result<Container<'_>, VaultError> {
    let (&version_byte, rest) = bytes
        .split_first()
        .ok_or_else(|| VaultError::malformed("container is empty"))?;

    let version = FormatVersion::from_byte(version_byte).ok_or_else(|| {
        VaultError::malformed(format!("unsupported container version: {}", version_byte))
    })?;

    let layout = version.layout();
    if bytes.len() < layout.min_len() {
        return Err(VaultError::malformed(format!(
            "container is {} bytes, version {} needs at least {}",
            bytes.len(),
            version_byte,
            layout.min_len()
        )));
    }

    let (salt, rest) = rest.split_at(layout.salt_len);
    let (nonce, rest) = rest.split_at(layout.nonce_len);
    let (ciphertext, tag) = rest.split_at(rest.len() - layout.tag_len);

    Ok(Container {
        version,
        salt,
        nonce,
        ciphertext,
        tag,
    })
}

fn check_len(field: &str, value: &[u8], expected: usize) -> Result<(), VaultError> {
    if value.len() != expected {
        return Err(VaultError::invalid_input(format!(
            "{} must be {} bytes, got {}",
            field,
            expected,
            value.len()
        )));
    }
    Ok(())
}
