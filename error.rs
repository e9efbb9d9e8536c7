use thiserror::Error;

/// Errors produced by the encryption core.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed call arguments (empty identity, wrong salt/nonce/key length)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Container too short, truncated, or carrying an unknown version
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Tag verification failed. Carries no detail: a wrong identity and a
    /// tampered container must look the same to the caller.
    #[error("Authentication failed")]
    Authentication,

    /// The OS random source could not be read
    #[error("Random source unavailable: {0}")]
    Randomness(String),

    /// Payload compression failed while encrypting
    #[error("Compression error: {0}")]
    Compression(String),
}

impl VaultError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }

    pub fn randomness(msg: impl Into<String>) -> Self {
        Self::Randomness(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    /// True for the outcomes a decrypt caller reports as "failure" rather
    /// than as an internal fault.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::MalformedContainer(_) | Self::Authentication)
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MalformedContainer(_) => "cannot process file",
            Self::Authentication => "decryption failed",
            Self::InvalidInput(_) => "invalid request",
            Self::Randomness(_) | Self::Compression(_) => "internal error",
        }
    }
}
