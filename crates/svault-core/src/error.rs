use thiserror::Error;

use crate::types::ShareStatus;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("ciphertext too short: {len} bytes (expected more than {min})")]
    TooShort { len: usize, min: usize },

    #[error("decryption failed at layer {suite}")]
    DecryptionFailed { suite: &'static str },

    #[error("unsupported cipher suite: {0}")]
    UnsupportedSuite(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unauthorized: invalid passphrase")]
    BadPassphrase,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("signature needs {needed} hex digits but placeholder holds {capacity}")]
    SignatureCapacity { needed: usize, capacity: usize },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cannot {action} a share grant in state {status}")]
    InvalidState {
        status: ShareStatus,
        action: &'static str,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl VaultError {
    /// Stable machine-readable code for callers mapping errors onto responses.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::TooShort { .. } => "TOO_SHORT",
            VaultError::DecryptionFailed { .. } => "DECRYPTION_FAILED",
            VaultError::UnsupportedSuite(_) => "UNSUPPORTED_SUITE",
            VaultError::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            VaultError::BadPassphrase => "BAD_PASSPHRASE",
            VaultError::Unauthorized(_) => "UNAUTHORIZED",
            VaultError::Configuration(_) => "CONFIGURATION_ERROR",
            VaultError::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            VaultError::SignatureCapacity { .. } => "SIGNATURE_CAPACITY",
            VaultError::Forbidden(_) => "FORBIDDEN",
            VaultError::InvalidState { .. } => "INVALID_STATE",
            VaultError::InvalidRequest(_) => "INVALID_REQUEST",
            VaultError::Crypto(_) => "CRYPTO_ERROR",
        }
    }

    /// True for failures the caller can act on (wrong passphrase, bad input,
    /// missing grant), false for deployment or system faults.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            VaultError::Configuration(_)
                | VaultError::SignatureCapacity { .. }
                | VaultError::Crypto(_)
        )
    }

    /// Both unlock failure variants; callers that only care about "could not
    /// open the private key" match on this.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, VaultError::BadPassphrase | VaultError::Unauthorized(_))
    }
}
