//! Vault error types.

use std::time::Duration;

/// Errors produced by master-key operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The vault is locked or the cached key has expired.
    #[error("vault is locked")]
    Locked,

    /// `lock()` was called while already locked.
    #[error("vault is already locked")]
    AlreadyLocked,

    /// A salt or key was requested before the first unlock.
    #[error("vault is not initialized")]
    NotInitialized,

    /// The supplied password is below the minimum length.
    #[error("password too short (minimum {min} characters)")]
    PasswordTooShort { min: usize },

    /// The supplied password does not match.
    #[error("invalid password")]
    InvalidPassword,

    /// Too many failed attempts; try again after `retry_after`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Key derivation failed.
    #[error("kdf error: {0}")]
    Kdf(String),

    /// Base64 decoding of a persisted salt failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
