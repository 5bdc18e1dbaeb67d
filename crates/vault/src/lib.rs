//! Password-derived master-key management for the skiff vault.
//!
//! A 256-bit master key is derived from the vault password via Argon2id
//! and cached in memory with a TTL. Failed unlock attempts pay an
//! exponential-backoff lockout. The key bytes are zeroed on lock,
//! rotation, and drop. Audit logging is the caller's responsibility
//! (see `skiff-audit`) so it cannot be bypassed by a failed derivation.

pub mod clock;
pub mod error;
pub mod kdf;
pub mod manager;

pub use {
    clock::{Clock, ManualClock, SystemClock},
    error::VaultError,
    kdf::{KdfParams, SALT_LEN, decode_salt, encode_salt},
    manager::{KeyStatus, MIN_PASSWORD_LEN, MasterKeyManager, lockout_delay},
};
