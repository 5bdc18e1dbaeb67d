//! Argon2id key derivation for password → master key.

use {argon2::Argon2, zeroize::Zeroizing};

use crate::error::VaultError;

/// Salt length in bytes. Persisted alongside encrypted data, so it must
/// never change for an existing vault outside of key rotation.
pub const SALT_LEN: usize = 16;

/// Argon2id parameters used for master-key derivation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 64 MiB = 65536).
    pub m_cost: u32,
    /// Number of iterations (default: 3).
    pub t_cost: u32,
    /// Degree of parallelism (default: 4).
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 4,
        }
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Deliberately expensive (tens to hundreds of ms with default params);
/// this is the first layer of brute-force defense, before rate limiting.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let argon2_params = argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| VaultError::Kdf(format!("invalid KDF params: {e}")))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, output.as_mut())
        .map_err(|e| VaultError::Kdf(format!("derivation failed: {e}")))?;

    Ok(output)
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;

    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Encode a salt as base64 for storage in config / metadata files.
pub fn encode_salt(salt: &[u8; SALT_LEN]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(salt)
}

/// Decode a base64-encoded salt, validating its length.
pub fn decode_salt(b64: &str) -> Result<[u8; SALT_LEN], VaultError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(VaultError::Base64)?;
    let salt: [u8; SALT_LEN] = bytes
        .try_into()
        .map_err(|_| VaultError::Kdf(format!("salt must be {SALT_LEN} bytes")))?;
    Ok(salt)
}
