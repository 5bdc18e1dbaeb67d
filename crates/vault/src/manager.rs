//! Master-key state machine: unlock/lock, TTL caching, rotation, and
//! brute-force rate limiting.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    subtle::ConstantTimeEq,
    tokio::sync::RwLock,
    zeroize::Zeroizing,
};

use crate::{
    clock::{Clock, SystemClock},
    error::VaultError,
    kdf::{self, KdfParams, SALT_LEN},
};

/// Minimum accepted password length. Shorter passwords count as a failed
/// attempt so length probing pays the same backoff as a wrong password.
pub const MIN_PASSWORD_LEN: usize = 12;

/// Default cached-key lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Exponential backoff cap for failed unlock attempts.
const MAX_LOCKOUT: Duration = Duration::from_secs(5 * 60);

/// Lockout delay after `failed_attempts` consecutive failures:
/// `min(2^(n-1) seconds, 5 minutes)`. Pure so it is trivially testable.
pub fn lockout_delay(failed_attempts: u32) -> Duration {
    if failed_attempts == 0 {
        return Duration::ZERO;
    }
    let secs = 1u64
        .checked_shl(failed_attempts - 1)
        .unwrap_or(u64::from(u32::MAX));
    Duration::from_secs(secs).min(MAX_LOCKOUT)
}

/// The currently cached derived key.
struct CachedKey {
    key: Zeroizing<[u8; 32]>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ManagerState {
    salt: Option<[u8; SALT_LEN]>,
    cached: Option<CachedKey>,
    locked: bool,
    failed_attempts: u32,
    last_attempt: Option<DateTime<Utc>>,
    lockout_until: Option<DateTime<Utc>>,
}

impl ManagerState {
    /// Whether a usable (present and unexpired) key is cached.
    fn key_usable(&self, now: DateTime<Utc>) -> bool {
        !self.locked
            && self
                .cached
                .as_ref()
                .is_some_and(|cached| now <= cached.expires_at)
    }
}

/// Snapshot of the manager's state, for status endpoints and UIs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyStatus {
    pub locked: bool,
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_secs: Option<u64>,
    pub locked_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Password-derived master-key manager.
///
/// One instance per vault, owned by the vault service and shared by
/// handle. Derivation is CPU-bound (tens to hundreds of ms with default
/// KDF params); callers on latency-sensitive paths should wrap
/// [`unlock`](Self::unlock) / [`rotate_key`](Self::rotate_key) in
/// `spawn_blocking`.
///
/// The manager never writes to the audit trail itself; the caller must
/// record every outcome, including failures, through its audit logger.
pub struct MasterKeyManager {
    state: RwLock<ManagerState>,
    params: KdfParams,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for MasterKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeyManager {
    /// Create a manager with default KDF params, a 15-minute key TTL,
    /// and the system clock.
    pub fn new() -> Self {
        Self::with_config(KdfParams::default(), DEFAULT_TTL, Arc::new(SystemClock))
    }

    /// Create a manager with explicit configuration.
    pub fn with_config(params: KdfParams, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                locked: true,
                ..ManagerState::default()
            }),
            params,
            ttl,
            clock,
        }
    }

    /// Derive and cache the master key from `password`.
    ///
    /// On first unlock a fresh random salt is generated; afterwards the
    /// existing salt is reused so re-derivation is idempotent and
    /// previously-encrypted data stays decryptable. While a valid key is
    /// cached, a mismatching password fails with
    /// [`VaultError::InvalidPassword`] and counts as a failed attempt.
    pub async fn unlock(&self, password: &str) -> Result<(), VaultError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if let Some(until) = state.lockout_until
            && now < until
        {
            let retry_after = (until - now).to_std().unwrap_or_default();
            return Err(VaultError::RateLimited { retry_after });
        }

        if password.len() < MIN_PASSWORD_LEN {
            Self::record_failure(&mut state, now);
            return Err(VaultError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            });
        }

        let salt = match state.salt {
            Some(salt) => salt,
            None => {
                let salt = kdf::generate_salt();
                state.salt = Some(salt);
                salt
            },
        };

        let key = kdf::derive_key(password.as_bytes(), &salt, &self.params)?;

        // Re-unlock while a valid key is cached doubles as authentication:
        // the derived bytes must match the cached ones.
        if state.key_usable(now)
            && let Some(cached) = state.cached.as_ref()
            && cached.key[..].ct_eq(&key[..]).unwrap_u8() == 0
        {
            Self::record_failure(&mut state, now);
            return Err(VaultError::InvalidPassword);
        }

        let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        state.cached = Some(CachedKey {
            key,
            created_at: now,
            expires_at,
        });
        state.locked = false;
        state.failed_attempts = 0;
        state.lockout_until = None;
        state.last_attempt = Some(now);

        #[cfg(feature = "tracing")]
        tracing::info!("vault unlocked");

        Ok(())
    }

    /// Zero and discard the cached key.
    pub async fn lock(&self) -> Result<(), VaultError> {
        let mut state = self.state.write().await;
        if state.locked {
            return Err(VaultError::AlreadyLocked);
        }

        // Dropping the Zeroizing buffer wipes the key bytes in place.
        state.cached = None;
        state.locked = true;

        #[cfg(feature = "tracing")]
        tracing::info!("vault locked");

        Ok(())
    }

    /// Whether the vault is locked. An expired cached key reports as
    /// locked even if `lock()` was never called.
    pub async fn is_locked(&self) -> bool {
        let now = self.clock.now();
        !self.state.read().await.key_usable(now)
    }

    /// Return a copy of the cached master key.
    ///
    /// The returned buffer is caller-owned and zeroed on drop; it never
    /// aliases the manager's internal buffer.
    pub async fn get_key(&self) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        let now = self.clock.now();
        let state = self.state.read().await;
        if !state.key_usable(now) {
            return Err(VaultError::Locked);
        }
        let cached = state.cached.as_ref().ok_or(VaultError::Locked)?;
        Ok(Zeroizing::new(*cached.key))
    }

    /// Rotate to a new password: authenticate with `old_password` via the
    /// unlock path (inheriting its rate limiting), then install a fresh
    /// salt and key. The previous key is zeroed.
    pub async fn rotate_key(&self, old_password: &str, new_password: &str) -> Result<(), VaultError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(VaultError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            });
        }

        self.unlock(old_password).await?;

        let now = self.clock.now();
        let new_salt = kdf::generate_salt();
        let key = kdf::derive_key(new_password.as_bytes(), &new_salt, &self.params)?;

        let mut state = self.state.write().await;
        let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        state.salt = Some(new_salt);
        // Replacing the cached key drops (and zeroes) the old one.
        state.cached = Some(CachedKey {
            key,
            created_at: now,
            expires_at,
        });
        state.locked = false;

        #[cfg(feature = "tracing")]
        tracing::info!("master key rotated");

        Ok(())
    }

    /// Re-derive with the current salt and compare against the cached key
    /// in constant time. Returns `false` when no salt or key is cached.
    ///
    /// Intended for confirmation UIs; never mutates rate-limit state and
    /// must not be used to gate access.
    pub async fn verify_password(&self, password: &str) -> bool {
        let state = self.state.read().await;
        let (Some(salt), Some(cached)) = (state.salt, state.cached.as_ref()) else {
            return false;
        };
        let Ok(derived) = kdf::derive_key(password.as_bytes(), &salt, &self.params) else {
            return false;
        };
        cached.key[..].ct_eq(&derived[..]).unwrap_u8() == 1
    }

    /// Snapshot the manager state for status endpoints.
    pub async fn status(&self) -> KeyStatus {
        let now = self.clock.now();
        let state = self.state.read().await;

        let usable = state.key_usable(now);
        let (key_created_at, key_expires_at, time_remaining_secs) = match state.cached.as_ref() {
            Some(cached) if usable => (
                Some(cached.created_at),
                Some(cached.expires_at),
                Some((cached.expires_at - now).num_seconds().max(0) as u64),
            ),
            _ => (None, None, None),
        };

        let lockout_remaining_secs = state
            .lockout_until
            .filter(|until| now < *until)
            .map(|until| (until - now).num_seconds().max(0) as u64);

        KeyStatus {
            locked: !usable,
            failed_attempts: state.failed_attempts,
            key_created_at,
            key_expires_at,
            time_remaining_secs,
            locked_out: lockout_remaining_secs.is_some(),
            lockout_remaining_secs,
            last_attempt: state.last_attempt,
        }
    }

    /// The current salt, for the caller to persist alongside encrypted
    /// secrets.
    pub async fn salt(&self) -> Result<[u8; SALT_LEN], VaultError> {
        self.state
            .read()
            .await
            .salt
            .ok_or(VaultError::NotInitialized)
    }

    /// Install a previously-persisted salt. Call before the first unlock
    /// of an existing vault.
    pub async fn set_salt(&self, salt: [u8; SALT_LEN]) {
        self.state.write().await.salt = Some(salt);
    }

    fn record_failure(state: &mut ManagerState, now: DateTime<Utc>) {
        state.failed_attempts += 1;
        state.last_attempt = Some(now);
        let delay = lockout_delay(state.failed_attempts);
        state.lockout_until =
            Some(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX));

        #[cfg(feature = "tracing")]
        tracing::warn!(
            failed_attempts = state.failed_attempts,
            lockout_secs = delay.as_secs(),
            "failed unlock attempt"
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::clock::ManualClock};

    const GOOD: &str = "correct-horse-battery";
    const OTHER: &str = "tr0ub4dor-and-three";

    fn test_manager() -> (Arc<ManualClock>, MasterKeyManager) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let params = KdfParams {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        };
        let mgr = MasterKeyManager::with_config(params, Duration::from_secs(900), clock.clone());
        (clock, mgr)
    }

    #[tokio::test]
    async fn unlock_and_get_key() {
        let (_clock, mgr) = test_manager();
        assert!(mgr.is_locked().await);

        mgr.unlock(GOOD).await.unwrap();
        assert!(!mgr.is_locked().await);
        assert_eq!(mgr.get_key().await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn reunlock_yields_identical_key() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();
        let key1 = mgr.get_key().await.unwrap();

        mgr.unlock(GOOD).await.unwrap();
        let key2 = mgr.get_key().await.unwrap();
        assert_eq!(*key1, *key2);
    }

    #[tokio::test]
    async fn get_key_returns_copy() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        let mut copy = mgr.get_key().await.unwrap();
        copy[0] ^= 0xFF;

        // Mutating the copy must not affect the manager's buffer.
        let fresh = mgr.get_key().await.unwrap();
        assert_ne!(copy[0], fresh[0]);
        assert!(mgr.verify_password(GOOD).await);
    }

    #[tokio::test]
    async fn lock_clears_key() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        mgr.lock().await.unwrap();
        assert!(mgr.is_locked().await);
        assert!(matches!(mgr.get_key().await, Err(VaultError::Locked)));
    }

    #[tokio::test]
    async fn double_lock_fails() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();
        mgr.lock().await.unwrap();
        assert!(matches!(mgr.lock().await, Err(VaultError::AlreadyLocked)));
    }

    #[tokio::test]
    async fn short_password_counts_as_failed_attempt() {
        let (_clock, mgr) = test_manager();
        let result = mgr.unlock("short").await;
        assert!(matches!(result, Err(VaultError::PasswordTooShort { .. })));

        let status = mgr.status().await;
        assert_eq!(status.failed_attempts, 1);
        assert!(status.locked_out);
    }

    #[tokio::test]
    async fn wrong_password_while_unlocked_fails() {
        let (clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        let result = mgr.unlock(OTHER).await;
        assert!(matches!(result, Err(VaultError::InvalidPassword)));

        // Immediately retrying is rate limited.
        let result = mgr.unlock(GOOD).await;
        assert!(matches!(result, Err(VaultError::RateLimited { .. })));

        // After the lockout window, the correct password resets the counter.
        clock.advance(chrono::Duration::seconds(2));
        mgr.unlock(GOOD).await.unwrap();
        assert_eq!(mgr.status().await.failed_attempts, 0);
    }

    #[tokio::test]
    async fn lockout_reports_retry_after() {
        let (_clock, mgr) = test_manager();
        let _ = mgr.unlock("short").await;

        match mgr.unlock(GOOD).await {
            Err(VaultError::RateLimited { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(1));
            },
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lockout_escalates_with_failures() {
        let (clock, mgr) = test_manager();

        for expected_delay in [1u64, 2, 4, 8] {
            let _ = mgr.unlock("short").await;
            let status = mgr.status().await;
            assert_eq!(status.lockout_remaining_secs, Some(expected_delay));
            clock.advance(chrono::Duration::seconds(expected_delay as i64));
        }
    }

    #[test]
    fn lockout_delay_caps_at_five_minutes() {
        assert_eq!(lockout_delay(0), Duration::ZERO);
        assert_eq!(lockout_delay(1), Duration::from_secs(1));
        assert_eq!(lockout_delay(4), Duration::from_secs(8));
        assert_eq!(lockout_delay(9), Duration::from_secs(256));
        assert_eq!(lockout_delay(10), Duration::from_secs(300));
        assert_eq!(lockout_delay(64), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn key_expires_after_ttl() {
        let (clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        clock.advance(chrono::Duration::seconds(901));
        assert!(mgr.is_locked().await);
        assert!(matches!(mgr.get_key().await, Err(VaultError::Locked)));

        let status = mgr.status().await;
        assert!(status.locked);
        assert!(status.key_created_at.is_none());
    }

    #[tokio::test]
    async fn rotate_replaces_salt_and_key() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();
        let old_salt = mgr.salt().await.unwrap();

        mgr.rotate_key(GOOD, OTHER).await.unwrap();

        assert_ne!(mgr.salt().await.unwrap(), old_salt);
        assert!(!mgr.verify_password(GOOD).await);
        assert!(mgr.verify_password(OTHER).await);
        assert!(!mgr.is_locked().await);
    }

    #[tokio::test]
    async fn rotate_with_wrong_old_password_fails() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();
        let salt = mgr.salt().await.unwrap();

        let result = mgr.rotate_key(OTHER, "new-password-long-enough").await;
        assert!(matches!(result, Err(VaultError::InvalidPassword)));
        assert_eq!(mgr.salt().await.unwrap(), salt);
    }

    #[tokio::test]
    async fn rotate_validates_new_password_first() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        let result = mgr.rotate_key(GOOD, "short").await;
        assert!(matches!(result, Err(VaultError::PasswordTooShort { .. })));
        // Validation failure is not an authentication failure.
        assert_eq!(mgr.status().await.failed_attempts, 0);
    }

    #[tokio::test]
    async fn verify_password_without_state_is_false() {
        let (_clock, mgr) = test_manager();
        assert!(!mgr.verify_password(GOOD).await);
    }

    #[tokio::test]
    async fn salt_requires_initialization() {
        let (_clock, mgr) = test_manager();
        assert!(matches!(mgr.salt().await, Err(VaultError::NotInitialized)));

        mgr.unlock(GOOD).await.unwrap();
        assert!(mgr.salt().await.is_ok());
    }

    #[tokio::test]
    async fn set_salt_survives_unlock() {
        let (_clock, mgr) = test_manager();
        let salt = kdf::generate_salt();
        mgr.set_salt(salt).await;

        mgr.unlock(GOOD).await.unwrap();
        assert_eq!(mgr.salt().await.unwrap(), salt);
    }

    #[tokio::test]
    async fn status_reports_key_lifetime() {
        let (_clock, mgr) = test_manager();
        mgr.unlock(GOOD).await.unwrap();

        let status = mgr.status().await;
        assert!(!status.locked);
        assert!(status.key_created_at.is_some());
        assert!(status.key_expires_at.is_some());
        assert!(status.time_remaining_secs.unwrap() <= 900);
        assert!(!status.locked_out);
    }
}
