//! Hash-chain computation and verification.
//!
//! Each entry's hash covers its own fields plus the previous entry's
//! hash, so any retroactive edit, deletion, or reordering breaks the
//! chain. The chain survives restarts: the cursor is recovered from the
//! last persisted entry, or starts at [`GENESIS_HASH`] for a fresh log.

use {
    chrono::{DateTime, Utc},
    sha2::{Digest, Sha256},
};

use crate::{
    entry::{AuditAction, AuditEntry},
    error::AuditError,
};

/// Chain anchor for an empty audit directory.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// The hashed fields of an entry, in canonical order. Everything except
/// `hash` itself participates, including the link to the predecessor.
#[derive(serde::Serialize)]
struct HashedFields<'a> {
    timestamp: &'a DateTime<Utc>,
    action: AuditAction,
    target: &'a str,
    actor: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Map<String, serde_json::Value>>,
    prev_hash: &'a str,
}

/// Compute an entry's chain hash from its content and `prev_hash` field.
pub fn entry_hash(entry: &AuditEntry) -> Result<String, AuditError> {
    let canonical = serde_json::to_vec(&HashedFields {
        timestamp: &entry.timestamp,
        action: entry.action,
        target: &entry.target,
        actor: &entry.actor,
        success: entry.success,
        error: entry.error.as_deref(),
        metadata: entry.metadata.as_ref(),
        prev_hash: &entry.prev_hash,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Replay the chain over `entries` (in append order).
///
/// Every entry's hash is recomputed from its content; a mismatch is
/// [`AuditError::TamperDetected`]. Every link must point at the previous
/// entry's hash; a mismatch is [`AuditError::ChainGap`]. When
/// `anchored_at_genesis` is set (verification over the unbounded range),
/// the first entry must link to [`GENESIS_HASH`].
pub fn verify_chain(entries: &[AuditEntry], anchored_at_genesis: bool) -> Result<(), AuditError> {
    for (i, entry) in entries.iter().enumerate() {
        let recomputed = entry_hash(entry)?;
        if recomputed != entry.hash {
            return Err(AuditError::TamperDetected { at: i });
        }

        if i == 0 {
            if anchored_at_genesis && entry.prev_hash != GENESIS_HASH {
                return Err(AuditError::ChainGap { after: 0 });
            }
        } else if entry.prev_hash != entries[i - 1].hash {
            return Err(AuditError::ChainGap { after: i - 1 });
        }
    }
    Ok(())
}
