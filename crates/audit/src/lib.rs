//! Tamper-evident audit log for the skiff vault.
//!
//! Every security-sensitive vault operation is recorded as an immutable
//! entry in a SHA-256 hash chain, buffered in memory and appended to
//! day-partitioned NDJSON segment files by a background task. Any edit,
//! deletion, or reordering of the persisted history is detectable via
//! [`AuditLogger::verify_integrity`].
//!
//! This crate deliberately has no dependency on `skiff-vault`: the vault
//! service calls both, so audit logging cannot be bypassed by a failed
//! key derivation.

pub mod chain;
pub mod entry;
pub mod error;
pub mod export;
pub mod logger;
pub mod segments;

pub use {
    chain::GENESIS_HASH,
    entry::{AuditAction, AuditEntry, QueryOptions},
    error::AuditError,
    export::ExportFormat,
    logger::{AuditLogger, AuditLoggerOptions},
};
