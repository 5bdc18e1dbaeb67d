//! Audit log error types.

/// Errors produced by audit-log operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// An entry's content no longer matches its recorded hash.
    #[error("tamper detected at entry {at}")]
    TamperDetected { at: usize },

    /// An entry's chain link does not point at its predecessor: an
    /// entry was deleted or the history was reordered.
    #[error("chain gap after entry {after}")]
    ChainGap { after: usize },

    /// A `log()` call was given malformed input.
    #[error("invalid audit entry: {0}")]
    InvalidEntry(String),

    /// Segment file I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
