//! Buffered, hash-chained audit logger with a periodic flush task.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    tokio::{
        sync::{Mutex, Notify},
        task::JoinHandle,
    },
};

use crate::{
    chain::{self, GENESIS_HASH},
    entry::{AuditAction, AuditEntry, QueryOptions},
    error::AuditError,
    export::{self, ExportFormat},
    segments::SegmentStore,
};

/// Default retention window for old segments.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Default interval of the background flush task.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Construction options for [`AuditLogger`].
#[derive(Debug, Clone)]
pub struct AuditLoggerOptions {
    /// Directory holding the day-segment files.
    pub audit_dir: PathBuf,
    /// `cleanup()` deletes segments strictly older than this many days.
    pub retention_days: u32,
    /// Interval of the background flush task.
    pub flush_interval: Duration,
}

impl AuditLoggerOptions {
    pub fn new(audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            audit_dir: audit_dir.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    #[must_use]
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Buffer plus chain cursor, guarded by one mutex so `log()` callers
/// contend only briefly and never on I/O.
struct LoggerState {
    buffer: Vec<AuditEntry>,
    last_hash: String,
}

/// Tamper-evident audit log over day-partitioned NDJSON segments.
///
/// `log()` is fire-and-forget with respect to storage: entries are
/// chained and buffered in memory, and a background task appends them to
/// disk every few seconds. Pair construction with [`close`](Self::close),
/// which stops the task and performs a final flush.
pub struct AuditLogger {
    store: SegmentStore,
    retention_days: u32,
    flush_interval: Duration,
    inner: Mutex<LoggerState>,
    /// Serializes flushes so the background task and explicit callers
    /// never double-write a snapshot.
    flush_lock: Mutex<()>,
    /// Last flush failure, operator-visible. A silently failing audit
    /// trail is a security regression.
    flush_error: Mutex<Option<String>>,
    shutdown: Notify,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Open (or create) an audit log with default options.
    pub async fn new(audit_dir: impl Into<PathBuf>) -> Result<Arc<Self>, AuditError> {
        Self::with_options(AuditLoggerOptions::new(audit_dir)).await
    }

    /// Open (or create) an audit log.
    ///
    /// Recovers the chain cursor from the last entry of the most recent
    /// segment (genesis for a fresh directory) and starts the periodic
    /// flush task.
    pub async fn with_options(options: AuditLoggerOptions) -> Result<Arc<Self>, AuditError> {
        let store = SegmentStore::new(options.audit_dir);
        store.ensure_dir().await?;

        let last_hash = match store.last_entry().await? {
            Some(entry) => entry.hash,
            None => GENESIS_HASH.to_string(),
        };

        let logger = Arc::new(Self {
            store,
            retention_days: options.retention_days,
            flush_interval: options.flush_interval,
            inner: Mutex::new(LoggerState {
                buffer: Vec::new(),
                last_hash,
            }),
            flush_lock: Mutex::new(()),
            flush_error: Mutex::new(None),
            shutdown: Notify::new(),
            flush_handle: Mutex::new(None),
        });

        let task = Arc::clone(&logger);
        let handle = tokio::spawn(async move {
            task.flush_loop().await;
        });
        *logger.flush_handle.lock().await = Some(handle);

        Ok(logger)
    }

    /// Record one audit entry.
    ///
    /// Never fails on storage problems, only on malformed input. The
    /// entry is linked into the hash chain and buffered; the background
    /// task persists it.
    pub async fn log(
        &self,
        action: AuditAction,
        target: impl Into<String>,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<(), AuditError> {
        let target = target.into();
        let actor = actor.into();
        if target.is_empty() {
            return Err(AuditError::InvalidEntry("target must not be empty".into()));
        }
        if actor.is_empty() {
            return Err(AuditError::InvalidEntry("actor must not be empty".into()));
        }
        if success && error.is_some() {
            return Err(AuditError::InvalidEntry(
                "error must not be set on a successful operation".into(),
            ));
        }

        let mut state = self.inner.lock().await;
        let mut entry = AuditEntry {
            timestamp: Utc::now(),
            action,
            target,
            actor,
            success,
            error,
            metadata,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = chain::entry_hash(&entry)?;
        state.last_hash = entry.hash.clone();
        state.buffer.push(entry);
        Ok(())
    }

    pub async fn log_unlock(
        &self,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Unlock, "vault", actor, success, error, None)
            .await
    }

    pub async fn log_lock(
        &self,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Lock, "vault", actor, success, error, None)
            .await
    }

    pub async fn log_rotate(
        &self,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Rotate, "vault", actor, success, error, None)
            .await
    }

    pub async fn log_read(
        &self,
        target: impl Into<String>,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Read, target, actor, success, error, None)
            .await
    }

    pub async fn log_write(
        &self,
        target: impl Into<String>,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Write, target, actor, success, error, None)
            .await
    }

    pub async fn log_delete(
        &self,
        target: impl Into<String>,
        actor: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        self.log(AuditAction::Delete, target, actor, success, error, None)
            .await
    }

    /// Drain the buffer to the day-segment files, preserving append
    /// order. Invoked by the background task; public for deterministic
    /// tests. On failure the buffer is left intact for retry.
    pub async fn flush(&self) -> Result<(), AuditError> {
        let _guard = self.flush_lock.lock().await;

        let snapshot: Vec<AuditEntry> = {
            let state = self.inner.lock().await;
            if state.buffer.is_empty() {
                return Ok(());
            }
            state.buffer.clone()
        };

        let (persisted, result) = self.write_entries(&snapshot).await;
        if persisted > 0 {
            // Drop exactly what reached disk; entries logged during the
            // write stay buffered, and on failure the unpersisted tail
            // is retried rather than re-appended.
            self.inner.lock().await.buffer.drain(..persisted);
        }

        match result {
            Ok(()) => {
                *self.flush_error.lock().await = None;

                #[cfg(feature = "tracing")]
                tracing::debug!(count = persisted, "flushed audit entries");

                Ok(())
            },
            Err(e) => {
                *self.flush_error.lock().await = Some(e.to_string());

                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, persisted, "audit flush failed, will retry");

                Err(e)
            },
        }
    }

    /// Whether the last flush attempt succeeded.
    pub async fn is_healthy(&self) -> bool {
        self.flush_error.lock().await.is_none()
    }

    /// The last flush failure, if any.
    pub async fn last_flush_error(&self) -> Option<String> {
        self.flush_error.lock().await.clone()
    }

    /// Return entries passing every supplied filter, in append order.
    /// Includes not-yet-flushed buffered entries, so a process always
    /// reads its own writes.
    pub async fn query(&self, options: &QueryOptions) -> Result<Vec<AuditEntry>, AuditError> {
        // Hold off concurrent flushes so an entry is never observed in
        // neither the segments nor the buffer mid-move.
        let _guard = self.flush_lock.lock().await;

        let start_date = options.start_time.map(|t| t.date_naive());
        let end_date = options.end_time.map(|t| t.date_naive());

        let mut entries = Vec::new();
        for date in self.store.list_dates().await? {
            if start_date.is_some_and(|d| date < d) || end_date.is_some_and(|d| date > d) {
                continue;
            }
            entries.extend(self.store.read(date).await?);
        }

        {
            let state = self.inner.lock().await;
            entries.extend(state.buffer.iter().cloned());
        }

        entries.retain(|entry| options.matches(entry));
        Ok(entries)
    }

    /// Replay the hash chain over `[start, end]` and fail on any edit,
    /// deletion, or reordering. An unbounded range is additionally
    /// anchored at the genesis hash.
    pub async fn verify_integrity(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), AuditError> {
        let options = QueryOptions {
            start_time: start,
            end_time: end,
            ..QueryOptions::default()
        };
        let entries = self.query(&options).await?;
        chain::verify_chain(&entries, start.is_none())
    }

    /// Delete segments strictly older than the retention window. The
    /// current day's segment is never touched.
    pub async fn cleanup(&self) -> Result<(), AuditError> {
        let today = Utc::now().date_naive();
        let cutoff = today - chrono::Days::new(u64::from(self.retention_days));

        for date in self.store.list_dates().await? {
            if date < cutoff && date != today {
                self.store.remove(date).await?;

                #[cfg(feature = "tracing")]
                tracing::info!(segment = %date, "removed expired audit segment");
            }
        }
        Ok(())
    }

    /// Stream entries in `[start, end]` to `writer` as JSON lines or
    /// CSV. Destination errors propagate; partial output is acceptable.
    pub async fn export<W: std::io::Write>(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        format: ExportFormat,
        writer: &mut W,
    ) -> Result<(), AuditError> {
        let options = QueryOptions {
            start_time: start,
            end_time: end,
            ..QueryOptions::default()
        };
        let entries = self.query(&options).await?;
        export::write_entries(&entries, format, writer)
    }

    /// Stop the periodic flush task and perform one final flush.
    pub async fn close(&self) -> Result<(), AuditError> {
        self.shutdown.notify_one();
        if let Some(handle) = self.flush_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.flush().await?;

        #[cfg(feature = "tracing")]
        tracing::info!("audit logger closed");

        Ok(())
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn flush_loop(self: &Arc<Self>) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.flush_interval) => {},
                () = self.shutdown.notified() => break,
            }
            // Failures are recorded on the health flag and retried on
            // the next tick.
            let _ = self.flush().await;
        }
    }

    /// Append a snapshot to disk, split into runs of the same day so
    /// file order matches append order. Returns how many leading
    /// entries were durably appended: a failed run must not be counted,
    /// or a retry would duplicate lines and break chain verification.
    async fn write_entries(&self, entries: &[AuditEntry]) -> (usize, Result<(), AuditError>) {
        let mut persisted = 0;
        while persisted < entries.len() {
            let date = entries[persisted].timestamp.date_naive();
            let mut lines = Vec::new();
            let mut end = persisted;
            while end < entries.len() && entries[end].timestamp.date_naive() == date {
                match serde_json::to_string(&entries[end]) {
                    Ok(line) => lines.push(line),
                    Err(e) => return (persisted, Err(e.into())),
                }
                end += 1;
            }
            if let Err(e) = self.store.append(date, &lines).await {
                return (persisted, Err(e));
            }
            persisted = end;
        }
        (persisted, Ok(()))
    }
}
