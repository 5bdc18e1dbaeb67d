//! Day-partitioned NDJSON segment store.
//!
//! One file per UTC calendar day, named `YYYY-MM-DD.log`, each line one
//! serialized [`AuditEntry`]. This component is the only writer to the
//! audit directory; segments are append-only.

use std::path::PathBuf;

use {
    chrono::NaiveDate,
    tokio::{fs, io::AsyncWriteExt},
};

use crate::{entry::AuditEntry, error::AuditError};

const SEGMENT_EXT: &str = "log";

pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dir(&self) -> Result<(), AuditError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn segment_path(&self, date: NaiveDate) -> PathBuf {
        // NaiveDate displays as YYYY-MM-DD.
        self.dir.join(format!("{date}.{SEGMENT_EXT}"))
    }

    /// Append pre-serialized entry lines to a day's segment, creating it
    /// on demand.
    pub async fn append(&self, date: NaiveDate, lines: &[String]) -> Result<(), AuditError> {
        if lines.is_empty() {
            return Ok(());
        }
        self.ensure_dir().await?;

        let mut data = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            data.push_str(line);
            data.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(date))
            .await?;
        let len_before = file.metadata().await?.len();
        if let Err(e) = file.write_all(data.as_bytes()).await {
            // Roll back a partial append so a retry never duplicates or
            // truncates a line.
            let _ = file.set_len(len_before).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a day's segment. A missing segment is an empty day; a
    /// malformed line or unreadable path is an error, never silently
    /// skipped.
    pub async fn read(&self, date: NaiveDate) -> Result<Vec<AuditEntry>, AuditError> {
        let path = self.segment_path(date);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).await?;
        let mut entries = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    /// All segment dates, sorted ascending. Files that don't parse as a
    /// date-named segment are ignored.
    pub async fn list_dates(&self) -> Result<Vec<NaiveDate>, AuditError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d")
            {
                dates.push(date);
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    /// The last entry of the most recent segment, for chain recovery on
    /// startup.
    pub async fn last_entry(&self) -> Result<Option<AuditEntry>, AuditError> {
        let Some(latest) = self.list_dates().await?.pop() else {
            return Ok(None);
        };
        Ok(self.read(latest).await?.pop())
    }

    /// Delete a day's segment.
    pub async fn remove(&self, date: NaiveDate) -> Result<(), AuditError> {
        fs::remove_file(self.segment_path(date)).await?;
        Ok(())
    }
}
