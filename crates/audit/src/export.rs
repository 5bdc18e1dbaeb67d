//! Audit export formats: JSON lines and CSV.

use std::io::Write;

use crate::{entry::AuditEntry, error::AuditError};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One JSON object per line.
    Json,
    /// Fixed-header CSV; metadata serialized as a JSON string column.
    Csv,
}

/// Stream `entries` to `writer` in the requested format.
pub fn write_entries<W: Write>(
    entries: &[AuditEntry],
    format: ExportFormat,
    writer: &mut W,
) -> Result<(), AuditError> {
    match format {
        ExportFormat::Json => write_json(entries, writer),
        ExportFormat::Csv => write_csv(entries, writer),
    }
}

fn write_json<W: Write>(entries: &[AuditEntry], writer: &mut W) -> Result<(), AuditError> {
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn write_csv<W: Write>(entries: &[AuditEntry], writer: &mut W) -> Result<(), AuditError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "timestamp", "action", "target", "actor", "success", "error", "metadata",
    ])?;

    for entry in entries {
        let metadata = match entry.metadata.as_ref() {
            Some(map) => serde_json::to_string(map)?,
            None => String::new(),
        };
        csv_writer.write_record([
            entry.timestamp.to_rfc3339().as_str(),
            entry.action.as_str(),
            entry.target.as_str(),
            entry.actor.as_str(),
            if entry.success { "true" } else { "false" },
            entry.error.as_deref().unwrap_or(""),
            metadata.as_str(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
