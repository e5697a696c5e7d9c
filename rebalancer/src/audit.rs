//! JSONL audit trail.
//!
//! Every manager event is appended to an audit.jsonl file, one JSON object
//! per line, stamped with the wall-clock time it was written.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::{EventSink, RebalanceEvent};

/// One line of the audit trail.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a RebalanceEvent,
}

/// Append-only audit logger.
#[derive(Debug)]
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event and flush.
    pub fn log(&self, event: &RebalanceEvent) -> Result<()> {
        let entry = AuditEntry {
            ts: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock().map_err(|_| Error::Poisoned)?;
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for AuditLog {
    fn publish(&self, event: &RebalanceEvent) -> Result<()> {
        self.log(event)
    }
}
