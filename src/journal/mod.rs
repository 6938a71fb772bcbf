//! Execution ledger
//!
//! Durable, append-only record of every intent's lifecycle, one JSONL
//! file per trading date, single writer per intent. Replay feeds
//! restart reconciliation and the test suite.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::execution::{Direction, IntentStatus};

/// One intent state change. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub intent_id: Uuid,
    pub stream_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub status: IntentStatus,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
}

/// Appending journal writer.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening journal {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush. A journal that cannot be written is
    /// a hard error; the caller fails closed.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Stream all entries back from a journal file.
///
/// A final line that fails to parse is treated as a torn write from a
/// crash and skipped with a warning. A corrupt interior line is an
/// error: the file is append-only and should never contain one.
pub fn replay(path: &Path) -> Result<Vec<JournalEntry>> {
    let file = File::open(path)
        .with_context(|| format!("opening journal {}", path.display()))?;
    let reader = BufReader::new(file);

    let lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("reading journal {}", path.display()))?;

    let mut entries = Vec::with_capacity(lines.len());
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if i == last => {
                warn!("journal {}: dropping torn final line: {}", path.display(), e);
            }
            Err(e) => bail!(
                "journal {}: corrupt interior line {}: {}",
                path.display(),
                i + 1,
                e
            ),
        }
    }
    Ok(entries)
}

/// Latest entry per intent, for restart reconciliation.
pub fn latest_by_intent(entries: &[JournalEntry]) -> HashMap<Uuid, &JournalEntry> {
    let mut latest: HashMap<Uuid, &JournalEntry> = HashMap::new();
    for entry in entries {
        latest.insert(entry.intent_id, entry);
    }
    latest
}

/// Intents whose last journaled status is still open.
pub fn open_intents(entries: &[JournalEntry]) -> Vec<&JournalEntry> {
    latest_by_intent(entries)
        .into_values()
        .filter(|e| e.status.is_open())
        .collect()
}
