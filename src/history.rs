use crate::upload::UploadOutcome;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One classified upload close, as appended to the history log.
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadLogEntry {
    pub timestamp: String,
    pub user: String,
    pub file_id: String,
    pub physical_id: String,
    pub outcome: UploadOutcome,
    pub bytes_this_session: u64,
    pub bytes_on_disk: u64,
}

impl UploadLogEntry {
    pub fn record(
        user: &str,
        file_id: &str,
        physical_id: &str,
        outcome: UploadOutcome,
        bytes_this_session: u64,
        bytes_on_disk: u64,
    ) -> Self {
        UploadLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            user: user.to_string(),
            file_id: file_id.to_string(),
            physical_id: physical_id.to_string(),
            outcome,
            bytes_this_session,
            bytes_on_disk,
        }
    }
}

/// Append-only JSONL history of upload classifications, one line per blob
/// close, kept under the storage root for operator tooling.
#[derive(Clone)]
pub struct UploadHistory {
    log_file_path: PathBuf,
}

impl UploadHistory {
    pub fn new(storage_root: &Path) -> Self {
        let log_file_path = storage_root.join(".depot_uploads.jsonl");
        UploadHistory { log_file_path }
    }

    pub fn add_entry(&self, entry: UploadLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open upload history file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<UploadLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open upload history file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: UploadLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
