//! Upload resumption, byte reception, and completion classification.
//!
//! The resume offset is decided purely from the on-disk blob size against the
//! declared size; classification on close likewise trusts on-disk evidence
//! over in-memory counters, so a transfer interrupted by a process restart
//! classifies the same way as one interrupted by a dropped connection.

use crate::checksum;
use crate::error::{ProtoError, ProtoResult};
use crate::model::FileRec;
use crate::storage::BlobStore;
use crate::store::{DataBundle, Field};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// What the on-disk blob turned out to be when the transfer closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadOutcome {
    /// Checksum matched: the version was promoted to current.
    Verified,
    /// Full-size blob with the wrong checksum: truncated, restart from zero.
    Invalid,
    /// Short blob: progress recorded for a later resume.
    Incomplete,
}

/// Compute the byte position a client should resume from.
///
/// The request's declared size and checksum must equal the values fixed on
/// the record at create time. A blob larger than the declared size cannot
/// coexist with an equal checksum and is reported, never silently truncated.
pub fn resume_offset(
    file: &FileRec,
    req_checksum: &str,
    req_size: u64,
    disk_size: u64,
) -> ProtoResult<u64> {
    if req_size != file.size {
        return Err(ProtoError::Invalid(format!(
            "declared size {} does not match created size {}",
            req_size, file.size
        )));
    }
    if !req_checksum.eq_ignore_ascii_case(&file.checksum) {
        return Err(ProtoError::Invalid(format!(
            "declared checksum does not match created checksum for file {}",
            file.id
        )));
    }
    if disk_size > file.size {
        return Err(ProtoError::Invalid(format!(
            "blob for {} holds {} bytes, more than declared size {}",
            file.physical_id(),
            disk_size,
            file.size
        )));
    }
    Ok(disk_size)
}

/// One in-flight transfer: the open blob handle plus byte accounting.
///
/// The caller owns the exclusivity mark on `physical_id`; this type only
/// writes bytes and enforces the declared-size ceiling.
pub struct ActiveUpload {
    pub file: FileRec,
    pub physical_id: String,
    base: u64,
    nbytes: u64,
    blob: File,
}

impl ActiveUpload {
    pub fn open(
        blobs: &BlobStore,
        file: FileRec,
        physical_id: String,
        offset: u64,
    ) -> ProtoResult<Self> {
        let blob = blobs.open_for_write(&physical_id, offset)?;
        Ok(ActiveUpload {
            file,
            physical_id,
            base: offset,
            nbytes: 0,
            blob,
        })
    }

    /// Append a chunk. Rejects the write, without persisting any of it, if
    /// the running total would exceed the declared size.
    pub fn write(&mut self, bytes: &[u8]) -> ProtoResult<u64> {
        let total = self.base + self.nbytes + bytes.len() as u64;
        if total > self.file.size {
            return Err(ProtoError::Invalid(format!(
                "upload overrun: {} bytes would exceed declared size {}",
                total, self.file.size
            )));
        }
        self.blob
            .write_all(bytes)
            .map_err(|e| ProtoError::internal("write blob", e))?;
        self.nbytes += bytes.len() as u64;
        Ok(bytes.len() as u64)
    }

    /// Bytes written by this session.
    pub fn written(&self) -> u64 {
        self.nbytes
    }

    /// Flush and drop the blob handle, keeping the record and physical ID
    /// for classification.
    pub fn close(self) -> (FileRec, String) {
        let ActiveUpload {
            file,
            physical_id,
            mut blob,
            ..
        } = self;
        let _ = blob.flush();
        drop(blob);
        (file, physical_id)
    }
}

/// Classify a closed transfer from on-disk evidence and apply its side
/// effects: promotion on a checksum match, truncation of a full-size
/// mismatch, progress bookkeeping for a short blob.
///
/// The caller releases the exclusivity mark afterwards; classification never
/// touches the lock table.
pub fn classify(
    data: &DataBundle,
    blobs: &BlobStore,
    file_id: &str,
    physical_id: &str,
) -> ProtoResult<UploadOutcome> {
    let file = data
        .files
        .by_id(file_id)?
        .ok_or_else(|| ProtoError::NotFound(format!("file {}", file_id)))?;
    let disk_size = blobs.size_on_disk(physical_id)?;
    let blob_path = blobs.blob_path(physical_id)?;

    let matched = disk_size > 0
        && checksum::file_matches(&blob_path, &file.checksum)
            .map_err(|e| ProtoError::internal("checksum blob", e))?;

    if matched {
        promote(data, &file, physical_id)?;
        return Ok(UploadOutcome::Verified);
    }

    if disk_size >= file.size {
        blobs.truncate(physical_id)?;
        let mut rec = file;
        rec.uploaded = 0;
        rec.mtime = Utc::now();
        data.files.update(&rec)?;
        return Ok(UploadOutcome::Invalid);
    }

    let mut rec = file;
    rec.uploaded = disk_size;
    rec.mtime = Utc::now();
    data.files.update(&rec)?;
    Ok(UploadOutcome::Incomplete)
}

/// Promote the written record and every entry reusing its bytes: mark them
/// current, complete their byte counts, add directory memberships, and hide
/// superseded parents.
fn promote(data: &DataBundle, file: &FileRec, physical_id: &str) -> ProtoResult<()> {
    let mut targets = vec![file.clone()];
    for rec in data.files.match_on(Field::Uses, physical_id)? {
        if rec.id != file.id {
            targets.push(rec);
        }
    }
    for mut rec in targets {
        rec.current = true;
        rec.uploaded = rec.size;
        rec.mtime = Utc::now();
        data.files.update(&rec)?;
        for dir_id in rec.datadirs.clone() {
            data.dirs.add_files(&dir_id, &[rec.id.clone()])?;
        }
        if !rec.parent.is_empty() {
            data.files.hide(&rec.parent)?;
        }
    }
    Ok(())
}
