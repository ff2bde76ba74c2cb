//! Physical blob layout under the daemon storage root.
//!
//! Blobs are keyed by the resolved physical file ID and fanned out over two
//! prefix levels (`objects/ab/cd/<id>`) to keep directory sizes bounded. IDs
//! are server-assigned UUIDs; anything else is rejected before it can touch
//! the filesystem.

use crate::error::{ProtoError, ProtoResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BlobStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a physical ID. IDs must be plain UUID-shaped tokens;
    /// path separators or dot components never reach the join.
    pub fn blob_path(&self, id: &str) -> ProtoResult<PathBuf> {
        if id.len() < 4
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProtoError::Invalid(format!("malformed object id: {:?}", id)));
        }
        Ok(self
            .root
            .join("objects")
            .join(&id[0..2])
            .join(&id[2..4])
            .join(id))
    }

    /// Size of the blob on disk, or 0 if it does not exist yet. A stat
    /// failure other than not-found is a hard error.
    pub fn size_on_disk(&self, id: &str) -> ProtoResult<u64> {
        let path = self.blob_path(id)?;
        match fs::metadata(&path) {
            Ok(md) => Ok(md.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(ProtoError::internal("stat blob", e)),
        }
    }

    /// Open the blob for writing at `offset`, creating it and its parent
    /// directories as needed. Offset 0 truncates; a positive offset resumes
    /// by seeking to that position.
    pub fn open_for_write(&self, id: &str, offset: u64) -> ProtoResult<File> {
        let path = self.blob_path(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProtoError::internal("create blob dir", e))?;
        }
        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        if offset == 0 {
            opts.truncate(true);
        }
        let mut f = opts
            .open(&path)
            .map_err(|e| ProtoError::internal("open blob", e))?;
        if offset > 0 {
            f.seek(SeekFrom::Start(offset))
                .map_err(|e| ProtoError::internal("seek blob", e))?;
        }
        Ok(f)
    }

    /// Throw away all persisted bytes; the upload must restart from zero.
    pub fn truncate(&self, id: &str) -> ProtoResult<()> {
        let path = self.blob_path(id)?;
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ProtoError::internal("truncate blob", e))?;
        Ok(())
    }
}
