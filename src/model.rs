//! Persistent records for projects, directories, files, users, and groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One uploaded object version. At most one record per physical blob has
/// `uses == ""`; every other record sharing that content points `uses` at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRec {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Hex content digest, fixed at create time.
    pub checksum: String,
    /// Declared final size in bytes.
    pub size: u64,
    /// Bytes known to be persisted so far, never above `size`.
    pub uploaded: u64,
    /// Whether this is the visible version at its path.
    pub current: bool,
    /// ID of the version this record supersedes, or "".
    pub parent: String,
    /// ID of the record whose physical bytes this one reuses, or "".
    pub uses: String,
    /// Directory IDs this file is visible in.
    pub datadirs: Vec<String>,
    pub birthtime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl FileRec {
    pub fn new(name: &str, owner: &str, checksum: &str, size: u64) -> Self {
        let now = Utc::now();
        FileRec {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            checksum: checksum.to_string(),
            size,
            uploaded: 0,
            current: false,
            parent: String::new(),
            uses: String::new(),
            datadirs: Vec::new(),
            birthtime: now,
            mtime: now,
        }
    }

    /// ID the physical bytes live under: `uses` when the record is a dedup
    /// entry, the record's own ID otherwise.
    pub fn physical_id(&self) -> &str {
        if self.uses.is_empty() {
            &self.id
        } else {
            &self.uses
        }
    }

    /// A resumable, not-yet-promoted upload.
    pub fn is_partial(&self) -> bool {
        !self.current && self.uploaded != self.size
    }
}

/// Named container within a project. Directories hold membership
/// back-references only; file bytes live in blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirRec {
    pub id: String,
    pub project: String,
    /// Full project-rooted path, e.g. "proj/a/b".
    pub path: String,
    pub files: Vec<String>,
}

impl DirRec {
    pub fn new(project: &str, path: &str) -> Self {
        DirRec {
            id: Uuid::new_v4().to_string(),
            project: project.to_string(),
            path: path.to_string(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRec {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub directories: Vec<String>,
}

impl ProjectRec {
    pub fn new(name: &str, owner: &str) -> Self {
        ProjectRec {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            directories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRec {
    pub id: String,
    pub apikey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRec {
    pub name: String,
    pub owner: String,
    pub members: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_id_follows_uses() {
        let mut f = FileRec::new("a.txt", "alice", "abc", 5);
        assert_eq!(f.physical_id(), f.id);
        f.uses = "root-id".to_string();
        assert_eq!(f.physical_id(), "root-id");
    }

    #[test]
    fn partial_means_not_current_and_short() {
        let mut f = FileRec::new("a.txt", "alice", "abc", 5);
        assert!(f.is_partial());
        f.uploaded = 5;
        assert!(!f.is_partial());
        f.uploaded = 3;
        f.current = true;
        assert!(!f.is_partial());
    }
}
