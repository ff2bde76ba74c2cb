//! Data-access interfaces and the in-memory store backing them.
//!
//! Each trait is a narrow CRUD/query surface over one record family. The
//! session layer receives them bundled in a [`DataBundle`] so tests and
//! alternative engines can substitute any of the five without touching the
//! protocol code. [`MemStore`] implements all five behind one mutex.

use crate::error::{ProtoError, ProtoResult};
use crate::model::{DirRec, FileRec, GroupRec, ProjectRec, UserRec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// File fields `match_on` can query by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Uses,
    Parent,
}

pub trait Files: Send + Sync {
    fn by_id(&self, id: &str) -> ProtoResult<Option<FileRec>>;
    /// The current (visible) file at `(directory, name)`, if any.
    fn by_path(&self, dir_id: &str, name: &str) -> ProtoResult<Option<FileRec>>;
    /// Every record at `(directory, name)` carrying `checksum`, current or not.
    fn by_path_checksum(
        &self,
        dir_id: &str,
        name: &str,
        checksum: &str,
    ) -> ProtoResult<Vec<FileRec>>;
    /// Every record carrying `checksum`, anywhere in the system.
    fn by_checksum(&self, checksum: &str) -> ProtoResult<Vec<FileRec>>;
    fn match_on(&self, field: Field, value: &str) -> ProtoResult<Vec<FileRec>>;
    /// Insert a record, assigning a fresh ID; returns the stored record.
    fn insert(&self, rec: FileRec) -> ProtoResult<FileRec>;
    /// Insert a fully-formed record under its existing ID.
    fn insert_entry(&self, rec: FileRec) -> ProtoResult<()>;
    fn update(&self, rec: &FileRec) -> ProtoResult<()>;
    /// Set `current = false`, retaining the record for version history.
    fn hide(&self, id: &str) -> ProtoResult<()>;
    fn add_directories(&self, file_id: &str, dir_ids: &[String]) -> ProtoResult<()>;
    /// Administrative removal; normal flow never deletes.
    fn delete(&self, id: &str) -> ProtoResult<()>;
}

pub trait Dirs: Send + Sync {
    fn by_id(&self, id: &str) -> ProtoResult<Option<DirRec>>;
    fn by_path(&self, project_id: &str, path: &str) -> ProtoResult<Option<DirRec>>;
    fn insert(&self, rec: DirRec) -> ProtoResult<DirRec>;
    fn add_files(&self, dir_id: &str, file_ids: &[String]) -> ProtoResult<()>;
}

pub trait Projects: Send + Sync {
    fn by_id(&self, id: &str) -> ProtoResult<Option<ProjectRec>>;
    fn by_name(&self, name: &str, owner: &str) -> ProtoResult<Option<ProjectRec>>;
    fn insert(&self, rec: ProjectRec) -> ProtoResult<ProjectRec>;
    fn add_directories(&self, project_id: &str, dir_ids: &[String]) -> ProtoResult<()>;
}

pub trait Groups: Send + Sync {
    /// Whether `user` may act on objects owned by `owner`: identity or
    /// membership in a group the owner created.
    fn has_access(&self, owner: &str, user: &str) -> ProtoResult<bool>;
}

pub trait Users: Send + Sync {
    fn by_id(&self, id: &str) -> ProtoResult<Option<UserRec>>;
    fn by_apikey(&self, apikey: &str) -> ProtoResult<Option<UserRec>>;
}

/// The five data-access interfaces a session needs, injected at construction.
#[derive(Clone)]
pub struct DataBundle {
    pub files: Arc<dyn Files>,
    pub dirs: Arc<dyn Dirs>,
    pub projects: Arc<dyn Projects>,
    pub groups: Arc<dyn Groups>,
    pub users: Arc<dyn Users>,
}

impl DataBundle {
    /// Bundle every interface from one shared [`MemStore`].
    pub fn backed_by(store: Arc<MemStore>) -> Self {
        DataBundle {
            files: store.clone(),
            dirs: store.clone(),
            projects: store.clone(),
            groups: store.clone(),
            users: store,
        }
    }
}

#[derive(Default)]
struct MemInner {
    files: HashMap<String, FileRec>,
    dirs: HashMap<String, DirRec>,
    projects: HashMap<String, ProjectRec>,
    users: HashMap<String, UserRec>,
    groups: Vec<GroupRec>,
}

/// Mutex-guarded in-memory store. Backs the daemon and the test suite;
/// persistence engines substitute behind the same traits.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn shared() -> Arc<MemStore> {
        Arc::new(MemStore::default())
    }

    pub fn add_user(&self, user: UserRec) {
        self.inner.lock().users.insert(user.id.clone(), user);
    }

    pub fn add_group(&self, group: GroupRec) {
        self.inner.lock().groups.push(group);
    }
}

impl Files for MemStore {
    fn by_id(&self, id: &str) -> ProtoResult<Option<FileRec>> {
        Ok(self.inner.lock().files.get(id).cloned())
    }

    fn by_path(&self, dir_id: &str, name: &str) -> ProtoResult<Option<FileRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .files
            .values()
            .find(|f| f.current && f.name == name && f.datadirs.iter().any(|d| d == dir_id))
            .cloned())
    }

    fn by_path_checksum(
        &self,
        dir_id: &str,
        name: &str,
        checksum: &str,
    ) -> ProtoResult<Vec<FileRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .files
            .values()
            .filter(|f| {
                f.name == name && f.checksum == checksum && f.datadirs.iter().any(|d| d == dir_id)
            })
            .cloned()
            .collect())
    }

    fn by_checksum(&self, checksum: &str) -> ProtoResult<Vec<FileRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .files
            .values()
            .filter(|f| f.checksum == checksum)
            .cloned()
            .collect())
    }

    fn match_on(&self, field: Field, value: &str) -> ProtoResult<Vec<FileRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .files
            .values()
            .filter(|f| match field {
                Field::Uses => f.uses == value,
                Field::Parent => f.parent == value,
            })
            .cloned()
            .collect())
    }

    fn insert(&self, mut rec: FileRec) -> ProtoResult<FileRec> {
        if rec.id.is_empty() {
            rec.id = uuid::Uuid::new_v4().to_string();
        }
        self.inner.lock().files.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    fn insert_entry(&self, rec: FileRec) -> ProtoResult<()> {
        self.inner.lock().files.insert(rec.id.clone(), rec);
        Ok(())
    }

    fn update(&self, rec: &FileRec) -> ProtoResult<()> {
        let mut inner = self.inner.lock();
        if !inner.files.contains_key(&rec.id) {
            return Err(ProtoError::NotFound(format!("file {}", rec.id)));
        }
        inner.files.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    fn hide(&self, id: &str) -> ProtoResult<()> {
        let mut inner = self.inner.lock();
        match inner.files.get_mut(id) {
            Some(f) => {
                f.current = false;
                Ok(())
            }
            None => Err(ProtoError::NotFound(format!("file {}", id))),
        }
    }

    fn add_directories(&self, file_id: &str, dir_ids: &[String]) -> ProtoResult<()> {
        let mut inner = self.inner.lock();
        match inner.files.get_mut(file_id) {
            Some(f) => {
                for d in dir_ids {
                    if !f.datadirs.contains(d) {
                        f.datadirs.push(d.clone());
                    }
                }
                Ok(())
            }
            None => Err(ProtoError::NotFound(format!("file {}", file_id))),
        }
    }

    fn delete(&self, id: &str) -> ProtoResult<()> {
        self.inner.lock().files.remove(id);
        Ok(())
    }
}

impl Dirs for MemStore {
    fn by_id(&self, id: &str) -> ProtoResult<Option<DirRec>> {
        Ok(self.inner.lock().dirs.get(id).cloned())
    }

    fn by_path(&self, project_id: &str, path: &str) -> ProtoResult<Option<DirRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .dirs
            .values()
            .find(|d| d.project == project_id && d.path == path)
            .cloned())
    }

    fn insert(&self, rec: DirRec) -> ProtoResult<DirRec> {
        self.inner.lock().dirs.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    fn add_files(&self, dir_id: &str, file_ids: &[String]) -> ProtoResult<()> {
        let mut inner = self.inner.lock();
        match inner.dirs.get_mut(dir_id) {
            Some(d) => {
                for f in file_ids {
                    if !d.files.contains(f) {
                        d.files.push(f.clone());
                    }
                }
                Ok(())
            }
            None => Err(ProtoError::NotFound(format!("directory {}", dir_id))),
        }
    }
}

impl Projects for MemStore {
    fn by_id(&self, id: &str) -> ProtoResult<Option<ProjectRec>> {
        Ok(self.inner.lock().projects.get(id).cloned())
    }

    fn by_name(&self, name: &str, owner: &str) -> ProtoResult<Option<ProjectRec>> {
        let inner = self.inner.lock();
        Ok(inner
            .projects
            .values()
            .find(|p| p.name == name && p.owner == owner)
            .cloned())
    }

    fn insert(&self, rec: ProjectRec) -> ProtoResult<ProjectRec> {
        self.inner
            .lock()
            .projects
            .insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    fn add_directories(&self, project_id: &str, dir_ids: &[String]) -> ProtoResult<()> {
        let mut inner = self.inner.lock();
        match inner.projects.get_mut(project_id) {
            Some(p) => {
                for d in dir_ids {
                    if !p.directories.contains(d) {
                        p.directories.push(d.clone());
                    }
                }
                Ok(())
            }
            None => Err(ProtoError::NotFound(format!("project {}", project_id))),
        }
    }
}

impl Groups for MemStore {
    fn has_access(&self, owner: &str, user: &str) -> ProtoResult<bool> {
        if owner == user {
            return Ok(true);
        }
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .iter()
            .any(|g| g.owner == owner && g.members.iter().any(|m| m == user)))
    }
}

impl Users for MemStore {
    fn by_id(&self, id: &str) -> ProtoResult<Option<UserRec>> {
        Ok(self.inner.lock().users.get(id).cloned())
    }

    fn by_apikey(&self, apikey: &str) -> ProtoResult<Option<UserRec>> {
        let inner = self.inner.lock();
        Ok(inner.users.values().find(|u| u.apikey == apikey).cloned())
    }
}
