//! Per-connection request handler and session state machine.
//!
//! One `Session` exists per accepted connection. The transport layer feeds it
//! complete codec messages and writes back whatever it replies; everything
//! else — login, dispatch, the upload sub-state, lock ownership, teardown —
//! lives here, behind injected data-access and lock-table handles so tests
//! can drive a session without a socket.

use crate::codec;
use crate::error::{ProtoError, ProtoResult};
use crate::history::{UploadHistory, UploadLogEntry};
use crate::lock::InUseTable;
use crate::logger::{Logger, NoopLogger};
use crate::model::{DirRec, FileRec, ProjectRec};
use crate::protocol::{
    self, CreateDirectoryResp, CreateFileResp, CreateProjectResp, DoneResp, ErrMsg, LoginResp,
    LogoutResp, Request, Response, SendResp, StatResp, UploadResp, MAX_BAD_REQUESTS,
    PROTOCOL_VERSION,
};
use crate::storage::BlobStore;
use crate::store::DataBundle;
use crate::upload::{self, ActiveUpload, UploadOutcome};
use crate::checksum::ChecksumType;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared collaborators handed to every session at construction.
#[derive(Clone)]
pub struct SessionCtx {
    pub data: DataBundle,
    pub locks: InUseTable,
    pub blobs: BlobStore,
    pub logger: Arc<dyn Logger>,
    pub history: UploadHistory,
}

impl SessionCtx {
    pub fn new(storage_root: impl Into<PathBuf>, data: DataBundle) -> Self {
        let root = storage_root.into();
        SessionCtx {
            data,
            locks: InUseTable::new(),
            blobs: BlobStore::new(&root),
            logger: Arc::new(NoopLogger),
            history: UploadHistory::new(&root),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Awaiting login.
    Start,
    /// Authenticated, dispatching commands.
    Command,
    /// A transfer is active; only upload messages are expected.
    Uploading,
    /// Terminal; the connection is done.
    Closed,
}

/// What the transport should do with the session's answer.
#[derive(Debug)]
pub enum Action {
    Reply(Response),
    /// Send the reply, then drop the connection.
    HangupAfter(Response),
    /// Drop the connection without replying.
    Hangup,
}

pub struct Session {
    ctx: SessionCtx,
    state: State,
    user: Option<String>,
    bad_requests: u32,
    active: Option<ActiveUpload>,
    torn_down: bool,
}

impl Session {
    pub fn new(ctx: SessionCtx) -> Self {
        Session {
            ctx,
            state: State::Start,
            user: None,
            bad_requests: 0,
            active: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Consume one framed message and produce the reply action. Never panics
    /// on hostile input; malformed frames take the bad-request path.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Action {
        if self.state == State::Closed {
            return Action::Hangup;
        }
        let (kind, version, payload) = match codec::prepare(frame) {
            Ok(parts) => parts,
            Err(e) => return self.bad_request(ProtoError::Invalid(e.to_string())),
        };
        if version != PROTOCOL_VERSION {
            return self.bad_request(ProtoError::Invalid(format!(
                "protocol version mismatch: got {}, need {}",
                version, PROTOCOL_VERSION
            )));
        }
        let req = match Request::decode(kind, payload) {
            Ok(req) => req,
            Err(e) => return self.bad_request(ProtoError::Invalid(e.to_string())),
        };
        match self.state {
            State::Start => self.handle_start(req),
            State::Command => self.handle_command(req),
            State::Uploading => self.handle_uploading(req),
            State::Closed => Action::Hangup,
        }
    }

    /// Release everything the session holds: classify a half-done transfer,
    /// drop its lock, log the close. Runs exactly once; safe to call from
    /// any exit path including abrupt disconnect.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if self.active.is_some() {
            let _ = self.finish_upload();
        }
        self.ctx.logger.session_close(self.user.as_deref());
        self.state = State::Closed;
    }

    fn handle_start(&mut self, req: Request) -> Action {
        match req {
            Request::Login(login) => match self.login(&login) {
                Ok(resp) => {
                    self.bad_requests = 0;
                    self.state = State::Command;
                    Action::Reply(resp)
                }
                Err(e) => {
                    self.ctx.logger.login_failed(&login.user);
                    self.bad_request(e)
                }
            },
            Request::Close(_) => self.hangup(),
            _ => self.bad_request(ProtoError::NoAccess("not logged in".into())),
        }
    }

    fn handle_command(&mut self, req: Request) -> Action {
        match req {
            Request::Logout(_) => {
                self.user = None;
                self.state = State::Start;
                Action::Reply(Response::Logout(LogoutResp {}))
            }
            Request::Close(_) => self.hangup(),
            Request::CreateProject(m) => self.dispatch(|s| s.create_project(&m)),
            Request::CreateDirectory(m) => self.dispatch(|s| s.create_directory(&m)),
            Request::CreateFile(m) => self.dispatch(|s| s.create_file(&m)),
            Request::Stat(m) => self.dispatch(|s| s.stat(&m)),
            Request::Upload(m) => match self.begin_upload(&m) {
                Ok(resp) => {
                    self.bad_requests = 0;
                    self.state = State::Uploading;
                    Action::Reply(resp)
                }
                Err(e) => Action::Reply(envelope(&e)),
            },
            Request::Login(_) => self.bad_request(ProtoError::Invalid("already logged in".into())),
            Request::SendBytes(_) | Request::Done(_) => {
                self.bad_request(ProtoError::Invalid("no upload in progress".into()))
            }
        }
    }

    fn handle_uploading(&mut self, req: Request) -> Action {
        match req {
            Request::SendBytes(m) => {
                let Some(active) = self.active.as_mut() else {
                    self.state = State::Command;
                    return Action::Reply(envelope(&ProtoError::Internal(
                        "uploading state without active transfer".into(),
                    )));
                };
                if m.file_id != active.physical_id {
                    let _ = self.finish_upload();
                    self.state = State::Command;
                    return self.bad_request(ProtoError::Invalid(
                        "file id does not match active transfer".into(),
                    ));
                }
                match active.write(&m.bytes) {
                    Ok(n) => {
                        self.bad_requests = 0;
                        Action::Reply(Response::Send(SendResp { bytes_written: n }))
                    }
                    Err(e) => {
                        // overrun or disk failure kills the transfer; bytes
                        // already flushed stay accounted via classification
                        let _ = self.finish_upload();
                        self.state = State::Command;
                        Action::Reply(envelope(&e))
                    }
                }
            }
            Request::Done(_) => {
                let result = self.finish_upload();
                self.state = State::Command;
                match result {
                    Some(Err(e)) => Action::Reply(envelope(&e)),
                    _ => {
                        self.bad_requests = 0;
                        Action::Reply(Response::Done(DoneResp {}))
                    }
                }
            }
            Request::Logout(_) => {
                let _ = self.finish_upload();
                self.user = None;
                self.state = State::Start;
                Action::Reply(Response::Logout(LogoutResp {}))
            }
            Request::Close(_) => {
                let _ = self.finish_upload();
                self.hangup()
            }
            _ => {
                let _ = self.finish_upload();
                self.state = State::Command;
                self.bad_request(ProtoError::Invalid(
                    "unexpected message during upload".into(),
                ))
            }
        }
    }

    fn dispatch(&mut self, op: impl FnOnce(&mut Self) -> ProtoResult<Response>) -> Action {
        match op(self) {
            Ok(resp) => {
                self.bad_requests = 0;
                Action::Reply(resp)
            }
            // operation-level rejections are actionable, reported verbatim,
            // and do not count toward the bad-request limit
            Err(e) => Action::Reply(envelope(&e)),
        }
    }

    fn login(&mut self, login: &protocol::Login) -> ProtoResult<Response> {
        let known = self.ctx.data.users.by_id(&login.user)?;
        match known {
            Some(u) if u.apikey == login.apikey => {
                self.user = Some(u.id.clone());
                self.ctx.logger.login(&u.id);
                Ok(Response::Login(LoginResp {}))
            }
            _ => Err(ProtoError::NoAccess("bad credentials".into())),
        }
    }

    fn create_project(&mut self, req: &protocol::CreateProject) -> ProtoResult<Response> {
        let user = self.require_user()?.to_string();
        let name = req.name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(ProtoError::Invalid(
                "project name must be a single non-empty path segment".into(),
            ));
        }
        if let Some(resp) = self.existing_project(name, &user)? {
            return Ok(resp);
        }
        // creation-time mark on the natural key: two sessions cannot race
        // the same (owner, name) insert
        let lock_key = format!("project:{}:{}", user, name);
        if !self.ctx.locks.mark(&lock_key) {
            return Err(ProtoError::InUse(format!("project {}", name)));
        }
        let result = self.insert_project(name, &user);
        self.ctx.locks.unmark(&lock_key);
        result
    }

    fn existing_project(&self, name: &str, owner: &str) -> ProtoResult<Option<Response>> {
        let Some(project) = self.ctx.data.projects.by_name(name, owner)? else {
            return Ok(None);
        };
        let root = self
            .ctx
            .data
            .dirs
            .by_path(&project.id, name)?
            .ok_or_else(|| ProtoError::Internal(format!("project {} has no root directory", name)))?;
        Ok(Some(Response::CreateProject(CreateProjectResp {
            project_id: project.id,
            directory_id: root.id,
        })))
    }

    fn insert_project(&self, name: &str, owner: &str) -> ProtoResult<Response> {
        // a concurrent creator may have won before our mark landed
        if let Some(resp) = self.existing_project(name, owner)? {
            return Ok(resp);
        }
        let project = self.ctx.data.projects.insert(ProjectRec::new(name, owner))?;
        let root = self.ctx.data.dirs.insert(DirRec::new(&project.id, name))?;
        self.ctx
            .data
            .projects
            .add_directories(&project.id, &[root.id.clone()])?;
        Ok(Response::CreateProject(CreateProjectResp {
            project_id: project.id,
            directory_id: root.id,
        }))
    }

    fn create_directory(&mut self, req: &protocol::CreateDirectory) -> ProtoResult<Response> {
        let user = self.require_user()?.to_string();
        let project = self
            .ctx
            .data
            .projects
            .by_id(&req.project_id)?
            .ok_or_else(|| ProtoError::NotFound(format!("project {}", req.project_id)))?;
        if !self.ctx.data.groups.has_access(&project.owner, &user)? {
            return Err(ProtoError::NoAccess(format!("project {}", project.name)));
        }

        let path = req.path.trim_matches('/');
        let mut segments = path.split('/');
        if segments.next() != Some(project.name.as_str()) {
            return Err(ProtoError::Invalid(format!(
                "path must start with project name {:?}",
                project.name
            )));
        }
        let rest: Vec<&str> = segments.collect();
        if rest.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
            return Err(ProtoError::Invalid(
                "path contains disallowed component".into(),
            ));
        }

        let mut acc = project.name.clone();
        let mut dir = self
            .ctx
            .data
            .dirs
            .by_path(&project.id, &acc)?
            .ok_or_else(|| {
                ProtoError::Internal(format!("project {} has no root directory", project.name))
            })?;
        for seg in rest {
            acc = format!("{}/{}", acc, seg);
            dir = match self.ctx.data.dirs.by_path(&project.id, &acc)? {
                Some(existing) => existing,
                None => {
                    let created = self.ctx.data.dirs.insert(DirRec::new(&project.id, &acc))?;
                    self.ctx
                        .data
                        .projects
                        .add_directories(&project.id, &[created.id.clone()])?;
                    created
                }
            };
        }
        Ok(Response::CreateDirectory(CreateDirectoryResp {
            directory_id: dir.id,
        }))
    }

    fn create_file(&mut self, req: &protocol::CreateFile) -> ProtoResult<Response> {
        let user = self.require_user()?.to_string();
        let project = self
            .ctx
            .data
            .projects
            .by_id(&req.project_id)?
            .ok_or_else(|| ProtoError::NotFound(format!("project {}", req.project_id)))?;
        if !self.ctx.data.groups.has_access(&project.owner, &user)? {
            return Err(ProtoError::NoAccess(format!("project {}", project.name)));
        }
        let dir = self
            .ctx
            .data
            .dirs
            .by_id(&req.directory_id)?
            .ok_or_else(|| ProtoError::NotFound(format!("directory {}", req.directory_id)))?;
        if dir.project != project.id {
            return Err(ProtoError::Invalid(format!(
                "directory {} does not belong to project {}",
                dir.path, project.name
            )));
        }
        if req.name.is_empty() || req.name.contains('/') {
            return Err(ProtoError::Invalid(
                "file name must be a single non-empty path segment".into(),
            ));
        }
        if req.size < 1 {
            return Err(ProtoError::Invalid("size must be at least 1".into()));
        }
        if req.checksum.is_empty() {
            return Err(ProtoError::Invalid("checksum must not be empty".into()));
        }
        if ChecksumType::for_digest(&req.checksum).is_none() {
            return Err(ProtoError::Invalid(format!(
                "unrecognized checksum format: {:?}",
                req.checksum
            )));
        }

        let matches = self
            .ctx
            .data
            .files
            .by_path_checksum(&dir.id, &req.name, &req.checksum)?;
        let resolved = match matches.len() {
            0 => None,
            1 => Some(matches[0].clone()),
            // a resumable in-flight upload beats the current file beats a
            // fresh version
            _ => matches
                .iter()
                .find(|f| f.is_partial())
                .or_else(|| matches.iter().find(|f| f.current))
                .cloned(),
        };
        if let Some(existing) = resolved {
            return Ok(Response::CreateFile(CreateFileResp {
                file_id: existing.id,
            }));
        }

        let mut rec = FileRec::new(&req.name, &project.owner, &req.checksum, req.size);
        rec.datadirs = vec![dir.id.clone()];
        if let Some(cur) = self.ctx.data.files.by_path(&dir.id, &req.name)? {
            rec.parent = cur.id;
        }
        // identical content finished anywhere else: reuse its bytes
        for cand in self.ctx.data.files.by_checksum(&req.checksum)? {
            if cand.size == req.size && cand.uploaded == cand.size {
                rec.uses = if cand.uses.is_empty() {
                    cand.id.clone()
                } else {
                    cand.uses.clone()
                };
                break;
            }
        }
        self.ctx.data.files.insert_entry(rec.clone())?;
        Ok(Response::CreateFile(CreateFileResp { file_id: rec.id }))
    }

    fn begin_upload(&mut self, req: &protocol::Upload) -> ProtoResult<Response> {
        let user = self.require_user()?.to_string();
        let file = self
            .ctx
            .data
            .files
            .by_id(&req.file_id)?
            .ok_or_else(|| ProtoError::NotFound(format!("file {}", req.file_id)))?;
        if !self.ctx.data.groups.has_access(&file.owner, &user)? {
            return Err(ProtoError::NoAccess(format!("file {}", file.id)));
        }
        let physical = file.physical_id().to_string();
        let disk_size = self.ctx.blobs.size_on_disk(&physical)?;
        let offset = upload::resume_offset(&file, &req.checksum, req.size, disk_size)?;
        if !self.ctx.locks.mark(&physical) {
            return Err(ProtoError::InUse(format!("file {}", physical)));
        }
        match ActiveUpload::open(&self.ctx.blobs, file, physical.clone(), offset) {
            Ok(active) => {
                self.active = Some(active);
                Ok(Response::Upload(UploadResp {
                    file_id: physical,
                    offset,
                }))
            }
            Err(e) => {
                self.ctx.locks.unmark(&physical);
                Err(e)
            }
        }
    }

    fn stat(&mut self, req: &protocol::Stat) -> ProtoResult<Response> {
        let user = self.require_user()?.to_string();
        let file = self
            .ctx
            .data
            .files
            .by_id(&req.file_id)?
            .ok_or_else(|| ProtoError::NotFound(format!("file {}", req.file_id)))?;
        if !self.ctx.data.groups.has_access(&file.owner, &user)? {
            return Err(ProtoError::NoAccess(format!("file {}", file.id)));
        }
        Ok(Response::Stat(StatResp {
            file_id: file.id,
            name: file.name,
            datadirs: file.datadirs,
            checksum: file.checksum,
            size: file.size,
            birthtime: file.birthtime,
            mtime: file.mtime,
        }))
    }

    /// Close the active transfer: classify from disk, record history, and
    /// release the exclusivity mark as the final step. Returns `None` when no
    /// transfer was active.
    fn finish_upload(&mut self) -> Option<ProtoResult<UploadOutcome>> {
        let active = self.active.take()?;
        let nbytes = active.written();
        let (file, physical) = active.close();
        let result = upload::classify(&self.ctx.data, &self.ctx.blobs, &file.id, &physical);
        match &result {
            Ok(outcome) => {
                let user = self.user.clone().unwrap_or_default();
                let disk = self.ctx.blobs.size_on_disk(&physical).unwrap_or(0);
                self.ctx
                    .logger
                    .upload_closed(&user, &file.id, &format!("{:?}", outcome), nbytes);
                if let Err(e) = self.ctx.history.add_entry(UploadLogEntry::record(
                    &user, &file.id, &physical, *outcome, nbytes, disk,
                )) {
                    self.ctx.logger.error("upload history", &e.to_string());
                }
            }
            Err(e) => self.ctx.logger.error("classify upload", &e.to_string()),
        }
        self.ctx.locks.unmark(&physical);
        Some(result)
    }

    fn bad_request(&mut self, err: ProtoError) -> Action {
        self.bad_requests += 1;
        let reply = envelope(&err);
        if self.bad_requests >= MAX_BAD_REQUESTS {
            self.state = State::Closed;
            Action::HangupAfter(reply)
        } else {
            Action::Reply(reply)
        }
    }

    fn hangup(&mut self) -> Action {
        self.state = State::Closed;
        Action::Hangup
    }

    fn require_user(&self) -> ProtoResult<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| ProtoError::NoAccess("not logged in".into()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn envelope(err: &ProtoError) -> Response {
    Response::Error(ErrMsg {
        code: err.code(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{hex_digest, ChecksumType};
    use crate::error::ErrorCode;
    use crate::model::UserRec;
    use crate::protocol::{
        Close, CreateDirectory, CreateFile, CreateProject, Done, Login, Logout, SendBytes, Stat,
        Upload,
    };
    use crate::store::{Files, MemStore};
    use tempfile::TempDir;

    struct Rig {
        _tmp: TempDir,
        ctx: SessionCtx,
        store: std::sync::Arc<MemStore>,
    }

    fn rig() -> Rig {
        let tmp = TempDir::new().unwrap();
        let store = MemStore::shared();
        store.add_user(UserRec {
            id: "alice".into(),
            apikey: "alice-key".into(),
        });
        let ctx = SessionCtx::new(tmp.path(), DataBundle::backed_by(store.clone()));
        Rig {
            _tmp: tmp,
            ctx,
            store,
        }
    }

    fn send(session: &mut Session, req: Request) -> Action {
        session.handle_frame(&req.encode().unwrap())
    }

    fn reply(session: &mut Session, req: Request) -> Response {
        match send(session, req) {
            Action::Reply(resp) => resp,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    fn login(session: &mut Session) {
        let resp = reply(
            session,
            Request::Login(Login {
                user: "alice".into(),
                apikey: "alice-key".into(),
            }),
        );
        assert_eq!(resp, Response::Login(LoginResp {}));
    }

    /// Login, create project + directory + file, return (dir_id, file_id).
    fn provision(session: &mut Session, content: &[u8]) -> (String, String) {
        login(session);
        let Response::CreateProject(p) = reply(
            session,
            Request::CreateProject(CreateProject { name: "P1".into() }),
        ) else {
            panic!("create project failed");
        };
        let Response::CreateDirectory(d) = reply(
            session,
            Request::CreateDirectory(CreateDirectory {
                project_id: p.project_id.clone(),
                path: "P1/d1".into(),
            }),
        ) else {
            panic!("create directory failed");
        };
        let Response::CreateFile(f) = reply(
            session,
            Request::CreateFile(CreateFile {
                project_id: p.project_id,
                directory_id: d.directory_id.clone(),
                name: "a.txt".into(),
                checksum: hex_digest(content, ChecksumType::Blake3),
                size: content.len() as u64,
            }),
        ) else {
            panic!("create file failed");
        };
        (d.directory_id, f.file_id)
    }

    #[test]
    fn rejects_commands_before_login() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        let resp = reply(&mut session, Request::Stat(Stat { file_id: "x".into() }));
        let Response::Error(e) = resp else { panic!() };
        assert_eq!(e.code, ErrorCode::NoAccess);
        assert_eq!(session.state(), State::Start);
    }

    #[test]
    fn bad_credentials_terminate_after_threshold() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        for i in 1..MAX_BAD_REQUESTS {
            let action = send(
                &mut session,
                Request::Login(Login {
                    user: "alice".into(),
                    apikey: "wrong".into(),
                }),
            );
            assert!(matches!(action, Action::Reply(Response::Error(_))), "try {}", i);
            assert_eq!(session.state(), State::Start);
        }
        let action = send(
            &mut session,
            Request::Login(Login {
                user: "alice".into(),
                apikey: "wrong".into(),
            }),
        );
        assert!(matches!(action, Action::HangupAfter(Response::Error(_))));
        assert_eq!(session.state(), State::Closed);
    }

    #[test]
    fn successful_request_resets_bad_counter() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        for _ in 0..MAX_BAD_REQUESTS - 1 {
            send(
                &mut session,
                Request::Login(Login {
                    user: "alice".into(),
                    apikey: "wrong".into(),
                }),
            );
        }
        login(&mut session);
        assert_eq!(session.bad_requests, 0);
        assert_eq!(session.state(), State::Command);
    }

    #[test]
    fn create_project_is_idempotent() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        login(&mut session);
        let Response::CreateProject(first) = reply(
            &mut session,
            Request::CreateProject(CreateProject { name: "P1".into() }),
        ) else {
            panic!()
        };
        let Response::CreateProject(second) = reply(
            &mut session,
            Request::CreateProject(CreateProject { name: "P1".into() }),
        ) else {
            panic!()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn create_directory_rejects_path_outside_project() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        login(&mut session);
        let Response::CreateProject(p) = reply(
            &mut session,
            Request::CreateProject(CreateProject { name: "P1".into() }),
        ) else {
            panic!()
        };
        for path in ["Q1/d1", "P1/../escape", "P1//d1"] {
            let resp = reply(
                &mut session,
                Request::CreateDirectory(CreateDirectory {
                    project_id: p.project_id.clone(),
                    path: path.into(),
                }),
            );
            let Response::Error(e) = resp else {
                panic!("path {:?} should be rejected", path)
            };
            assert_eq!(e.code, ErrorCode::Invalid);
        }
    }

    #[test]
    fn scenario_create_upload_verify() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut session, b"hello");

        let sum = hex_digest(b"hello", ChecksumType::Blake3);
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!("upload refused")
        };
        assert_eq!(up.offset, 0);
        assert_eq!(session.state(), State::Uploading);

        let Response::Send(sent) = reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hello".to_vec(),
            }),
        ) else {
            panic!("send refused")
        };
        assert_eq!(sent.bytes_written, 5);

        let resp = reply(&mut session, Request::Done(Done {}));
        assert_eq!(resp, Response::Done(DoneResp {}));
        assert_eq!(session.state(), State::Command);

        let stored = Files::by_id(r.store.as_ref(), &file_id).unwrap().unwrap();
        assert!(stored.current);
        assert_eq!(stored.uploaded, 5);
        assert!(!r.ctx.locks.is_marked(&up.file_id));

        let entries = r.ctx.history.read_log().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, UploadOutcome::Verified);
    }

    #[test]
    fn upload_mid_flight_resumes_at_disk_offset() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut session, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);

        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum.clone(),
                size: 5,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hel".to_vec(),
            }),
        );
        // connection drops without Done
        drop(session);

        let stored = Files::by_id(r.store.as_ref(), &file_id).unwrap().unwrap();
        assert_eq!(stored.uploaded, 3);
        assert!(!stored.current);
        assert!(!r.ctx.locks.is_marked(&up.file_id));

        let mut session = Session::new(r.ctx.clone());
        login(&mut session);
        let Response::Upload(resumed) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!()
        };
        assert_eq!(resumed.offset, 3);

        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: resumed.file_id.clone(),
                bytes: b"lo".to_vec(),
            }),
        );
        reply(&mut session, Request::Done(Done {}));
        let stored = Files::by_id(r.store.as_ref(), &file_id).unwrap().unwrap();
        assert!(stored.current);
    }

    #[test]
    fn second_uploader_gets_in_use() {
        let r = rig();
        let mut first = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut first, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);

        let Response::Upload(_) = reply(
            &mut first,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum.clone(),
                size: 5,
            }),
        ) else {
            panic!()
        };

        let mut second = Session::new(r.ctx.clone());
        login(&mut second);
        let resp = reply(
            &mut second,
            Request::Upload(Upload {
                file_id,
                checksum: sum,
                size: 5,
            }),
        );
        let Response::Error(e) = resp else { panic!() };
        assert_eq!(e.code, ErrorCode::InUse);
        assert_eq!(second.state(), State::Command);
    }

    #[test]
    fn upload_rejects_changed_size() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        let (_dir, file_id) = provision(&mut session, b"hello");
        let resp = reply(
            &mut session,
            Request::Upload(Upload {
                file_id,
                checksum: hex_digest(b"hello", ChecksumType::Blake3),
                size: 6,
            }),
        );
        let Response::Error(e) = resp else { panic!() };
        assert_eq!(e.code, ErrorCode::Invalid);
        assert_eq!(session.state(), State::Command);
    }

    #[test]
    fn overrun_aborts_transfer_and_releases_lock() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut session, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id,
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!()
        };
        let resp = reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hello-too-long".to_vec(),
            }),
        );
        let Response::Error(e) = resp else { panic!() };
        assert_eq!(e.code, ErrorCode::Invalid);
        assert_eq!(session.state(), State::Command);
        assert!(!r.ctx.locks.is_marked(&up.file_id));
    }

    #[test]
    fn logout_mid_upload_records_progress() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut session, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hel".to_vec(),
            }),
        );
        let resp = reply(&mut session, Request::Logout(Logout {}));
        assert_eq!(resp, Response::Logout(LogoutResp {}));
        assert_eq!(session.state(), State::Start);
        assert!(!r.ctx.locks.is_marked(&up.file_id));
        let stored = Files::by_id(r.store.as_ref(), &file_id).unwrap().unwrap();
        assert_eq!(stored.uploaded, 3);
    }

    #[test]
    fn version_chain_hides_parent_after_verify() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (dir_id, first_id) = provision(&mut session, b"hello");
        let sum1 = hex_digest(b"hello", ChecksumType::Blake3);

        // upload v1 to completion
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: first_id.clone(),
                checksum: sum1,
                size: 5,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hello".to_vec(),
            }),
        );
        reply(&mut session, Request::Done(Done {}));

        // same path, new content
        let project = {
            let p = r.ctx.data.projects.by_name("P1", "alice").unwrap().unwrap();
            p.id
        };
        let sum2 = hex_digest(b"world!", ChecksumType::Blake3);
        let Response::CreateFile(second) = reply(
            &mut session,
            Request::CreateFile(CreateFile {
                project_id: project,
                directory_id: dir_id,
                name: "a.txt".into(),
                checksum: sum2.clone(),
                size: 6,
            }),
        ) else {
            panic!()
        };
        let stored = Files::by_id(r.store.as_ref(), &second.file_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.parent, first_id);

        let Response::Upload(up2) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: second.file_id.clone(),
                checksum: sum2,
                size: 6,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up2.file_id.clone(),
                bytes: b"world!".to_vec(),
            }),
        );
        reply(&mut session, Request::Done(Done {}));

        let old = Files::by_id(r.store.as_ref(), &first_id).unwrap().unwrap();
        let new = Files::by_id(r.store.as_ref(), &second.file_id)
            .unwrap()
            .unwrap();
        assert!(!old.current);
        assert!(new.current);
    }

    #[test]
    fn duplicate_create_file_returns_same_id() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (dir_id, first_id) = provision(&mut session, b"hello");
        let project = r.ctx.data.projects.by_name("P1", "alice").unwrap().unwrap();

        let Response::CreateFile(second) = reply(
            &mut session,
            Request::CreateFile(CreateFile {
                project_id: project.id,
                directory_id: dir_id,
                name: "a.txt".into(),
                checksum: hex_digest(b"hello", ChecksumType::Blake3),
                size: 5,
            }),
        ) else {
            panic!()
        };
        assert_eq!(second.file_id, first_id);
    }

    #[test]
    fn identical_content_elsewhere_is_deduplicated() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, first_id) = provision(&mut session, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);

        // finish the first upload so its bytes are reusable
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: first_id.clone(),
                checksum: sum.clone(),
                size: 5,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hello".to_vec(),
            }),
        );
        reply(&mut session, Request::Done(Done {}));

        let project = r.ctx.data.projects.by_name("P1", "alice").unwrap().unwrap();
        let Response::CreateDirectory(d2) = reply(
            &mut session,
            Request::CreateDirectory(CreateDirectory {
                project_id: project.id.clone(),
                path: "P1/d2".into(),
            }),
        ) else {
            panic!()
        };
        let Response::CreateFile(copy) = reply(
            &mut session,
            Request::CreateFile(CreateFile {
                project_id: project.id,
                directory_id: d2.directory_id,
                name: "b.txt".into(),
                checksum: sum.clone(),
                size: 5,
            }),
        ) else {
            panic!()
        };
        let copy_rec = Files::by_id(r.store.as_ref(), &copy.file_id).unwrap().unwrap();
        assert_eq!(copy_rec.uses, first_id);

        // the blob is already complete, so the resume offset equals size
        let Response::Upload(up2) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: copy.file_id.clone(),
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!()
        };
        assert_eq!(up2.file_id, first_id);
        assert_eq!(up2.offset, 5);
        reply(&mut session, Request::Done(Done {}));

        let copy_rec = Files::by_id(r.store.as_ref(), &copy.file_id).unwrap().unwrap();
        assert!(copy_rec.current);
        assert_eq!(copy_rec.uploaded, 5);
    }

    #[test]
    fn close_during_upload_classifies_and_hangs_up() {
        let r = rig();
        let mut session = Session::new(r.ctx.clone());
        let (_dir, file_id) = provision(&mut session, b"hello");
        let sum = hex_digest(b"hello", ChecksumType::Blake3);
        let Response::Upload(up) = reply(
            &mut session,
            Request::Upload(Upload {
                file_id: file_id.clone(),
                checksum: sum,
                size: 5,
            }),
        ) else {
            panic!()
        };
        reply(
            &mut session,
            Request::SendBytes(SendBytes {
                file_id: up.file_id.clone(),
                bytes: b"hel".to_vec(),
            }),
        );
        let action = send(&mut session, Request::Close(Close {}));
        assert!(matches!(action, Action::Hangup));
        assert!(!r.ctx.locks.is_marked(&up.file_id));
        let stored = Files::by_id(r.store.as_ref(), &file_id).unwrap().unwrap();
        assert_eq!(stored.uploaded, 3);
    }

    #[test]
    fn garbage_frames_follow_bad_request_path() {
        let r = rig();
        let mut session = Session::new(r.ctx);
        login(&mut session);
        for _ in 0..MAX_BAD_REQUESTS - 1 {
            let action = session.handle_frame(&[0xEE, PROTOCOL_VERSION, 1, 2, 3]);
            assert!(matches!(action, Action::Reply(Response::Error(_))));
            assert_eq!(session.state(), State::Command);
        }
        let action = session.handle_frame(&[0xEE, PROTOCOL_VERSION, 1, 2, 3]);
        assert!(matches!(action, Action::HangupAfter(Response::Error(_))));
    }
}
