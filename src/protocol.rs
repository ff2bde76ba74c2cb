//! Shared protocol constants and the message catalogue for the Depot framed transport

use crate::codec;
use crate::error::ErrorCode;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Codec-level protocol version, the second byte of every message.
pub const PROTOCOL_VERSION: u8 = 1;

// Maximum serialized payload size (16MB) - prevents DoS via memory exhaustion.
// SendBytes chunks are bounded well below this by well-behaved clients.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Consecutive malformed/rejected requests tolerated before the connection
/// is terminated.
pub const MAX_BAD_REQUESTS: u32 = 10;

// Message kind IDs (keep numeric stable for client compat)
pub mod kind {
    pub const LOGIN: u8 = 1;
    pub const LOGOUT: u8 = 2;
    pub const CREATE_PROJECT: u8 = 3;
    pub const CREATE_DIRECTORY: u8 = 4;
    pub const CREATE_FILE: u8 = 5;
    pub const UPLOAD: u8 = 6;
    pub const SEND_BYTES: u8 = 7;
    pub const DONE: u8 = 8;
    pub const STAT: u8 = 9;
    pub const CLOSE: u8 = 10;
    pub const ERROR: u8 = 11;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub user: String,
    pub apikey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResp {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logout {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutResp {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProject {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProjectResp {
    pub project_id: String,
    pub directory_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDirectory {
    pub project_id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDirectoryResp {
    pub directory_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFile {
    pub project_id: String,
    pub directory_id: String,
    pub name: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFileResp {
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub file_id: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResp {
    /// Resolved physical file ID; clients echo this in `SendBytes`.
    pub file_id: String,
    /// Byte position the client should resume sending from.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendBytes {
    pub file_id: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResp {
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Done {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneResp {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatResp {
    pub file_id: String,
    pub name: String,
    pub datadirs: Vec<String>,
    pub checksum: String,
    pub size: u64,
    pub birthtime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Close {}

/// Error envelope sent in place of the normal response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrMsg {
    pub code: ErrorCode,
    pub message: String,
}

/// One decoded client request, tagged by the kind byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Login(Login),
    Logout(Logout),
    CreateProject(CreateProject),
    CreateDirectory(CreateDirectory),
    CreateFile(CreateFile),
    Upload(Upload),
    SendBytes(SendBytes),
    Done(Done),
    Stat(Stat),
    Close(Close),
}

impl Request {
    pub fn kind(&self) -> u8 {
        match self {
            Request::Login(_) => kind::LOGIN,
            Request::Logout(_) => kind::LOGOUT,
            Request::CreateProject(_) => kind::CREATE_PROJECT,
            Request::CreateDirectory(_) => kind::CREATE_DIRECTORY,
            Request::CreateFile(_) => kind::CREATE_FILE,
            Request::Upload(_) => kind::UPLOAD,
            Request::SendBytes(_) => kind::SEND_BYTES,
            Request::Done(_) => kind::DONE,
            Request::Stat(_) => kind::STAT,
            Request::Close(_) => kind::CLOSE,
        }
    }

    /// Decode a payload into the concrete request selected by the kind byte.
    pub fn decode(kind_byte: u8, payload: &[u8]) -> Result<Request> {
        let req = match kind_byte {
            kind::LOGIN => Request::Login(codec::decode(payload)?),
            kind::LOGOUT => Request::Logout(codec::decode(payload)?),
            kind::CREATE_PROJECT => Request::CreateProject(codec::decode(payload)?),
            kind::CREATE_DIRECTORY => Request::CreateDirectory(codec::decode(payload)?),
            kind::CREATE_FILE => Request::CreateFile(codec::decode(payload)?),
            kind::UPLOAD => Request::Upload(codec::decode(payload)?),
            kind::SEND_BYTES => Request::SendBytes(codec::decode(payload)?),
            kind::DONE => Request::Done(codec::decode(payload)?),
            kind::STAT => Request::Stat(codec::decode(payload)?),
            kind::CLOSE => Request::Close(codec::decode(payload)?),
            other => bail!("unknown request kind: {}", other),
        };
        Ok(req)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Request::Login(m) => codec::encode(kind::LOGIN, PROTOCOL_VERSION, m),
            Request::Logout(m) => codec::encode(kind::LOGOUT, PROTOCOL_VERSION, m),
            Request::CreateProject(m) => codec::encode(kind::CREATE_PROJECT, PROTOCOL_VERSION, m),
            Request::CreateDirectory(m) => {
                codec::encode(kind::CREATE_DIRECTORY, PROTOCOL_VERSION, m)
            }
            Request::CreateFile(m) => codec::encode(kind::CREATE_FILE, PROTOCOL_VERSION, m),
            Request::Upload(m) => codec::encode(kind::UPLOAD, PROTOCOL_VERSION, m),
            Request::SendBytes(m) => codec::encode(kind::SEND_BYTES, PROTOCOL_VERSION, m),
            Request::Done(m) => codec::encode(kind::DONE, PROTOCOL_VERSION, m),
            Request::Stat(m) => codec::encode(kind::STAT, PROTOCOL_VERSION, m),
            Request::Close(m) => codec::encode(kind::CLOSE, PROTOCOL_VERSION, m),
        }
    }
}

/// One server reply. Replies reuse the kind byte of the request they answer;
/// the error envelope has its own kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Login(LoginResp),
    Logout(LogoutResp),
    CreateProject(CreateProjectResp),
    CreateDirectory(CreateDirectoryResp),
    CreateFile(CreateFileResp),
    Upload(UploadResp),
    Send(SendResp),
    Done(DoneResp),
    Stat(StatResp),
    Error(ErrMsg),
}

impl Response {
    pub fn kind(&self) -> u8 {
        match self {
            Response::Login(_) => kind::LOGIN,
            Response::Logout(_) => kind::LOGOUT,
            Response::CreateProject(_) => kind::CREATE_PROJECT,
            Response::CreateDirectory(_) => kind::CREATE_DIRECTORY,
            Response::CreateFile(_) => kind::CREATE_FILE,
            Response::Upload(_) => kind::UPLOAD,
            Response::Send(_) => kind::SEND_BYTES,
            Response::Done(_) => kind::DONE,
            Response::Stat(_) => kind::STAT,
            Response::Error(_) => kind::ERROR,
        }
    }

    pub fn decode(kind_byte: u8, payload: &[u8]) -> Result<Response> {
        let resp = match kind_byte {
            kind::LOGIN => Response::Login(codec::decode(payload)?),
            kind::LOGOUT => Response::Logout(codec::decode(payload)?),
            kind::CREATE_PROJECT => Response::CreateProject(codec::decode(payload)?),
            kind::CREATE_DIRECTORY => Response::CreateDirectory(codec::decode(payload)?),
            kind::CREATE_FILE => Response::CreateFile(codec::decode(payload)?),
            kind::UPLOAD => Response::Upload(codec::decode(payload)?),
            kind::SEND_BYTES => Response::Send(codec::decode(payload)?),
            kind::DONE => Response::Done(codec::decode(payload)?),
            kind::STAT => Response::Stat(codec::decode(payload)?),
            kind::ERROR => Response::Error(codec::decode(payload)?),
            other => bail!("unknown response kind: {}", other),
        };
        Ok(resp)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Response::Login(m) => codec::encode(kind::LOGIN, PROTOCOL_VERSION, m),
            Response::Logout(m) => codec::encode(kind::LOGOUT, PROTOCOL_VERSION, m),
            Response::CreateProject(m) => codec::encode(kind::CREATE_PROJECT, PROTOCOL_VERSION, m),
            Response::CreateDirectory(m) => {
                codec::encode(kind::CREATE_DIRECTORY, PROTOCOL_VERSION, m)
            }
            Response::CreateFile(m) => codec::encode(kind::CREATE_FILE, PROTOCOL_VERSION, m),
            Response::Upload(m) => codec::encode(kind::UPLOAD, PROTOCOL_VERSION, m),
            Response::Send(m) => codec::encode(kind::SEND_BYTES, PROTOCOL_VERSION, m),
            Response::Done(m) => codec::encode(kind::DONE, PROTOCOL_VERSION, m),
            Response::Stat(m) => codec::encode(kind::STAT, PROTOCOL_VERSION, m),
            Response::Error(m) => codec::encode(kind::ERROR, PROTOCOL_VERSION, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(req: Request) {
        let bytes = req.encode().unwrap();
        let (k, v, payload) = codec::prepare(&bytes).unwrap();
        assert_eq!(v, PROTOCOL_VERSION);
        assert_eq!(k, req.kind());
        let back = Request::decode(k, payload).unwrap();
        assert_eq!(back, req);
    }

    fn roundtrip_response(resp: Response) {
        let bytes = resp.encode().unwrap();
        let (k, v, payload) = codec::prepare(&bytes).unwrap();
        assert_eq!(v, PROTOCOL_VERSION);
        assert_eq!(k, resp.kind());
        let back = Response::decode(k, payload).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn request_round_trips() {
        roundtrip_request(Request::Login(Login {
            user: "alice".into(),
            apikey: "key-123".into(),
        }));
        roundtrip_request(Request::Logout(Logout {}));
        roundtrip_request(Request::CreateProject(CreateProject { name: "P1".into() }));
        roundtrip_request(Request::CreateDirectory(CreateDirectory {
            project_id: "p".into(),
            path: "P1/d1".into(),
        }));
        roundtrip_request(Request::CreateFile(CreateFile {
            project_id: "p".into(),
            directory_id: "d".into(),
            name: "a.txt".into(),
            checksum: "deadbeef".into(),
            size: 5,
        }));
        roundtrip_request(Request::Upload(Upload {
            file_id: "f".into(),
            checksum: "deadbeef".into(),
            size: 5,
        }));
        roundtrip_request(Request::SendBytes(SendBytes {
            file_id: "f".into(),
            bytes: b"hello".to_vec(),
        }));
        roundtrip_request(Request::Done(Done {}));
        roundtrip_request(Request::Stat(Stat { file_id: "f".into() }));
        roundtrip_request(Request::Close(Close {}));
    }

    #[test]
    fn response_round_trips() {
        roundtrip_response(Response::Login(LoginResp {}));
        roundtrip_response(Response::Logout(LogoutResp {}));
        roundtrip_response(Response::CreateProject(CreateProjectResp {
            project_id: "p".into(),
            directory_id: "d".into(),
        }));
        roundtrip_response(Response::CreateDirectory(CreateDirectoryResp {
            directory_id: "d".into(),
        }));
        roundtrip_response(Response::CreateFile(CreateFileResp { file_id: "f".into() }));
        roundtrip_response(Response::Upload(UploadResp {
            file_id: "f".into(),
            offset: 3,
        }));
        roundtrip_response(Response::Send(SendResp { bytes_written: 5 }));
        roundtrip_response(Response::Done(DoneResp {}));
        roundtrip_response(Response::Stat(StatResp {
            file_id: "f".into(),
            name: "a.txt".into(),
            datadirs: vec!["d".into()],
            checksum: "deadbeef".into(),
            size: 5,
            birthtime: Utc::now(),
            mtime: Utc::now(),
        }));
        roundtrip_response(Response::Error(ErrMsg {
            code: ErrorCode::InUse,
            message: "file is locked".into(),
        }));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(Request::decode(0xEE, &[]).is_err());
        assert!(Response::decode(0xEE, &[]).is_err());
    }
}
