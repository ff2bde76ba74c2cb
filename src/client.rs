//! Async client for the depot protocol.
//!
//! Thin request/response helpers over the framed transport; the E2E test
//! suite drives servers through this, and CLI tooling can build on it.

use crate::codec;
use crate::protocol::{
    Close, CreateDirectory, CreateFile, CreateProject, Done, Login, Logout, Request, Response,
    SendBytes, Stat, StatResp, Upload,
};
use crate::server::{read_frame, write_frame};
use crate::tls;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub struct Conn<S> {
    stream: S,
}

pub type TlsConn = Conn<tokio_rustls::client::TlsStream<TcpStream>>;

impl Conn<TcpStream> {
    /// Plaintext connection; pairs with a server started via `serve`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("connect {}:{}", host, port))?;
        let _ = stream.set_nodelay(true);
        Ok(Conn { stream })
    }
}

/// TLS connection with trust-on-first-use pinning of the server certificate.
pub async fn connect_tls(host: &str, port: u16) -> Result<TlsConn> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connect {}:{}", host, port))?;
    let _ = stream.set_nodelay(true);
    let config = tls::build_client_config_tofu(host, port);
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let stream = connector
        .connect(tls::server_name_for(host), stream)
        .await
        .context("tls handshake")?;
    Ok(Conn { stream })
}

impl<S: AsyncRead + AsyncWrite + Unpin> Conn<S> {
    /// Send one request and read back the server's reply, error envelopes
    /// included.
    pub async fn request(&mut self, req: &Request) -> Result<Response> {
        write_frame(&mut self.stream, &req.encode()?).await?;
        let frame = read_frame(&mut self.stream).await?;
        let (kind, _version, payload) = codec::prepare(&frame)?;
        Response::decode(kind, payload)
    }

    pub async fn login(&mut self, user: &str, apikey: &str) -> Result<()> {
        match self
            .request(&Request::Login(Login {
                user: user.to_string(),
                apikey: apikey.to_string(),
            }))
            .await?
        {
            Response::Login(_) => Ok(()),
            other => bail!("login rejected: {}", describe(&other)),
        }
    }

    pub async fn logout(&mut self) -> Result<()> {
        match self.request(&Request::Logout(Logout {})).await? {
            Response::Logout(_) => Ok(()),
            other => bail!("logout rejected: {}", describe(&other)),
        }
    }

    /// Returns `(project_id, root_directory_id)`.
    pub async fn create_project(&mut self, name: &str) -> Result<(String, String)> {
        match self
            .request(&Request::CreateProject(CreateProject {
                name: name.to_string(),
            }))
            .await?
        {
            Response::CreateProject(r) => Ok((r.project_id, r.directory_id)),
            other => bail!("create project rejected: {}", describe(&other)),
        }
    }

    pub async fn create_directory(&mut self, project_id: &str, path: &str) -> Result<String> {
        match self
            .request(&Request::CreateDirectory(CreateDirectory {
                project_id: project_id.to_string(),
                path: path.to_string(),
            }))
            .await?
        {
            Response::CreateDirectory(r) => Ok(r.directory_id),
            other => bail!("create directory rejected: {}", describe(&other)),
        }
    }

    pub async fn create_file(
        &mut self,
        project_id: &str,
        directory_id: &str,
        name: &str,
        checksum: &str,
        size: u64,
    ) -> Result<String> {
        match self
            .request(&Request::CreateFile(CreateFile {
                project_id: project_id.to_string(),
                directory_id: directory_id.to_string(),
                name: name.to_string(),
                checksum: checksum.to_string(),
                size,
            }))
            .await?
        {
            Response::CreateFile(r) => Ok(r.file_id),
            other => bail!("create file rejected: {}", describe(&other)),
        }
    }

    /// Returns `(resolved_physical_id, resume_offset)`.
    pub async fn upload(&mut self, file_id: &str, checksum: &str, size: u64) -> Result<(String, u64)> {
        match self
            .request(&Request::Upload(Upload {
                file_id: file_id.to_string(),
                checksum: checksum.to_string(),
                size,
            }))
            .await?
        {
            Response::Upload(r) => Ok((r.file_id, r.offset)),
            other => bail!("upload rejected: {}", describe(&other)),
        }
    }

    pub async fn send_bytes(&mut self, file_id: &str, bytes: &[u8]) -> Result<u64> {
        match self
            .request(&Request::SendBytes(SendBytes {
                file_id: file_id.to_string(),
                bytes: bytes.to_vec(),
            }))
            .await?
        {
            Response::Send(r) => Ok(r.bytes_written),
            other => bail!("send rejected: {}", describe(&other)),
        }
    }

    pub async fn done(&mut self) -> Result<()> {
        match self.request(&Request::Done(Done {})).await? {
            Response::Done(_) => Ok(()),
            other => bail!("done rejected: {}", describe(&other)),
        }
    }

    pub async fn stat(&mut self, file_id: &str) -> Result<StatResp> {
        match self
            .request(&Request::Stat(Stat {
                file_id: file_id.to_string(),
            }))
            .await?
        {
            Response::Stat(r) => Ok(r),
            other => bail!("stat rejected: {}", describe(&other)),
        }
    }

    /// Ask the server to drop the connection. No reply is read; the server
    /// terminates without one.
    pub async fn close(mut self) -> Result<()> {
        let req = Request::Close(Close {});
        write_frame(&mut self.stream, &req.encode()?).await?;
        Ok(())
    }
}

fn describe(resp: &Response) -> String {
    match resp {
        Response::Error(e) => format!("{:?}: {}", e.code, e.message),
        other => format!("unexpected reply kind {}", other.kind()),
    }
}
