//! Tokio transport for the depot daemon: accept loop and framed I/O.
//!
//! One task per accepted connection; each task owns its session exclusively
//! and blocks on the next frame. Reads carry no deadline by design — the
//! protocol has no idle timeout, so a stalled client simply holds its session
//! (and any lock) until the connection drops. Writes are bounded so a dead
//! peer cannot wedge a task forever.

use crate::codec;
use crate::session::{Action, Session, SessionCtx};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

pub mod timeouts {
    // Base timeout for writes (ms)
    pub const WRITE_BASE_MS: u64 = 500;

    // Additional timeout per MB of data (ms)
    pub const PER_MB_MS: u64 = 1;

    // Calculate write deadline based on payload size (ms)
    pub fn write_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        WRITE_BASE_MS + mb * PER_MB_MS
    }
}

/// Read one transport frame and return the codec bytes inside it.
pub async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut hdr = [0u8; codec::FRAME_HEADER_LEN];
    stream.read_exact(&mut hdr).await?;
    let len = codec::parse_frame_header(&hdr)? as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok(payload)
}

/// Write one transport frame with a payload-scaled deadline.
pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let ms = timeouts::write_deadline_ms(payload.len());
    match timeout(Duration::from_millis(ms), async {
        let hdr = codec::build_frame_header(payload.len() as u32);
        stream.write_all(&hdr).await?;
        if !payload.is_empty() {
            stream.write_all(payload).await?;
        }
        stream.flush().await?;
        Ok::<(), anyhow::Error>(())
    })
    .await
    {
        Ok(result) => result,
        Err(_) => anyhow::bail!("frame write timeout ({} ms)", ms),
    }
}

/// Serve plaintext connections. Only for trusted networks; the daemon binary
/// requires an explicit flag to reach this path.
pub async fn serve(bind: &str, ctx: SessionCtx) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    eprintln!(
        "depotd listening on {} root={}",
        bind,
        ctx.blobs.root().display()
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.logger.session_open(&peer.to_string());
            let mut session = Session::new(ctx);
            if let Err(e) = run_session(stream, &mut session).await {
                eprintln!("session {}: {}", peer, e);
            }
            session.teardown();
        });
    }
}

/// Serve TLS connections.
pub async fn serve_with_tls(
    bind: &str,
    ctx: SessionCtx,
    tls_config: rustls::ServerConfig,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls_config));
    eprintln!(
        "depotd listening on {} (tls) root={}",
        bind,
        ctx.blobs.root().display()
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let acceptor = acceptor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("tls accept {}: {}", peer, e);
                    return;
                }
            };
            ctx.logger.session_open(&peer.to_string());
            let mut session = Session::new(ctx);
            if let Err(e) = run_session(tls_stream, &mut session).await {
                eprintln!("session {}: {}", peer, e);
            }
            session.teardown();
        });
    }
}

/// Pump frames through a session until it hangs up or the peer goes away.
/// The caller runs `teardown` afterwards so an abrupt disconnect still
/// classifies partial progress and releases any held lock.
pub async fn run_session<S>(mut stream: S, session: &mut Session) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        // EOF and frame-level garbage both end the connection; per-message
        // malformation is the session's bad-request path instead
        let frame = match read_frame(&mut stream).await {
            Ok(f) => f,
            Err(_) => break,
        };
        match session.handle_frame(&frame) {
            Action::Reply(resp) => {
                write_frame(&mut stream, &resp.encode()?).await?;
            }
            Action::HangupAfter(resp) => {
                let _ = write_frame(&mut stream, &resp.encode()?).await;
                break;
            }
            Action::Hangup => break,
        }
    }
    Ok(())
}
