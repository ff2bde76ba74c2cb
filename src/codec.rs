//! Wire codec: transport framing plus the `[type][version][payload]` header.
//!
//! Two layers live here. The outer transport frame is `MAGIC (4) | LENGTH (4)`
//! followed by the codec bytes, so a reader can pull exactly one message off
//! the stream. The codec bytes themselves are a 2-byte header (message kind,
//! protocol version) followed by the bincode-serialized payload.

use crate::protocol::MAX_PAYLOAD_SIZE;
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

// Transport header constants
pub const MAGIC: &[u8; 4] = b"DPOT";
pub const FRAME_HEADER_LEN: usize = 8;

/// Codec header length: kind byte plus version byte.
pub const CODEC_HEADER_LEN: usize = 2;

/// Serialize a payload under a `[kind][version]` header.
pub fn encode<T: Serialize>(kind: u8, version: u8, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value).context("serialize payload")?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        bail!(
            "payload too large: {} bytes (max: {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        );
    }
    let mut out = Vec::with_capacity(CODEC_HEADER_LEN + payload.len());
    out.push(kind);
    out.push(version);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Strip the codec header and return `(kind, version, remainder)`.
pub fn prepare(bytes: &[u8]) -> Result<(u8, u8, &[u8])> {
    if bytes.len() < CODEC_HEADER_LEN {
        bail!("message shorter than codec header");
    }
    Ok((bytes[0], bytes[1], &bytes[CODEC_HEADER_LEN..]))
}

/// Deserialize a payload previously stripped by [`prepare`].
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    bincode::deserialize(payload).context("deserialize payload")
}

/// Build transport frame header (8 bytes)
/// Format: MAGIC (4) | LENGTH (4)
pub fn build_frame_header(payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..8].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse transport frame header, returning the frame length.
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<u32> {
    if &header[0..4] != MAGIC {
        bail!("invalid magic in frame header");
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    validate_frame_size(len as usize)?;
    Ok(len)
}

/// Reject frames that would exceed the payload cap before allocating.
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_PAYLOAD_SIZE + CODEC_HEADER_LEN {
        bail!(
            "frame too large: {} bytes (max: {})",
            size,
            MAX_PAYLOAD_SIZE + CODEC_HEADER_LEN
        );
    }
    Ok(())
}
