//! Checksum and hashing utilities

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Available checksum algorithms. Digests travel as lowercase hex; the
/// algorithm is inferred from the digest length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Blake3,
    Md5, // For compatibility
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Blake3
    }
}

impl ChecksumType {
    /// Pick the algorithm a hex digest was produced with, by its length.
    pub fn for_digest(hex: &str) -> Option<ChecksumType> {
        match hex.len() {
            64 => Some(ChecksumType::Blake3),
            32 => Some(ChecksumType::Md5),
            _ => None,
        }
    }
}

/// Hex digest of an in-memory buffer.
pub fn hex_digest(data: &[u8], checksum_type: ChecksumType) -> String {
    match checksum_type {
        ChecksumType::Blake3 => blake3::hash(data).to_hex().to_string(),
        ChecksumType::Md5 => format!("{:x}", md5::compute(data)),
    }
}

/// Hex digest of a file, streamed in 64KB reads.
pub fn file_digest(path: &Path, checksum_type: ChecksumType) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    match checksum_type {
        ChecksumType::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
        ChecksumType::Md5 => {
            let mut ctx = md5::Context::new();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                ctx.consume(&buf[..n]);
            }
            Ok(format!("{:x}", ctx.compute()))
        }
    }
}

/// Whether the file's content digest equals `expected`, selecting the
/// algorithm by the expected digest's length. An unrecognized digest shape
/// never matches.
pub fn file_matches(path: &Path, expected: &str) -> io::Result<bool> {
    let Some(t) = ChecksumType::for_digest(expected) else {
        return Ok(false);
    };
    let actual = file_digest(path, t)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}
