//! Typed errors for protocol operations.
//!
//! Every operation behind the session layer returns `ProtoError`; the session
//! maps it onto the wire error envelope and keeps the connection alive. Only
//! transport-level failures (broken socket, bad framing) travel as `anyhow`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes carried in the wire error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    Invalid,
    NoAccess,
    Exists,
    InUse,
    Internal,
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("no access: {0}")]
    NoAccess(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtoError::NotFound(_) => ErrorCode::NotFound,
            ProtoError::Invalid(_) => ErrorCode::Invalid,
            ProtoError::NoAccess(_) => ErrorCode::NoAccess,
            ProtoError::Exists(_) => ErrorCode::Exists,
            ProtoError::InUse(_) => ErrorCode::InUse,
            ProtoError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Wrap a storage or I/O failure without leaking engine details upward.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        ProtoError::Internal(format!("{}: {}", context, err))
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(ProtoError::NotFound("f".into()).code(), ErrorCode::NotFound);
        assert_eq!(ProtoError::InUse("f".into()).code(), ErrorCode::InUse);
        assert_eq!(
            ProtoError::internal("stat blob", "permission denied").code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn internal_keeps_context() {
        let e = ProtoError::internal("stat blob", "permission denied");
        assert_eq!(e.to_string(), "internal error: stat blob: permission denied");
    }
}
