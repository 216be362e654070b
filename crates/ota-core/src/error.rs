//! Error taxonomy of the update protocol.
//!
//! Every failure that reaches the peer is reported as an error response with a
//! JSON diagnostic payload: `{"code":<i32>,"message":"<text>"}`.

use bytes::Bytes;
use serde::Serialize;

use crate::wire::{CoapCode, WireError};

/// Diagnostic codes carried in error responses.
pub mod code {
    pub const MALFORMED: i32 = -100;
    pub const INVALID_REQUEST: i32 = -110;
    pub const INVALID_STATE: i32 = -120;
    pub const IO: i32 = -130;
    pub const TIMEOUT: i32 = -140;
    /// Used when a backend reports failure without a code of its own.
    pub const BACKEND: i32 = -150;
}

/// Failure reported by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failure to hand a message to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Option values could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    /// Well-formed but semantically invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request not acceptable in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("transport failure: {0}")]
    Io(#[from] ChannelError),

    #[error("transfer timed out")]
    Timeout,
}

#[derive(Serialize)]
struct Diagnostic<'a> {
    code: i32,
    message: &'a str,
}

impl ProtocolError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidRequest(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidState(msg.into())
    }

    /// Numeric code placed in the diagnostic payload.
    pub fn diagnostic_code(&self) -> i32 {
        match self {
            ProtocolError::Malformed(_) => code::MALFORMED,
            ProtocolError::InvalidRequest(_) => code::INVALID_REQUEST,
            ProtocolError::InvalidState(_) => code::INVALID_STATE,
            ProtocolError::Backend(e) if e.code != 0 => e.code,
            ProtocolError::Backend(_) => code::BACKEND,
            ProtocolError::Io(_) => code::IO,
            ProtocolError::Timeout => code::TIMEOUT,
        }
    }

    /// CoAP response code used when reporting this error to the peer.
    pub fn response_code(&self) -> CoapCode {
        match self {
            ProtocolError::Malformed(_)
            | ProtocolError::InvalidRequest(_)
            | ProtocolError::InvalidState(_) => CoapCode::BAD_REQUEST,
            ProtocolError::Timeout => CoapCode::SERVICE_UNAVAILABLE,
            ProtocolError::Backend(_) | ProtocolError::Io(_) => CoapCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON diagnostic payload for error responses.
    pub fn diagnostic_payload(&self) -> Bytes {
        let message = match self {
            ProtocolError::Backend(e) => e.message.clone(),
            other => other.to_string(),
        };
        let diag = Diagnostic {
            code: self.diagnostic_code(),
            message: &message,
        };
        // Serializing a plain struct of an i32 and a str cannot fail.
        serde_json::to_vec(&diag)
            .map(Bytes::from)
            .unwrap_or_default()
    }

    /// Whether the failure came from the transport rather than the request.
    pub fn is_io(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
