//! OTA wire model: the CoAP message structure the update protocol rides on.
//!
//! Byte-level CoAP encoding lives in the transport. This module describes a
//! message after decoding: type, code, id, token, options and payload, plus
//! the option numbers and value encodings the update protocol defines.
//! Changing an option number here is a breaking protocol change.

use bytes::Bytes;
use std::fmt;

// ── Option Numbers ────────────────────────────────────────────────────────────

/// CoAP option numbers used by the update protocol.
pub mod option {
    /// Standard CoAP Uri-Path.
    pub const URI_PATH: u16 = 11;

    /// 1-based chunk index (requests) or contiguous watermark (acks). Uint.
    pub const CHUNK_INDEX: u16 = 2049;
    /// Receive window size in chunks. Response-only. Uint.
    pub const WINDOW_SIZE: u16 = 2053;
    /// Total file size (Start request) or resume offset (Start response). Uint.
    pub const FILE_SIZE: u16 = 2057;
    /// SHA-256 digest of the whole file. Presence makes the update resumable.
    pub const FILE_SHA256: u16 = 2061;
    /// Chunk size in bytes. Uint, multiple of 4.
    pub const CHUNK_SIZE: u16 = 2065;
    /// Zero-length flag: drop previously transferred data.
    pub const DISCARD_DATA: u16 = 2069;
    /// Zero-length flag: abort the update.
    pub const CANCEL_UPDATE: u16 = 2073;
}

/// Uri-Path values of the update resources.
pub mod path {
    pub const START: &str = "S";
    pub const CHUNK: &str = "C";
    pub const FINISH: &str = "F";
    pub const ACK: &str = "A";
}

/// Length of the File-SHA-256 digest.
pub const HASH_SIZE: usize = 32;

/// Maximum encoded length of a uint option value.
pub const MAX_UINT_LEN: usize = 4;

/// Transport-assigned CoAP message id.
pub type MessageId = u16;

// ── Message Type ──────────────────────────────────────────────────────────────

/// CoAP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoapType {
    /// Confirmable: the receiver must acknowledge.
    Con = 0,
    /// Non-confirmable.
    Non = 1,
    /// Acknowledgment, optionally carrying a piggybacked response.
    Ack = 2,
    /// Reset: the receiver could not process a message.
    Rst = 3,
}

impl TryFrom<u8> for CoapType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CoapType::Con),
            1 => Ok(CoapType::Non),
            2 => Ok(CoapType::Ack),
            3 => Ok(CoapType::Rst),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<CoapType> for u8 {
    fn from(t: CoapType) -> u8 {
        t as u8
    }
}

// ── Message Code ──────────────────────────────────────────────────────────────

/// CoAP code: 3-bit class, 5-bit detail.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoapCode(pub u8);

impl CoapCode {
    pub const EMPTY: CoapCode = CoapCode::new(0, 0);
    pub const GET: CoapCode = CoapCode::new(0, 1);
    pub const POST: CoapCode = CoapCode::new(0, 2);

    pub const CREATED: CoapCode = CoapCode::new(2, 1);
    pub const CHANGED: CoapCode = CoapCode::new(2, 4);

    pub const BAD_REQUEST: CoapCode = CoapCode::new(4, 0);
    pub const INTERNAL_SERVER_ERROR: CoapCode = CoapCode::new(5, 0);
    pub const SERVICE_UNAVAILABLE: CoapCode = CoapCode::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> Self {
        CoapCode((class << 5) | (detail & 0x1f))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(self) -> bool {
        self == CoapCode::EMPTY
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    pub fn is_response(self) -> bool {
        (2..=5).contains(&self.class())
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoapCode({self})")
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// A single option instance. Repeatable options appear once per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Bytes,
}

/// Encode a uint option value: big-endian, leading zero bytes stripped.
/// Zero encodes as an empty value.
pub fn encode_uint(value: u32) -> Bytes {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Bytes::copy_from_slice(&bytes[skip..])
}

/// Decode a uint option value.
pub fn decode_uint(number: u16, value: &[u8]) -> Result<u32, WireError> {
    if value.len() > MAX_UINT_LEN {
        return Err(WireError::UintTooLong {
            option: number,
            len: value.len(),
        });
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

// ── Message ───────────────────────────────────────────────────────────────────

/// A decoded CoAP message.
///
/// `id` is `None` until the channel assigns one on send. Options are kept
/// ordered by number; repeated numbers keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub ty: CoapType,
    pub code: CoapCode,
    pub id: Option<MessageId>,
    pub token: Bytes,
    pub options: Vec<CoapOption>,
    pub payload: Bytes,
}

impl CoapMessage {
    pub fn new(ty: CoapType, code: CoapCode) -> Self {
        Self {
            ty,
            code,
            id: None,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Empty acknowledgment of message `id`.
    pub fn empty_ack(id: MessageId) -> Self {
        Self::new(CoapType::Ack, CoapCode::EMPTY).with_id(id)
    }

    /// Reset of message `id`.
    pub fn reset(id: MessageId) -> Self {
        Self::new(CoapType::Rst, CoapCode::EMPTY).with_id(id)
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_option(mut self, number: u16, value: impl Into<Bytes>) -> Self {
        self.add_option(number, value);
        self
    }

    pub fn with_uint_option(self, number: u16, value: u32) -> Self {
        self.with_option(number, encode_uint(value))
    }

    pub fn with_empty_option(self, number: u16) -> Self {
        self.with_option(number, Bytes::new())
    }

    pub fn with_uri_path(self, path: &str) -> Self {
        self.with_option(option::URI_PATH, Bytes::copy_from_slice(path.as_bytes()))
    }

    /// Insert an option after any existing options with a number `<= number`.
    pub fn add_option(&mut self, number: u16, value: impl Into<Bytes>) {
        let pos = self.options.partition_point(|o| o.number <= number);
        self.options.insert(
            pos,
            CoapOption {
                number,
                value: value.into(),
            },
        );
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.options.iter().any(|o| o.number == number)
    }

    /// Value of the first instance of option `number`.
    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.value.as_ref())
    }

    /// First instance of option `number` decoded as a uint.
    pub fn uint_option(&self, number: u16) -> Result<Option<u32>, WireError> {
        self.option(number)
            .map(|v| decode_uint(number, v))
            .transpose()
    }

    /// Whether a zero-length flag option is present.
    /// A flag carrying a value is malformed.
    pub fn flag_option(&self, number: u16) -> Result<bool, WireError> {
        match self.option(number) {
            None => Ok(false),
            Some([]) => Ok(true),
            Some(v) => Err(WireError::NonEmptyFlag {
                option: number,
                len: v.len(),
            }),
        }
    }

    /// Uri-Path segments joined with '/'.
    pub fn uri_path(&self) -> String {
        self.options
            .iter()
            .filter(|o| o.number == option::URI_PATH)
            .map(|o| String::from_utf8_lossy(&o.value).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting decoded message fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("option {option}: uint value of {len} bytes exceeds {}", MAX_UINT_LEN)]
    UintTooLong { option: u16, len: usize },

    #[error("option {option}: flag option carries {len} bytes, expected none")]
    NonEmptyFlag { option: u16, len: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
