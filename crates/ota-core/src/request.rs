//! Update requests: typed fields extracted from Start, Chunk and Finish
//! messages.
//!
//! Validation is pure: it looks only at the message and the chunk size
//! bounds, never at session state. State checks belong to the session.

use bytes::Bytes;

use crate::config::ChunkConfig;
use crate::error::ProtocolError;
use crate::wire::{option, CoapMessage, CoapType, HASH_SIZE};

/// Fields of a validated UpdateStart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub file_size: usize,
    pub chunk_size: usize,
    /// SHA-256 of the file. `Some` makes the update resumable.
    pub file_hash: Option<[u8; HASH_SIZE]>,
    pub discard_data: bool,
}

/// Fields of a validated UpdateChunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// 1-based chunk index as sent by the peer. Range is checked by the session.
    pub index: u32,
    pub data: Bytes,
}

/// Fields of a validated UpdateFinish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinishRequest {
    pub cancel: bool,
    pub discard_data: bool,
}

/// A validated update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateRequest {
    Start(StartRequest),
    Chunk(ChunkRequest),
    Finish(FinishRequest),
}

impl UpdateRequest {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateRequest::Start(_) => "UpdateStart",
            UpdateRequest::Chunk(_) => "UpdateChunk",
            UpdateRequest::Finish(_) => "UpdateFinish",
        }
    }
}

fn require_confirmable_with_token(msg: &CoapMessage, name: &str) -> Result<(), ProtocolError> {
    if msg.ty != CoapType::Con {
        return Err(ProtocolError::invalid(format!(
            "{name} must be a confirmable message"
        )));
    }
    if !msg.has_token() {
        return Err(ProtocolError::invalid(format!("{name} must carry a token")));
    }
    Ok(())
}

/// Validate an UpdateStart request.
pub fn validate_start(msg: &CoapMessage, limits: &ChunkConfig) -> Result<StartRequest, ProtocolError> {
    require_confirmable_with_token(msg, "UpdateStart")?;

    let file_size = msg
        .uint_option(option::FILE_SIZE)?
        .ok_or_else(|| ProtocolError::invalid("missing File-Size option"))?;
    if file_size == 0 {
        return Err(ProtocolError::invalid("File-Size is zero"));
    }

    let chunk_size = msg
        .uint_option(option::CHUNK_SIZE)?
        .ok_or_else(|| ProtocolError::invalid("missing Chunk-Size option"))? as usize;
    if !limits.accepts(chunk_size) {
        return Err(ProtocolError::invalid(format!(
            "invalid Chunk-Size {chunk_size}, expected a multiple of 4 in {}..={}",
            limits.min_size, limits.max_size
        )));
    }

    let file_hash = match msg.option(option::FILE_SHA256) {
        None => None,
        Some(h) => {
            let hash: [u8; HASH_SIZE] = h.try_into().map_err(|_| {
                ProtocolError::invalid(format!(
                    "File-SHA-256 is {} bytes, expected {HASH_SIZE}",
                    h.len()
                ))
            })?;
            Some(hash)
        }
    };

    let discard_data = msg.flag_option(option::DISCARD_DATA)?;

    Ok(StartRequest {
        file_size: file_size as usize,
        chunk_size,
        file_hash,
        discard_data,
    })
}

/// Validate an UpdateFinish request.
pub fn validate_finish(msg: &CoapMessage) -> Result<FinishRequest, ProtocolError> {
    require_confirmable_with_token(msg, "UpdateFinish")?;
    Ok(FinishRequest {
        cancel: msg.flag_option(option::CANCEL_UPDATE)?,
        discard_data: msg.flag_option(option::DISCARD_DATA)?,
    })
}

/// Validate an UpdateChunk request.
pub fn validate_chunk(msg: &CoapMessage) -> Result<ChunkRequest, ProtocolError> {
    if msg.ty != CoapType::Non {
        return Err(ProtocolError::invalid(
            "UpdateChunk must be a non-confirmable message",
        ));
    }
    if msg.has_token() {
        return Err(ProtocolError::invalid("UpdateChunk must not carry a token"));
    }
    let index = msg
        .uint_option(option::CHUNK_INDEX)?
        .ok_or_else(|| ProtocolError::invalid("missing Chunk-Index option"))?;
    if !msg.has_payload() {
        return Err(ProtocolError::invalid("UpdateChunk has no payload"));
    }
    Ok(ChunkRequest {
        index,
        data: msg.payload.clone(),
    })
}
