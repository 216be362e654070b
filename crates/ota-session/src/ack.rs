//! Acknowledgment policy: when to tell the peer how far the transfer got.
//!
//! Acks are batched. An ack carries the contiguous watermark in Chunk-Index
//! and the receive window as a selective-ack bitmap in the payload.

use std::time::Duration;

use ota_core::config::AckConfig;
use ota_core::wire::{option, path, CoapCode, CoapMessage, CoapType};

use crate::window::ChunkBitmap;

/// Why an ack is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    /// The peer resent something we already have.
    Duplicate,
    /// The window has gaps, or just lost its last one.
    Gaps,
    /// The last missing chunk arrived.
    Complete,
    /// `batch` chunks went unacknowledged.
    Batch,
    /// No chunk for `delay`.
    Delay,
}

/// What happened to the chunk that was just processed.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChunkOutcome {
    pub duplicate: bool,
    pub had_gaps: bool,
    pub has_gaps: bool,
    pub just_completed: bool,
    /// Including the chunk just processed.
    pub unacked: u32,
    /// Time since the previous chunk.
    pub idle: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct AckPolicy {
    batch: u32,
    delay: Duration,
}

impl AckPolicy {
    pub fn new(config: &AckConfig) -> Self {
        Self {
            batch: config.batch.max(1),
            delay: config.delay(),
        }
    }

    pub fn after_chunk(&self, o: &ChunkOutcome) -> Option<AckReason> {
        if o.duplicate {
            Some(AckReason::Duplicate)
        } else if o.has_gaps || o.had_gaps {
            Some(AckReason::Gaps)
        } else if o.just_completed {
            Some(AckReason::Complete)
        } else if o.unacked >= self.batch {
            Some(AckReason::Batch)
        } else if o.idle >= self.delay {
            Some(AckReason::Delay)
        } else {
            None
        }
    }

    /// Flush a pending ack once the peer has gone quiet.
    pub fn on_tick(&self, unacked: u32, idle: Duration) -> Option<AckReason> {
        (unacked > 0 && idle >= self.delay).then_some(AckReason::Delay)
    }
}

/// UpdateAck: NON POST to "A", no token. Bit `j` of the payload marks chunk
/// `chunk_index + j + 1` as received.
pub fn ack_message(chunk_index: usize, window: &ChunkBitmap) -> CoapMessage {
    CoapMessage::new(CoapType::Non, CoapCode::POST)
        .with_uri_path(path::ACK)
        .with_uint_option(option::CHUNK_INDEX, chunk_index as u32)
        .with_payload(window.to_trimmed_le_bytes())
}
