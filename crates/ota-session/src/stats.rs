//! Update statistics: accumulated over a whole update, logged once when the
//! peer acknowledges completion.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// When the UpdateStart request was accepted.
    pub update_start: Option<Instant>,
    /// When the first chunk arrived.
    pub transfer_start: Option<Instant>,
    /// When the last missing chunk arrived.
    pub transfer_finish: Option<Instant>,
    /// When the peer acknowledged the UpdateFinish response.
    pub update_finish: Option<Instant>,
    /// Time spent inside storage backend calls.
    pub processing_time: Duration,
    pub received_chunks: u32,
    pub duplicate_chunks: u32,
    pub out_of_order_chunks: u32,
    /// Chunks that arrived past the right edge of the receive window.
    pub dropped_chunks: u32,
    pub sent_acks: u32,
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.saturating_duration_since(from?))
}

impl UpdateStats {
    /// Time from UpdateStart to the acknowledged UpdateFinish.
    pub fn update_duration(&self) -> Option<Duration> {
        span(self.update_start, self.update_finish)
    }

    /// Time from the first chunk to the last missing chunk.
    pub fn transfer_duration(&self) -> Option<Duration> {
        span(self.transfer_start, self.transfer_finish)
    }

    /// Emit the statistics as one structured event.
    pub fn log(&self, file_size: usize) {
        let ms = |d: Option<Duration>| d.map_or(0, |d| d.as_millis() as u64);
        let transfer_ms = ms(self.transfer_duration());
        let rate_bps = if transfer_ms > 0 {
            (file_size as u64).saturating_mul(1000) / transfer_ms
        } else {
            0
        };
        tracing::info!(
            file_size,
            update_ms = ms(self.update_duration()),
            transfer_ms,
            processing_ms = self.processing_time.as_millis() as u64,
            rate_bps,
            received_chunks = self.received_chunks,
            duplicate_chunks = self.duplicate_chunks,
            out_of_order_chunks = self.out_of_order_chunks,
            dropped_chunks = self.dropped_chunks,
            sent_acks = self.sent_acks,
            "firmware update statistics"
        );
    }
}
