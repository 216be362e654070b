//! Firmware update session.
//!
//! One update at a time: Start opens it, chunks fill the receive window,
//! Finish validates the image and the peer's ACK of the Finish response
//! applies it. Any failure cancels the update in the backend.
//!
//! The session never reads a clock for protocol decisions. Every entry point
//! that cares about time takes `now` from the caller.

use std::time::{Duration, Instant};

use ota_core::config::{ConfigError, OtaConfig};
use ota_core::error::{code, BackendError, ProtocolError};
use ota_core::request::{ChunkRequest, FinishRequest, StartRequest};
use ota_core::wire::{option, CoapCode, CoapMessage, CoapType, MessageId};

use crate::ack::{ack_message, AckPolicy, AckReason, ChunkOutcome};
use crate::backend::{FirmwareBackend, UpdateFlags};
use crate::channel::MessageChannel;
use crate::dispatch::Reply;
use crate::stats::UpdateStats;
use crate::window::{Placement, ReceiveWindow};

/// Coarse phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// No update in progress.
    Idle,
    /// Start accepted, chunks flowing or expected.
    Active,
    /// Finish accepted; waiting for the peer to ACK the Finish response.
    Completing,
}

/// Snapshot of an update in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub file_size: usize,
    /// Contiguous bytes stored, including any resumed prefix.
    pub file_offset: usize,
    /// Bytes to transfer after the resumed prefix.
    pub transfer_size: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
    /// Contiguously received chunks.
    pub chunk_index: usize,
    pub window_size: usize,
    pub has_gaps: bool,
    pub unacked_chunks: u32,
}

/// Per-update state. Exists only while an update is in progress.
struct Transfer {
    file_size: usize,
    transfer_size: usize,
    chunk_size: usize,
    chunk_count: usize,
    window: ReceiveWindow,
    unacked_chunks: u32,
    had_gaps: bool,
    last_chunk_time: Instant,
    state_log_time: Instant,
    state_log_chunks: usize,
    /// Id of the Finish response; set once Finish is accepted.
    finish_response_id: Option<MessageId>,
    stats: UpdateStats,
}

impl Transfer {
    /// Expected size of 1-based chunk `index`.
    fn expected_chunk_len(&self, index: usize) -> usize {
        if index < self.chunk_count {
            self.chunk_size
        } else {
            self.transfer_size - (self.chunk_count - 1) * self.chunk_size
        }
    }

    fn is_complete(&self) -> bool {
        self.window.chunk_index() == self.chunk_count
    }
}

pub struct FirmwareUpdate {
    config: OtaConfig,
    ack_policy: AckPolicy,
    channel: Box<dyn MessageChannel>,
    backend: Box<dyn FirmwareBackend>,
    transfer: Option<Transfer>,
}

/// Run a backend call and add its duration to the processing time.
fn timed<T>(stats: &mut UpdateStats, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    stats.processing_time += started.elapsed();
    out
}

fn send_ack(
    channel: &mut dyn MessageChannel,
    transfer: &mut Transfer,
    reason: AckReason,
) -> Result<(), ProtocolError> {
    let msg = ack_message(transfer.window.chunk_index(), transfer.window.bitmap());
    channel.send(msg)?;
    tracing::trace!(
        chunk_index = transfer.window.chunk_index(),
        unacked = transfer.unacked_chunks,
        ?reason,
        "sent update ack"
    );
    transfer.unacked_chunks = 0;
    transfer.stats.sent_acks += 1;
    Ok(())
}

impl FirmwareUpdate {
    /// Create an idle session. Fails if `config` does not validate.
    pub fn new(
        config: OtaConfig,
        channel: Box<dyn MessageChannel>,
        backend: Box<dyn FirmwareBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ack_policy: AckPolicy::new(&config.ack),
            config,
            channel,
            backend,
            transfer: None,
        })
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Idle time after which `process` gives up.
    pub fn transfer_timeout(&self) -> Duration {
        self.config.transfer.timeout()
    }

    pub fn is_running(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn state(&self) -> UpdateState {
        match &self.transfer {
            None => UpdateState::Idle,
            Some(t) if t.finish_response_id.is_some() => UpdateState::Completing,
            Some(_) => UpdateState::Active,
        }
    }

    /// Statistics of the update in progress.
    pub fn stats(&self) -> Option<&UpdateStats> {
        self.transfer.as_ref().map(|t| &t.stats)
    }

    pub fn status(&self) -> Option<TransferStatus> {
        self.transfer.as_ref().map(|t| TransferStatus {
            file_size: t.file_size,
            file_offset: t.window.file_offset(),
            transfer_size: t.transfer_size,
            chunk_size: t.chunk_size,
            chunk_count: t.chunk_count,
            chunk_index: t.window.chunk_index(),
            window_size: t.window.window_size(),
            has_gaps: t.window.has_gaps(),
            unacked_chunks: t.unacked_chunks,
        })
    }

    /// Cancel the update in progress, if any.
    pub fn cancel(&mut self) {
        self.cancel_update(false);
    }

    /// Cancel any update and return to idle.
    pub fn destroy(&mut self) {
        self.cancel_update(false);
    }

    pub(crate) fn cancel_update(&mut self, discard_data: bool) {
        let Some(transfer) = self.transfer.take() else {
            return;
        };
        let mut flags = UpdateFlags::CANCEL;
        if discard_data {
            flags |= UpdateFlags::DISCARD_DATA;
        }
        tracing::info!(
            chunk_index = transfer.window.chunk_index(),
            chunk_count = transfer.chunk_count,
            discard_data,
            "firmware update cancelled"
        );
        self.cancel_backend(flags);
    }

    fn cancel_backend(&mut self, flags: UpdateFlags) {
        if let Err(e) = self.backend.finish(flags) {
            tracing::warn!(error = %e, "backend failed to cancel update");
        }
    }

    // ── Periodic tick ─────────────────────────────────────────────────────

    /// Drive timers: stall detection, delayed acks, progress logging.
    ///
    /// Returns `ProtocolError::Timeout` once, when a stalled update is
    /// cancelled. Errors sending a delayed ack are returned as `Io`.
    pub fn process(&mut self, now: Instant) -> Result<(), ProtocolError> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(());
        };

        let idle = now.saturating_duration_since(transfer.last_chunk_time);
        if idle >= self.config.transfer.timeout() {
            tracing::warn!(
                idle_ms = idle.as_millis() as u64,
                chunk_index = transfer.window.chunk_index(),
                chunk_count = transfer.chunk_count,
                awaiting_finish_ack = transfer.finish_response_id.is_some(),
                "firmware update timed out"
            );
            self.cancel_update(false);
            return Err(ProtocolError::Timeout);
        }

        if let Some(reason) = self.ack_policy.on_tick(transfer.unacked_chunks, idle) {
            if let Err(e) = send_ack(self.channel.as_mut(), transfer, reason) {
                self.cancel_update(false);
                return Err(e);
            }
        }

        let chunk_index = transfer.window.chunk_index();
        if now.saturating_duration_since(transfer.state_log_time) >= self.config.log.interval()
            && chunk_index != transfer.state_log_chunks
        {
            tracing::info!(
                chunk_index,
                chunk_count = transfer.chunk_count,
                file_offset = transfer.window.file_offset(),
                file_size = transfer.file_size,
                "firmware update progress"
            );
            transfer.state_log_time = now;
            transfer.state_log_chunks = chunk_index;
        }
        Ok(())
    }

    // ── Request handlers ──────────────────────────────────────────────────

    pub(crate) fn start_update(
        &mut self,
        req: StartRequest,
        now: Instant,
    ) -> Result<Reply, ProtocolError> {
        if self.transfer.is_some() {
            tracing::warn!("new UpdateStart discards the update in progress");
            self.cancel_update(false);
        }

        let mut flags = UpdateFlags::empty();
        if req.file_hash.is_none() {
            flags |= UpdateFlags::NON_RESUMABLE;
        }
        if req.discard_data {
            flags |= UpdateFlags::DISCARD_DATA;
        }

        let mut stats = UpdateStats {
            update_start: Some(now),
            ..Default::default()
        };
        let file_offset = timed(&mut stats, || {
            self.backend.start(req.file_size, req.file_hash.as_ref(), flags)
        })?;
        if file_offset > req.file_size {
            self.cancel_backend(UpdateFlags::CANCEL);
            return Err(BackendError::new(
                code::BACKEND,
                format!(
                    "resume offset {file_offset} is past the end of a {}-byte file",
                    req.file_size
                ),
            )
            .into());
        }

        let chunk_size = req.chunk_size;
        let transfer_size = req.file_size - file_offset;
        let chunk_count = transfer_size.div_ceil(chunk_size);
        let window_size = (self.config.window.bytes / chunk_size).max(1);

        let file_hash = req
            .file_hash
            .map(hex::encode)
            .unwrap_or_else(|| "none".to_string());
        tracing::info!(
            file_size = req.file_size,
            chunk_size,
            chunk_count,
            window_size,
            resume_offset = file_offset,
            file_hash = %file_hash,
            ?flags,
            "firmware update started"
        );

        self.transfer = Some(Transfer {
            file_size: req.file_size,
            transfer_size,
            chunk_size,
            chunk_count,
            window: ReceiveWindow::new(window_size, chunk_size, file_offset, req.file_size),
            unacked_chunks: 0,
            had_gaps: false,
            last_chunk_time: now,
            state_log_time: now,
            state_log_chunks: 0,
            finish_response_id: None,
            stats,
        });

        let mut response = CoapMessage::new(CoapType::Con, CoapCode::CREATED)
            .with_uint_option(option::WINDOW_SIZE, window_size as u32);
        if file_offset > 0 {
            response = response.with_uint_option(option::FILE_SIZE, file_offset as u32);
        }
        Ok(Reply::new(response))
    }

    pub(crate) fn receive_chunk(
        &mut self,
        req: ChunkRequest,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| ProtocolError::state("no update in progress"))?;

        let index = req.index as usize;
        if index == 0 || index > transfer.chunk_count {
            return Err(ProtocolError::invalid(format!(
                "chunk index {index} outside 1..={}",
                transfer.chunk_count
            )));
        }
        let expected = transfer.expected_chunk_len(index);
        let len = req.data.len();
        let size_ok = if index < transfer.chunk_count {
            len == expected
        } else {
            len > 0 && len <= expected
        };
        if !size_ok {
            return Err(ProtocolError::invalid(format!(
                "chunk {index} is {len} bytes, expected {expected}"
            )));
        }

        let was_complete = transfer.is_complete();
        let stats = &mut transfer.stats;
        stats.received_chunks += 1;
        stats.transfer_start.get_or_insert(now);

        let mut duplicate = false;
        match transfer.window.mark_received(index) {
            Placement::Duplicate => {
                duplicate = true;
                stats.duplicate_chunks += 1;
                tracing::debug!(index, "duplicate chunk");
            }
            Placement::Dropped => {
                stats.dropped_chunks += 1;
                tracing::warn!(
                    index,
                    chunk_index = transfer.window.chunk_index(),
                    window_size = transfer.window.window_size(),
                    "chunk beyond receive window, dropped"
                );
            }
            Placement::Stored {
                offset,
                contiguous_offset,
                out_of_order,
            } => {
                if out_of_order {
                    stats.out_of_order_chunks += 1;
                    tracing::debug!(
                        index,
                        chunk_index = transfer.window.chunk_index(),
                        "out-of-order chunk"
                    );
                }
                timed(stats, || {
                    self.backend.save_chunk(&req.data, offset, contiguous_offset)
                })?;
            }
        }

        transfer.unacked_chunks += 1;
        let has_gaps = transfer.window.has_gaps();
        let had_gaps = std::mem::replace(&mut transfer.had_gaps, has_gaps);
        let just_completed = !was_complete && transfer.is_complete();
        if just_completed {
            transfer.stats.transfer_finish = Some(now);
            tracing::info!(chunk_count = transfer.chunk_count, "all chunks received");
        }

        let outcome = ChunkOutcome {
            duplicate,
            had_gaps,
            has_gaps,
            just_completed,
            unacked: transfer.unacked_chunks,
            idle: now.saturating_duration_since(transfer.last_chunk_time),
        };
        transfer.last_chunk_time = now;

        if let Some(reason) = self.ack_policy.after_chunk(&outcome) {
            send_ack(self.channel.as_mut(), transfer, reason)?;
        }
        Ok(())
    }

    pub(crate) fn finish_update(&mut self, req: FinishRequest) -> Result<Reply, ProtocolError> {
        if req.cancel {
            if self.transfer.is_none() {
                tracing::debug!("cancel requested with no update in progress");
            }
            self.cancel_update(req.discard_data);
            return Ok(Reply::new(CoapMessage::new(CoapType::Con, CoapCode::CHANGED)));
        }

        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| ProtocolError::state("no update in progress"))?;
        if transfer.window.file_offset() != transfer.file_size {
            return Err(ProtocolError::invalid(format!(
                "update incomplete: {} of {} bytes received",
                transfer.window.file_offset(),
                transfer.file_size
            )));
        }

        timed(&mut transfer.stats, || {
            self.backend.finish(UpdateFlags::VALIDATE_ONLY)
        })?;
        tracing::info!("firmware image validated, awaiting finish acknowledgment");
        Ok(Reply::awaiting_ack(CoapMessage::new(CoapType::Con, CoapCode::CHANGED)))
    }

    pub(crate) fn send(&mut self, msg: CoapMessage) -> Result<MessageId, ProtocolError> {
        Ok(self.channel.send(msg)?)
    }

    pub(crate) fn finish_response_sent(&mut self, id: MessageId) {
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.finish_response_id = Some(id);
        }
    }

    /// Handle the peer's ACK (or RST) of one of our confirmable responses.
    ///
    /// Only the Finish response matters: its ACK applies the update, its RST
    /// cancels it. Everything else is ignored.
    pub fn response_ack(&mut self, msg: &CoapMessage, now: Instant) -> Result<(), ProtocolError> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(());
        };
        if transfer.finish_response_id.is_none() || msg.id != transfer.finish_response_id {
            return Ok(());
        }

        if msg.ty == CoapType::Rst {
            tracing::warn!("peer rejected the finish response");
            self.cancel_update(false);
            return Ok(());
        }
        if msg.ty != CoapType::Ack {
            return Ok(());
        }

        transfer.stats.update_finish = Some(now);
        transfer.stats.log(transfer.file_size);
        let file_size = transfer.file_size;
        match self.backend.finish(UpdateFlags::empty()) {
            Ok(()) => {
                tracing::info!(file_size, "firmware update applied");
                self.transfer = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to apply firmware update");
                self.cancel_update(false);
                Err(e.into())
            }
        }
    }
}

impl Drop for FirmwareUpdate {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for FirmwareUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareUpdate")
            .field("state", &self.state())
            .field("status", &self.status())
            .finish()
    }
}
