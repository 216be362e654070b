//! Request dispatch: validate, acknowledge, apply, reply.
//!
//! Every inbound request goes through two phases. Validation looks only at
//! the message; apply runs the session handler. How a failure is reported
//! depends on the message type and on which phase failed:
//!
//!   CON, validation failed   → piggybacked ACK error response (request id, token)
//!   CON, validated           → empty ACK, then apply
//!   CON, apply succeeded     → separate CON response with the request token
//!   CON, apply failed        → separate CON error response (RST without token)
//!   NON, any failure         → NON error response with the token (RST without)
//!
//! Every failure cancels the update. Transport failures are returned to the
//! caller; everything else has been reported to the peer and returns `Ok`.

use std::time::Instant;

use ota_core::error::ProtocolError;
use ota_core::request::{validate_chunk, validate_finish, validate_start, UpdateRequest};
use ota_core::wire::{path, CoapCode, CoapMessage, CoapType, MessageId};

use crate::session::FirmwareUpdate;

/// Which handler an inbound message is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// UpdateStart, Uri-Path "S".
    Start,
    /// UpdateChunk, Uri-Path "C".
    Chunk,
    /// UpdateFinish, Uri-Path "F".
    Finish,
    /// ACK or RST of a confirmable response we sent.
    ResponseAck,
}

impl RequestKind {
    /// Route a decoded message by its type, code and Uri-Path.
    pub fn classify(msg: &CoapMessage) -> Option<RequestKind> {
        match msg.ty {
            CoapType::Ack | CoapType::Rst if msg.code.is_empty() => {
                return Some(RequestKind::ResponseAck)
            }
            CoapType::Con | CoapType::Non if msg.code == CoapCode::POST => {}
            _ => return None,
        }
        match msg.uri_path().as_str() {
            path::START => Some(RequestKind::Start),
            path::CHUNK => Some(RequestKind::Chunk),
            path::FINISH => Some(RequestKind::Finish),
            _ => None,
        }
    }
}

/// Successful outcome of a handler that answers the peer.
///
/// `message` carries the code, options and payload; the dispatcher fills in
/// type and token.
#[derive(Debug)]
pub(crate) struct Reply {
    message: CoapMessage,
    /// Remember the response id; the peer's ACK of it completes the update.
    awaits_ack: bool,
}

impl Reply {
    pub fn new(message: CoapMessage) -> Self {
        Self {
            message,
            awaits_ack: false,
        }
    }

    pub fn awaiting_ack(message: CoapMessage) -> Self {
        Self {
            message,
            awaits_ack: true,
        }
    }
}

fn error_response(ty: CoapType, err: &ProtocolError) -> CoapMessage {
    CoapMessage::new(ty, err.response_code()).with_payload(err.diagnostic_payload())
}

impl FirmwareUpdate {
    /// Handle one inbound message of the given kind.
    pub fn handle_request(
        &mut self,
        kind: RequestKind,
        msg: &CoapMessage,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        let validated = match kind {
            RequestKind::Start => validate_start(msg, &self.config().chunk).map(UpdateRequest::Start),
            RequestKind::Chunk => validate_chunk(msg).map(UpdateRequest::Chunk),
            RequestKind::Finish => validate_finish(msg).map(UpdateRequest::Finish),
            RequestKind::ResponseAck => return self.response_ack(msg, now),
        };
        self.dispatch(msg, validated, now)
    }

    pub fn start_request(&mut self, msg: &CoapMessage, now: Instant) -> Result<(), ProtocolError> {
        self.handle_request(RequestKind::Start, msg, now)
    }

    pub fn chunk_request(&mut self, msg: &CoapMessage, now: Instant) -> Result<(), ProtocolError> {
        self.handle_request(RequestKind::Chunk, msg, now)
    }

    pub fn finish_request(&mut self, msg: &CoapMessage, now: Instant) -> Result<(), ProtocolError> {
        self.handle_request(RequestKind::Finish, msg, now)
    }

    fn dispatch(
        &mut self,
        msg: &CoapMessage,
        validated: Result<UpdateRequest, ProtocolError>,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        let Some(request_id) = msg.id else {
            return Err(ProtocolError::invalid("request has no message id"));
        };

        let request = match validated {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(ty = ?msg.ty, error = %e, "rejected invalid request");
                return self.fail(msg, request_id, e, false);
            }
        };
        let name = request.name();

        let confirmable = msg.ty == CoapType::Con;
        if confirmable {
            self.send_or_cancel(CoapMessage::empty_ack(request_id))?;
        }

        let outcome = match request {
            UpdateRequest::Start(req) => self.start_update(req, now).map(Some),
            UpdateRequest::Chunk(req) => self.receive_chunk(req, now).map(|()| None),
            UpdateRequest::Finish(req) => self.finish_update(req).map(Some),
        };

        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(reply)) => {
                let ty = if confirmable { CoapType::Con } else { CoapType::Non };
                let mut response = reply.message.with_token(msg.token.clone());
                response.ty = ty;
                let id = self.send_or_cancel(response)?;
                if reply.awaits_ack {
                    self.finish_response_sent(id);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(request = name, error = %e, "request failed");
                self.fail(msg, request_id, e, confirmable)
            }
        }
    }

    /// Cancel the update and report `err` to the peer.
    ///
    /// `acked` tells whether the request was already acknowledged with an
    /// empty ACK, which rules out a piggybacked response.
    fn fail(
        &mut self,
        msg: &CoapMessage,
        request_id: MessageId,
        err: ProtocolError,
        acked: bool,
    ) -> Result<(), ProtocolError> {
        self.cancel_update(false);
        if err.is_io() {
            return Err(err);
        }

        let reply = match msg.ty {
            CoapType::Con if !acked => error_response(CoapType::Ack, &err)
                .with_id(request_id)
                .with_token(msg.token.clone()),
            CoapType::Con if msg.has_token() => {
                error_response(CoapType::Con, &err).with_token(msg.token.clone())
            }
            CoapType::Non if msg.has_token() => {
                error_response(CoapType::Non, &err).with_token(msg.token.clone())
            }
            _ => CoapMessage::reset(request_id),
        };
        self.send_or_cancel(reply)?;
        Ok(())
    }

    fn send_or_cancel(&mut self, msg: CoapMessage) -> Result<MessageId, ProtocolError> {
        match self.send(msg) {
            Ok(id) => Ok(id),
            Err(e) => {
                tracing::warn!(error = %e, "failed to send message");
                self.cancel_update(false);
                Err(e)
            }
        }
    }
}
