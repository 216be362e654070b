//! Message channel: the transport side of the session.

use ota_core::error::ChannelError;
use ota_core::wire::{CoapMessage, MessageId};

/// Sends messages to the peer.
///
/// Incoming messages are not read through this trait: the owner of the
/// channel decodes them and hands each one to the session.
pub trait MessageChannel {
    /// Queue `msg` for transmission and return the id it went out with.
    ///
    /// Messages without an id get a fresh one from the channel; replies
    /// that must reuse a request id (ACK, RST) arrive with it already set.
    fn send(&mut self, msg: CoapMessage) -> Result<MessageId, ChannelError>;
}
