//! ota-core: wire model, request validation, errors and configuration of the
//! chunked OTA update protocol. The session crate depends on this one.

pub mod config;
pub mod error;
pub mod request;
pub mod wire;

pub use config::OtaConfig;
pub use error::{BackendError, ChannelError, ProtocolError};
pub use request::{ChunkRequest, FinishRequest, StartRequest, UpdateRequest};
pub use wire::{CoapCode, CoapMessage, CoapType, MessageId};
