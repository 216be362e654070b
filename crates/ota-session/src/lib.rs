//! ota-session: the receiving side of a chunked firmware update.
//!
//! `FirmwareUpdate` owns one update at a time. It is driven by inbound
//! requests and by periodic `process` calls, and talks to the outside world
//! only through the `MessageChannel` and `FirmwareBackend` traits.

pub mod ack;
pub mod backend;
pub mod channel;
mod dispatch;
pub mod session;
pub mod stats;
pub mod window;

pub use ack::AckReason;
pub use backend::{FirmwareBackend, UpdateFlags};
pub use channel::MessageChannel;
pub use dispatch::RequestKind;
pub use session::{FirmwareUpdate, TransferStatus, UpdateState};
pub use stats::UpdateStats;
pub use window::{ChunkBitmap, Placement, ReceiveWindow};
