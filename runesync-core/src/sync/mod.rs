//! Sync protocol
//!
//! Keeps two copies of a named collection consistent over an ordered,
//! reliable transport. One side is the [`Role::Authority`] (the server copy),
//! the other a [`Role::Replica`] (the browser copy).
//!
//! # Message flow
//!
//! 1. The authority sends `init` with its full snapshot.
//! 2. The replica replaces its state with the snapshot and answers `ack`.
//! 3. Each side turns local changes into `update` (one key) or `patch`
//!    (several keys) messages.
//! 4. The authority validates every inbound write and answers `ack` or
//!    `error`; the replica rolls rejected writes back.
//!
//! Frames are JSON text or MessagePack binary, see [`codec`].

pub mod codec;

mod channel;
mod message;
mod pending;
mod target;
mod transport;

pub use channel::{ChannelState, ErrorCallback, Role, SyncChannel};
pub use codec::{codec_for, Codec, Frame, JsonCodec, MessagePackCodec};
pub use message::{MessageKind, SyncMessage};
pub use pending::{PendingEntry, PendingWrite, PendingWrites, Restore, WriteId};
pub use target::{ChangeObserver, SyncTarget};
pub use transport::{serve_websocket, ChannelTransport, Transport};
