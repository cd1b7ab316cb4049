//! Error types shared by the reactive engines, collections and the sync
//! protocol.

use thiserror::Error;

use crate::sync::WriteId;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the engine can surface to a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A registered validator refused a write. Nothing was applied.
    #[error("write to `{key}` rejected by validator: {reason}")]
    Validation { key: String, reason: String },

    /// A value could not be represented as JSON.
    #[error("value is not serializable: {0}")]
    Serialization(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The remote authority refused an optimistic write. Reported through
    /// the channel's error callback after the write has been rolled back.
    #[error("remote rejected write {write_id} to `{key}`: {reason}")]
    SyncRejection {
        key: String,
        write_id: WriteId,
        reason: String,
    },

    /// A derived value or effect finished a run without reading any
    /// reactive source. Only produced with the `strict` feature.
    #[error("{observer} ran without tracking any dependency")]
    StaleDependency { observer: String },

    /// A delta arrived before the collection received its initial snapshot.
    #[error("component `{component_id}` has not been initialized")]
    NotInitialized { component_id: String },

    /// A message addressed to another component reached this channel.
    #[error("message for component `{received}` delivered to `{expected}`")]
    ComponentMismatch { expected: String, received: String },

    /// A message that the receiving role never accepts.
    #[error("unexpected `{kind}` message: {detail}")]
    UnexpectedMessage { kind: String, detail: String },

    /// A second channel tried to attach to a collection for the same peer.
    #[error("peer {peer} is already attached to component `{component_id}`")]
    AlreadyAttached { component_id: String, peer: String },

    /// The outbound transport is gone.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    pub(crate) fn validation(key: &str, reason: impl Into<String>) -> Self {
        Error::Validation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a validator.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }
}
