//! Frame encoding.
//!
//! JSON travels in text frames, MessagePack in binary frames. Both encode
//! the same [`SyncMessage`] shape; MessagePack keeps field names so the two
//! are interchangeable on the receiving side.

use super::message::SyncMessage;
use crate::config::CodecKind;
use crate::error::{Error, Result};

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Codec: Send + Sync {
    fn encode(&self, message: &SyncMessage) -> Result<Frame>;
    fn decode(&self, frame: &Frame) -> Result<SyncMessage>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &SyncMessage) -> Result<Frame> {
        Ok(Frame::Text(serde_json::to_string(message)?))
    }

    fn decode(&self, frame: &Frame) -> Result<SyncMessage> {
        let message = match frame {
            Frame::Text(text) => serde_json::from_str(text)?,
            Frame::Binary(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn encode(&self, message: &SyncMessage) -> Result<Frame> {
        Ok(Frame::Binary(rmp_serde::to_vec_named(message)?))
    }

    fn decode(&self, frame: &Frame) -> Result<SyncMessage> {
        match frame {
            Frame::Binary(bytes) => Ok(rmp_serde::from_slice(bytes)?),
            Frame::Text(_) => Err(Error::Transport(
                "text frame received on a msgpack channel".into(),
            )),
        }
    }
}

/// The codec selected by configuration.
pub fn codec_for(kind: CodecKind) -> Box<dyn Codec> {
    match kind {
        CodecKind::Json => Box::new(JsonCodec),
        CodecKind::Msgpack => Box::new(MessagePackCodec),
    }
}
