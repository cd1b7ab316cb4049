//! Frame delivery.
//!
//! A [`Transport`] takes encoded frames from a channel and delivers them to
//! the peer in order. [`ChannelTransport`] hands frames to a tokio mpsc
//! receiver; [`serve_websocket`] drains that receiver into an upgraded
//! websocket and feeds inbound frames back into the channel.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use super::channel::SyncChannel;
use super::codec::Frame;
use super::target::SyncTarget;
use crate::config::SyncMode;
use crate::error::{Error, Result};

/// Ordered, reliable delivery of frames to one peer.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Frame) -> Result<()>;
}

/// Transport backed by an unbounded tokio mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Transport("peer receiver dropped".into()))
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Drive `channel` over an already upgraded websocket until either side
/// closes.
///
/// `outbound` must be the receiver paired with the channel's
/// [`ChannelTransport`]. The channel is started on entry and disconnected on
/// exit, so unacknowledged optimistic writes are rolled back when the
/// socket goes away. In [`SyncMode::Patch`] the channel is flushed every
/// patch interval.
pub async fn serve_websocket<T, S>(
    channel: &SyncChannel<T>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    socket: WebSocketStream<S>,
) -> Result<()>
where
    T: SyncTarget,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let patch_mode = channel.config().mode == SyncMode::Patch;
    let mut ticker = tokio::time::interval(channel.config().patch_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    channel.start()?;
    debug!(component_id = %channel.component_id(), peer = %channel.peer(), "websocket session started");

    let outcome = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break Ok(());
                };
                if let Err(err) = sink.send(Message::from(frame)).await {
                    break Err(Error::Transport(err.to_string()));
                }
            }
            incoming = stream.next() => {
                let frame = match incoming {
                    Some(Ok(Message::Text(text))) => Frame::Text(text),
                    Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => break Err(Error::Transport(err.to_string())),
                };
                if let Err(err) = channel.receive(&frame) {
                    warn!(component_id = %channel.component_id(), peer = %channel.peer(), error = %err, "dropped inbound frame");
                }
            }
            _ = ticker.tick(), if patch_mode => {
                if let Err(err) = channel.flush() {
                    warn!(component_id = %channel.component_id(), error = %err, "patch flush failed");
                }
            }
        }
    };

    // Frames queued before the socket went away are still delivered.
    while let Ok(frame) = outbound.try_recv() {
        if sink.send(Message::from(frame)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;

    debug!(component_id = %channel.component_id(), peer = %channel.peer(), "websocket session ended");
    channel.disconnect()?;
    outcome
}
