//! Sync channel state machine.
//!
//! One [`SyncChannel`] links a local collection with one remote peer. The
//! authority owns the canonical state and starts the session with `init`;
//! the replica applies its own writes optimistically and keeps a ledger of
//! them until the authority answers with `ack` or `error`.
//!
//! ```text
//! Uninitialized --start / init--> Syncing --(ack)--> Live
//!       ^                                              |
//!       +------------------ disconnect ----------------+
//! ```
//!
//! Outbound messages come from the collection's change hook. Writes the
//! channel itself applied on behalf of its peer are never sent back.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::codec::{codec_for, Codec, Frame};
use super::message::{MessageKind, SyncMessage};
use super::pending::{PendingEntry, PendingWrites, Restore};
use super::target::SyncTarget;
use super::transport::Transport;
use crate::config::{SyncConfig, SyncMode};
use crate::error::{Error, Result};
use crate::state::{Change, Diff, Origin, PeerId, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the canonical state, sends `init`, validates inbound writes.
    Authority,
    /// Mirrors the authority and writes optimistically.
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Syncing,
    Live,
}

/// Receives rejections and send failures that have no caller to return to.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

pub struct SyncChannel<T: SyncTarget> {
    target: T,
    core: Arc<ChannelCore>,
    _observer: T::Observer,
}

struct ChannelCore {
    component_id: String,
    peer: PeerId,
    role: Role,
    config: SyncConfig,
    codec: Box<dyn Codec>,
    transport: Arc<dyn Transport>,
    session: Mutex<Session>,
    on_error: RwLock<Option<ErrorCallback>>,
}

struct Session {
    state: ChannelState,
    /// Last value seen per key, used as the restore target of new writes.
    mirror: Snapshot,
    /// Changes not yet sent, in first-touched order.
    outbox: IndexMap<String, Unsent>,
    pending: PendingWrites,
}

struct Unsent {
    previous: Option<Value>,
    attempted: Option<Value>,
}

impl<T: SyncTarget> SyncChannel<T> {
    /// Attach a channel for a new peer.
    pub fn new(target: T, role: Role, transport: Arc<dyn Transport>, config: SyncConfig) -> Result<Self> {
        Self::with_peer(target, role, PeerId::new(), transport, config)
    }

    pub fn authority(target: T, transport: Arc<dyn Transport>, config: SyncConfig) -> Result<Self> {
        Self::new(target, Role::Authority, transport, config)
    }

    pub fn replica(target: T, transport: Arc<dyn Transport>, config: SyncConfig) -> Result<Self> {
        Self::new(target, Role::Replica, transport, config)
    }

    /// Attach a channel for `peer`. Fails if `target` already has a channel
    /// for that peer.
    pub fn with_peer(
        target: T,
        role: Role,
        peer: PeerId,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        target.attach_peer(peer)?;

        let core = Arc::new(ChannelCore {
            component_id: target.component_id(),
            peer,
            role,
            codec: codec_for(config.codec),
            config,
            transport,
            session: Mutex::new(Session {
                state: ChannelState::Uninitialized,
                mirror: target.snapshot(),
                outbox: IndexMap::new(),
                pending: PendingWrites::new(),
            }),
            on_error: RwLock::new(None),
        });

        let weak = Arc::downgrade(&core);
        let observer = target.observe(Box::new(move |change| {
            if let Some(core) = weak.upgrade() {
                core.on_change(change);
            }
        }));

        debug!(component_id = %core.component_id, %peer, ?role, "channel attached");
        Ok(Self {
            target,
            core,
            _observer: observer,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.core.session.lock().state
    }

    pub fn role(&self) -> Role {
        self.core.role
    }

    pub fn peer(&self) -> PeerId {
        self.core.peer
    }

    pub fn component_id(&self) -> &str {
        &self.core.component_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Number of optimistic writes still awaiting an answer.
    pub fn pending_writes(&self) -> usize {
        self.core.session.lock().pending.len()
    }

    /// Install the callback for rejections and send failures.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.core.on_error.write() = Some(Arc::new(callback));
    }

    /// Begin the session.
    ///
    /// The authority sends `init` with a full snapshot; a replica waits for
    /// it. Starting a channel that already started does nothing.
    pub fn start(&self) -> Result<()> {
        if self.core.role == Role::Replica {
            debug!(component_id = %self.core.component_id, "replica waiting for init");
            return Ok(());
        }

        {
            let mut session = self.core.session.lock();
            if session.state != ChannelState::Uninitialized {
                return Ok(());
            }
            // Changes made from here on are buffered and follow the init.
            session.state = ChannelState::Syncing;
        }

        let snapshot = self.target.snapshot();
        debug!(component_id = %self.core.component_id, peer = %self.core.peer, keys = snapshot.len(), "sending init");
        self.core.send(SyncMessage::init(&self.core.component_id, snapshot))?;

        if !self.core.config.require_init_ack {
            self.core.go_live()?;
        }
        Ok(())
    }

    /// Decode and handle one inbound frame.
    pub fn receive(&self, frame: &Frame) -> Result<()> {
        let message = self.core.codec.decode(frame)?;
        self.handle(message)
    }

    /// Handle one inbound message.
    pub fn handle(&self, message: SyncMessage) -> Result<()> {
        message.validate()?;
        if message.component_id != self.core.component_id {
            return Err(Error::ComponentMismatch {
                expected: self.core.component_id.clone(),
                received: message.component_id,
            });
        }

        trace!(
            component_id = %self.core.component_id,
            peer = %self.core.peer,
            kind = %message.kind,
            write_id = ?message.write_id,
            "received"
        );

        match self.core.role {
            Role::Authority => self.handle_as_authority(message),
            Role::Replica => self.handle_as_replica(message),
        }
    }

    /// Send buffered changes as one `patch`.
    pub fn flush(&self) -> Result<()> {
        let message = {
            let mut session = self.core.session.lock();
            if session.state != ChannelState::Live {
                return Ok(());
            }
            self.core.take_patch(&mut session)
        };
        match message {
            Some(message) => self.core.send(message),
            None => Ok(()),
        }
    }

    /// Ask the authority for a full snapshot.
    pub fn request_sync(&self) -> Result<()> {
        if self.core.role != Role::Replica {
            return Err(Error::UnexpectedMessage {
                kind: MessageKind::Sync.to_string(),
                detail: "only a replica requests a resync".into(),
            });
        }
        self.core.send(SyncMessage::sync_request(&self.core.component_id))
    }

    /// The connection is gone: roll back every unacknowledged write and
    /// return to `Uninitialized`.
    pub fn disconnect(&self) -> Result<()> {
        let restore = {
            let mut session = self.core.session.lock();
            session.state = ChannelState::Uninitialized;
            let mut restore = session.pending.drain();
            let unsent = std::mem::take(&mut session.outbox);
            if self.core.role == Role::Replica {
                for (key, unsent) in unsent {
                    if !restore.iter().any(|(pending, _)| *pending == key) {
                        restore.push((key, unsent.previous));
                    }
                }
                restore
            } else {
                Vec::new()
            }
        };

        debug!(
            component_id = %self.core.component_id,
            peer = %self.core.peer,
            restored = restore.len(),
            "channel disconnected"
        );
        self.rollback(restore)
    }

    fn handle_as_authority(&self, message: SyncMessage) -> Result<()> {
        let component_id = &self.core.component_id;
        match message.kind {
            MessageKind::Update | MessageKind::Patch => {
                if self.state() == ChannelState::Uninitialized {
                    let err = Error::NotInitialized {
                        component_id: component_id.clone(),
                    };
                    let mut reply = SyncMessage::error(component_id, message.key.clone(), err.to_string());
                    reply.write_id = message.write_id;
                    self.core.send(reply)?;
                    return Err(err);
                }

                match self
                    .target
                    .apply_changes(message.changes(), Origin::Remote(self.core.peer))
                {
                    Ok(()) => self.core.send(SyncMessage::ack(component_id, message.write_id)),
                    Err(err) => {
                        let key = match &err {
                            Error::Validation { key, .. } => Some(key.clone()),
                            _ => message.key.clone(),
                        };
                        warn!(
                            %component_id,
                            peer = %self.core.peer,
                            write_id = ?message.write_id,
                            error = %err,
                            "rejected write"
                        );
                        let mut reply = SyncMessage::error(component_id, key, err.to_string());
                        reply.write_id = message.write_id;
                        self.core.send(reply)
                    }
                }
            }
            MessageKind::Sync if message.state.is_none() => {
                self.core
                    .send(SyncMessage::sync_response(component_id, self.target.snapshot()))
            }
            MessageKind::Ack if message.write_id.is_none() => {
                if self.state() == ChannelState::Syncing {
                    self.core.go_live()
                } else {
                    Ok(())
                }
            }
            MessageKind::Ack => Ok(()),
            kind => Err(Error::UnexpectedMessage {
                kind: kind.to_string(),
                detail: "not accepted by an authority".into(),
            }),
        }
    }

    fn handle_as_replica(&self, message: SyncMessage) -> Result<()> {
        match message.kind {
            MessageKind::Init => {
                self.apply_snapshot(message.state.unwrap_or_default())?;
                self.core.send(SyncMessage::ack(&self.core.component_id, None))
            }
            MessageKind::Sync => match message.state {
                Some(state) => self.apply_snapshot(state),
                None => Err(Error::UnexpectedMessage {
                    kind: message.kind.to_string(),
                    detail: "resync requests go to the authority".into(),
                }),
            },
            MessageKind::Update | MessageKind::Patch => {
                if self.state() != ChannelState::Live {
                    return Err(Error::NotInitialized {
                        component_id: self.core.component_id.clone(),
                    });
                }
                self.target
                    .apply_changes(message.changes(), Origin::Remote(self.core.peer))
            }
            MessageKind::Ack => {
                if let Some(write_id) = message.write_id {
                    if self.core.session.lock().pending.acknowledge(write_id).is_none() {
                        debug!(component_id = %self.core.component_id, %write_id, "ack for unknown write");
                    }
                }
                Ok(())
            }
            MessageKind::Error => self.handle_rejection(message),
        }
    }

    /// Replace local state with the authority's snapshot and go live.
    fn apply_snapshot(&self, state: Snapshot) -> Result<()> {
        {
            let mut session = self.core.session.lock();
            session.pending.drain();
            session.outbox.clear();
        }

        let changes = Diff::between(&self.target.snapshot(), &state).into_changes();
        if !changes.is_empty() {
            self.target
                .apply_changes(changes, Origin::Remote(self.core.peer))?;
        }

        self.core.session.lock().state = ChannelState::Live;
        debug!(component_id = %self.core.component_id, keys = state.len(), "replica live");
        Ok(())
    }

    fn handle_rejection(&self, message: SyncMessage) -> Result<()> {
        let reason = message.error.unwrap_or_default();
        let Some(write_id) = message.write_id else {
            let err = Error::UnexpectedMessage {
                kind: MessageKind::Error.to_string(),
                detail: reason,
            };
            warn!(component_id = %self.core.component_id, error = %err, "remote error");
            self.core.report(&err);
            return Ok(());
        };

        let restore = self.core.session.lock().pending.reject(write_id);
        let key = message
            .key
            .or_else(|| restore.first().map(|(key, _)| key.clone()))
            .unwrap_or_default();
        self.rollback(restore)?;

        let err = Error::SyncRejection {
            key,
            write_id,
            reason,
        };
        warn!(component_id = %self.core.component_id, %write_id, error = %err, "write rolled back");
        self.core.report(&err);
        Ok(())
    }

    fn rollback(&self, restore: Restore) -> Result<()> {
        if restore.is_empty() {
            return Ok(());
        }
        self.target
            .apply_changes(restore, Origin::Rollback(self.core.peer))
    }
}

impl<T: SyncTarget> Drop for SyncChannel<T> {
    fn drop(&mut self) {
        self.target.detach_peer(self.core.peer);
    }
}

impl<T: SyncTarget> std::fmt::Debug for SyncChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("component_id", &self.core.component_id)
            .field("peer", &self.core.peer)
            .field("role", &self.core.role)
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelCore {
    fn on_change(&self, change: &Change) {
        let message = {
            let mut session = self.session.lock();
            let previous = match &change.value {
                Some(value) => session.mirror.insert(change.key.clone(), value.clone()),
                None => session.mirror.shift_remove(&change.key),
            };

            match change.origin {
                Origin::Remote(peer) if peer == self.peer => {
                    session.pending.rebase(&change.key, change.value.as_ref());
                    return;
                }
                Origin::Rollback(peer) if peer == self.peer => return,
                _ => {}
            }

            match session.state {
                ChannelState::Uninitialized => return,
                ChannelState::Syncing => {
                    session.buffer(change, previous);
                    return;
                }
                ChannelState::Live if self.config.mode == SyncMode::Patch => {
                    session.buffer(change, previous);
                    return;
                }
                ChannelState::Live => {
                    let message = match &change.value {
                        Some(value) => SyncMessage::update(&self.component_id, &change.key, value.clone()),
                        None => SyncMessage::patch(&self.component_id, Snapshot::new(), vec![change.key.clone()]),
                    };
                    let entry = PendingEntry {
                        key: change.key.clone(),
                        previous,
                        attempted: change.value.clone(),
                    };
                    self.track(&mut session, message, vec![entry])
                }
            }
        };

        if let Err(err) = self.send(message) {
            warn!(component_id = %self.component_id, peer = %self.peer, error = %err, "send failed");
            self.report(&err);
        }
    }

    /// Replicas record outbound writes in the ledger.
    fn track(&self, session: &mut Session, message: SyncMessage, entries: Vec<PendingEntry>) -> SyncMessage {
        match self.role {
            Role::Replica => {
                let write_id = session.pending.record(entries);
                message.with_write_id(write_id)
            }
            Role::Authority => message,
        }
    }

    fn take_patch(&self, session: &mut Session) -> Option<SyncMessage> {
        if session.outbox.is_empty() {
            return None;
        }

        let outbox = std::mem::take(&mut session.outbox);
        let mut state = Snapshot::new();
        let mut removed = Vec::new();
        let mut entries = Vec::with_capacity(outbox.len());
        for (key, unsent) in outbox {
            match &unsent.attempted {
                Some(value) => {
                    state.insert(key.clone(), value.clone());
                }
                None => removed.push(key.clone()),
            }
            entries.push(PendingEntry {
                key,
                previous: unsent.previous,
                attempted: unsent.attempted,
            });
        }

        let message = SyncMessage::patch(&self.component_id, state, removed);
        Some(self.track(session, message, entries))
    }

    fn go_live(&self) -> Result<()> {
        let message = {
            let mut session = self.session.lock();
            session.state = ChannelState::Live;
            self.take_patch(&mut session)
        };
        debug!(component_id = %self.component_id, peer = %self.peer, "channel live");
        match message {
            Some(message) => self.send(message),
            None => Ok(()),
        }
    }

    fn send(&self, message: SyncMessage) -> Result<()> {
        trace!(
            component_id = %self.component_id,
            peer = %self.peer,
            kind = %message.kind,
            write_id = ?message.write_id,
            "send"
        );
        let frame = self.codec.encode(&message)?;
        self.transport.send(frame)
    }

    fn report(&self, err: &Error) {
        let callback = self.on_error.read().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

impl Session {
    fn buffer(&mut self, change: &Change, previous: Option<Value>) {
        match self.outbox.get_mut(&change.key) {
            Some(unsent) => unsent.attempted = change.value.clone(),
            None => {
                self.outbox.insert(
                    change.key.clone(),
                    Unsent {
                        previous,
                        attempted: change.value.clone(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateCollection;
    use crate::sync::codec::JsonCodec;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Frame>>,
    }

    impl Recorder {
        fn messages(&self) -> Vec<SyncMessage> {
            self.frames
                .lock()
                .drain(..)
                .map(|frame| JsonCodec.decode(&frame).unwrap())
                .collect()
        }
    }

    impl Transport for Recorder {
        fn send(&self, frame: Frame) -> Result<()> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn authority(config: SyncConfig) -> (StateCollection, SyncChannel<StateCollection>, Arc<Recorder>) {
        let collection = StateCollection::new("room");
        collection.add_value("count", json!(0));
        let recorder = Arc::new(Recorder::default());
        let channel = SyncChannel::authority(collection.clone(), recorder.clone(), config).unwrap();
        (collection, channel, recorder)
    }

    fn replica() -> (StateCollection, SyncChannel<StateCollection>, Arc<Recorder>) {
        let collection = StateCollection::new("room");
        let recorder = Arc::new(Recorder::default());
        let channel =
            SyncChannel::replica(collection.clone(), recorder.clone(), SyncConfig::default()).unwrap();
        (collection, channel, recorder)
    }

    fn init(state: Value) -> SyncMessage {
        SyncMessage::init("room", serde_json::from_value(state).unwrap())
    }

    #[test]
    fn authority_start_sends_init_and_goes_live() {
        let (_collection, channel, recorder) = authority(SyncConfig::default());
        channel.start().unwrap();

        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Init);
        assert_eq!(sent[0].state.as_ref().unwrap()["count"], json!(0));
        assert_eq!(channel.state(), ChannelState::Live);
    }

    #[test]
    fn changes_while_syncing_follow_as_one_patch() {
        let (collection, channel, recorder) = authority(SyncConfig::default().with_init_ack(true));
        channel.start().unwrap();
        assert_eq!(channel.state(), ChannelState::Syncing);

        collection.set("count", json!(1)).unwrap();
        collection.set("other", json!("x")).unwrap();
        assert_eq!(recorder.messages().len(), 1);

        channel.handle(SyncMessage::ack("room", None)).unwrap();
        assert_eq!(channel.state(), ChannelState::Live);

        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Patch);
        let state = sent[0].state.as_ref().unwrap();
        assert_eq!(state["count"], json!(1));
        assert_eq!(state["other"], json!("x"));
    }

    #[test]
    fn authority_does_not_echo_peer_writes() {
        let (collection, channel, recorder) = authority(SyncConfig::default());
        channel.start().unwrap();
        recorder.messages();

        let write = SyncMessage::update("room", "count", json!(5)).with_write_id(1.into());
        channel.handle(write).unwrap();

        assert_eq!(collection.value("count"), Some(json!(5)));
        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Ack);
        assert_eq!(sent[0].write_id, Some(1.into()));
    }

    #[test]
    fn authority_rejects_invalid_write() {
        let (collection, channel, recorder) = authority(SyncConfig::default());
        collection.add_validator(Some("count"), |_, value| {
            if value.as_i64().is_some_and(|n| n >= 0) {
                Ok(())
            } else {
                Err("negative".into())
            }
        });
        channel.start().unwrap();
        recorder.messages();

        let write = SyncMessage::update("room", "count", json!(-1)).with_write_id(3.into());
        channel.handle(write).unwrap();

        assert_eq!(collection.value("count"), Some(json!(0)));
        let reply = &recorder.messages()[0];
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.key.as_deref(), Some("count"));
        assert_eq!(reply.write_id, Some(3.into()));
    }

    #[test]
    fn authority_answers_sync_request_with_snapshot() {
        let (_collection, channel, recorder) = authority(SyncConfig::default());
        channel.start().unwrap();
        recorder.messages();

        channel.handle(SyncMessage::sync_request("room")).unwrap();
        let reply = &recorder.messages()[0];
        assert_eq!(reply.kind, MessageKind::Sync);
        assert_eq!(reply.state.as_ref().unwrap()["count"], json!(0));
    }

    #[test]
    fn replica_rejects_delta_before_init() {
        let (collection, channel, _recorder) = replica();
        let err = channel
            .handle(SyncMessage::update("room", "count", json!(1)))
            .unwrap_err();

        assert!(matches!(err, Error::NotInitialized { .. }));
        assert!(collection.is_empty());
    }

    #[test]
    fn replica_acks_init() {
        let (collection, channel, recorder) = replica();
        channel.handle(init(json!({"count": 7}))).unwrap();

        assert_eq!(channel.state(), ChannelState::Live);
        assert_eq!(collection.value("count"), Some(json!(7)));
        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Ack);
        assert_eq!(sent[0].write_id, None);
    }

    #[test]
    fn replica_rolls_back_rejected_write() {
        let (collection, channel, recorder) = replica();
        channel.handle(init(json!({"count": 0}))).unwrap();
        recorder.messages();

        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            channel.on_error(move |err| errors.lock().push(err.to_string()));
        }

        collection.set("count", json!(1)).unwrap();
        let sent = recorder.messages();
        let write_id = sent[0].write_id.unwrap();
        assert_eq!(channel.pending_writes(), 1);

        let mut rejection = SyncMessage::error("room", Some("count".into()), "nope");
        rejection.write_id = Some(write_id);
        channel.handle(rejection).unwrap();

        assert_eq!(collection.value("count"), Some(json!(0)));
        assert_eq!(channel.pending_writes(), 0);
        assert_eq!(errors.lock().len(), 1);
        assert!(recorder.messages().is_empty());
    }

    #[test]
    fn disconnect_restores_unacknowledged_writes_only() {
        let (collection, channel, recorder) = replica();
        channel.handle(init(json!({"a": 0, "b": 0}))).unwrap();
        recorder.messages();

        collection.set("a", json!(1)).unwrap();
        collection.set("b", json!(1)).unwrap();
        let sent = recorder.messages();
        channel
            .handle(SyncMessage::ack("room", sent[0].write_id))
            .unwrap();

        channel.disconnect().unwrap();
        assert_eq!(collection.value("a"), Some(json!(1)));
        assert_eq!(collection.value("b"), Some(json!(0)));
        assert_eq!(channel.state(), ChannelState::Uninitialized);
    }

    #[test]
    fn patch_mode_accumulates_until_flush() {
        let (collection, channel, recorder) = authority(SyncConfig::default().with_mode(SyncMode::Patch));
        channel.start().unwrap();
        recorder.messages();

        collection.set("count", json!(1)).unwrap();
        collection.set("count", json!(2)).unwrap();
        collection.remove("count");
        collection.set("fresh", json!(true)).unwrap();
        assert!(recorder.messages().is_empty());

        channel.flush().unwrap();
        let sent = recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].removed, vec!["count".to_string()]);
        assert_eq!(sent[0].state.as_ref().unwrap()["fresh"], json!(true));
    }

    #[test]
    fn mismatched_component_is_rejected() {
        let (_collection, channel, _recorder) = replica();
        let mut message = init(json!({}));
        message.component_id = "elsewhere".into();
        let err = channel.handle(message).unwrap_err();
        assert!(matches!(err, Error::ComponentMismatch { .. }));
    }

    #[test]
    fn second_channel_for_same_peer_fails() {
        let collection = StateCollection::new("room");
        let peer = PeerId::new();
        let recorder: Arc<dyn Transport> = Arc::new(Recorder::default());

        let _first = SyncChannel::with_peer(
            collection.clone(),
            Role::Authority,
            peer,
            recorder.clone(),
            SyncConfig::default(),
        )
        .unwrap();
        let second = SyncChannel::with_peer(collection, Role::Authority, peer, recorder, SyncConfig::default());
        assert!(matches!(second, Err(Error::AlreadyAttached { .. })));
    }
}
