//! Wire messages.
//!
//! Every frame carries one [`SyncMessage`], a flat object tagged by its
//! `type` field. Fields a message kind does not use are omitted.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pending::WriteId;
use crate::error::{Error, Result};
use crate::state::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Full snapshot sent by the authority when a channel starts.
    Init,
    /// One key changed.
    Update,
    /// Without state: a resync request. With state: the full snapshot
    /// answering it.
    Sync,
    /// Several keys changed or were removed.
    Patch,
    /// A write was rejected.
    Error,
    /// A write (or `init`) was accepted.
    Ack,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Init => "init",
            MessageKind::Update => "update",
            MessageKind::Sync => "sync",
            MessageKind::Patch => "patch",
            MessageKind::Error => "error",
            MessageKind::Ack => "ack",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Absent and `null` are the same value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_id: Option<WriteId>,
    /// Milliseconds since the UNIX epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl SyncMessage {
    fn new(kind: MessageKind, component_id: impl Into<String>) -> Self {
        Self {
            kind,
            component_id: component_id.into(),
            key: None,
            value: None,
            state: None,
            removed: Vec::new(),
            error: None,
            write_id: None,
            timestamp: now_millis(),
        }
    }

    pub fn init(component_id: impl Into<String>, state: Snapshot) -> Self {
        Self {
            state: Some(state),
            ..Self::new(MessageKind::Init, component_id)
        }
    }

    pub fn update(component_id: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value),
            ..Self::new(MessageKind::Update, component_id)
        }
    }

    /// `state` holds added and changed keys, `removed` the deleted ones.
    pub fn patch(component_id: impl Into<String>, state: Snapshot, removed: Vec<String>) -> Self {
        Self {
            state: Some(state),
            removed,
            ..Self::new(MessageKind::Patch, component_id)
        }
    }

    /// Ask the authority for a full snapshot.
    pub fn sync_request(component_id: impl Into<String>) -> Self {
        Self::new(MessageKind::Sync, component_id)
    }

    pub fn sync_response(component_id: impl Into<String>, state: Snapshot) -> Self {
        Self {
            state: Some(state),
            ..Self::new(MessageKind::Sync, component_id)
        }
    }

    pub fn error(
        component_id: impl Into<String>,
        key: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            key,
            error: Some(error.into()),
            ..Self::new(MessageKind::Error, component_id)
        }
    }

    pub fn ack(component_id: impl Into<String>, write_id: Option<WriteId>) -> Self {
        Self {
            write_id,
            ..Self::new(MessageKind::Ack, component_id)
        }
    }

    pub fn with_write_id(mut self, write_id: WriteId) -> Self {
        self.write_id = Some(write_id);
        self
    }

    /// The value of an `update`, with absence read as `null`.
    pub fn value_or_null(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }

    /// Per-key writes carried by an `update` or `patch`.
    pub fn changes(&self) -> Vec<(String, Option<Value>)> {
        match self.kind {
            MessageKind::Update => self
                .key
                .iter()
                .map(|key| (key.clone(), Some(self.value_or_null())))
                .collect(),
            MessageKind::Patch => {
                let mut changes: Vec<_> = self.removed.iter().map(|key| (key.clone(), None)).collect();
                if let Some(state) = &self.state {
                    changes.extend(state.iter().map(|(key, value)| (key.clone(), Some(value.clone()))));
                }
                changes
            }
            _ => Vec::new(),
        }
    }

    /// Check that the fields required by this message kind are present.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| Error::UnexpectedMessage {
            kind: self.kind.to_string(),
            detail: format!("missing `{field}`"),
        };

        match self.kind {
            MessageKind::Init if self.state.is_none() => Err(missing("state")),
            MessageKind::Update if self.key.is_none() => Err(missing("key")),
            MessageKind::Error if self.error.is_none() => Err(missing("error")),
            _ => Ok(()),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
