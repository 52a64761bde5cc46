use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{GroupId, Snapshot, TabId};

/// Snapshots may carry inline `data:` favicons, so frames are allowed to be large.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub const KEEPALIVE_TYPE: &str = "ping";

/// Action request sent from the panel to every connected agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Activate {
        id: TabId,
    },
    Close {
        id: TabId,
    },
    Duplicate {
        id: TabId,
    },
    TogglePin {
        id: TabId,
    },
    CloseOthers {
        id: TabId,
    },
    RemoveFromGroup {
        id: TabId,
    },
    AddToGroup {
        id: TabId,
        #[serde(rename = "groupId")]
        group_id: GroupId,
    },
    AddToNewGroup {
        id: TabId,
    },
    NewTab,
    RequestUpdate,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::Activate { .. } => "activate",
            Command::Close { .. } => "close",
            Command::Duplicate { .. } => "duplicate",
            Command::TogglePin { .. } => "toggle_pin",
            Command::CloseOthers { .. } => "close_others",
            Command::RemoveFromGroup { .. } => "remove_from_group",
            Command::AddToGroup { .. } => "add_to_group",
            Command::AddToNewGroup { .. } => "add_to_new_group",
            Command::NewTab => "new_tab",
            Command::RequestUpdate => "request_update",
        }
    }

    pub fn tab_id(&self) -> Option<TabId> {
        match *self {
            Command::Activate { id }
            | Command::Close { id }
            | Command::Duplicate { id }
            | Command::TogglePin { id }
            | Command::CloseOthers { id }
            | Command::RemoveFromGroup { id }
            | Command::AddToGroup { id, .. }
            | Command::AddToNewGroup { id } => Some(id),
            Command::NewTab | Command::RequestUpdate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Keepalive,
    Snapshot(Snapshot),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("duplicate tab id in snapshot: {0}")]
    DuplicateTabId(TabId),
    #[error("duplicate group id in snapshot: {0}")]
    DuplicateGroupId(GroupId),
}

pub fn encode_command(command: &Command) -> Result<String, ProtocolError> {
    serde_json::to_string(command).map_err(|err| ProtocolError::Encode(err.to_string()))
}

/// Classifies one inbound text frame. Objects carrying a `type` field are
/// control messages; anything else must be a full snapshot.
pub fn decode_inbound(bytes: &[u8], max_frame_bytes: usize) -> Result<Inbound, ProtocolError> {
    if bytes.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| ProtocolError::Decode(err.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::Decode("expected a JSON object".to_string()));
    };
    if let Some(kind) = object.get("type") {
        return match kind.as_str() {
            Some(KEEPALIVE_TYPE) => Ok(Inbound::Keepalive),
            Some(other) => Err(ProtocolError::UnknownType(other.to_string())),
            None => Err(ProtocolError::UnknownType(kind.to_string())),
        };
    }
    let snapshot: Snapshot =
        serde_json::from_value(value).map_err(|err| ProtocolError::Decode(err.to_string()))?;
    snapshot.validate()?;
    Ok(Inbound::Snapshot(snapshot))
}
