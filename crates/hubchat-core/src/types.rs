use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection state reported by the session connector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect()` has not been called, or `disconnect()` was.
    Inactive,
    /// Waiting for a credential or for the transport to open.
    Connecting,
    /// Transport is open.
    Online,
}

/// Opaque auth token. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Which side of the user/hub relationship a view belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViewSide {
    /// End user talking to a hub.
    Member,
    /// Operator acting on behalf of a hub.
    Hub,
}

/// Runtime tuning for channel synchronization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Deadline handed to the transport for joins and pushes.
    pub channel_timeout_ms: u64,
    /// Messages requested on a first room join.
    pub room_history_limit: u16,
    /// Bound of the in-memory room message window.
    pub timeline_max_items: usize,
    /// Hard cap applied to `load_earlier` page sizes.
    pub pagination_limit_cap: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: 10_000,
            room_history_limit: 30,
            timeline_max_items: 500,
            pagination_limit_cap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hub {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Who the session belongs to. `hub` is present for privileged users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user: User,
    #[serde(default)]
    pub hub: Option<Hub>,
}

impl Identity {
    pub fn side(&self) -> ViewSide {
        if self.hub.is_some() {
            ViewSide::Hub
        } else {
            ViewSide::Member
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upload {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub url: String,
}

/// A chat message. Ids are assigned by the server and grow over time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub upload: Option<Upload>,
    /// Creation time in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Per-user read receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marker {
    pub message_id: u64,
    pub user_id: String,
    /// Update time in milliseconds since Unix epoch.
    pub updated_at_ms: u64,
}

/// Room record: metadata plus the end user owning the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: String,
    pub owner: User,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub archived: bool,
    /// Archive expiry in milliseconds since Unix epoch, when archived with one.
    #[serde(default)]
    pub archived_until_ms: Option<u64>,
    #[serde(default)]
    pub assignee: Option<User>,
}

/// One inbox row: a room summary and its most recent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboxItem {
    pub room: Room,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub is_new: bool,
}

impl InboxItem {
    pub fn room_id(&self) -> &str {
        &self.room.id
    }

    /// Time of the last message, if the room has any.
    pub fn activity_ms(&self) -> Option<u64> {
        self.last_message.as_ref().map(|message| message.timestamp_ms)
    }
}

/// A message on the cross-room notification stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifierItem {
    pub room: Room,
    pub message: Message,
}

/// Full room state handed out with the room `ready` event.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room: Room,
    pub messages: Vec<Message>,
    pub own_marker: Option<Marker>,
    pub other_marker: Option<Marker>,
}
