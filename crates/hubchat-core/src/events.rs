//! Consumer-facing event vocabularies, one enum per component.

use crate::{
    dispatcher::Event,
    error::{ConnectionError, PushError},
    types::{Identity, InboxItem, Marker, Message, NotifierItem, Room, RoomSnapshot, User},
};

/// Events emitted by the session connector.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport reached `Online` for the first time.
    Connected,
    /// Transport reached `Online` again after a drop.
    Reconnected,
    /// Transport dropped.
    Disconnected,
    /// Transport-level failure.
    Error(ConnectionError),
    /// The user channel was joined and the identity is known.
    Ready(Identity),
    /// The user record changed on the server.
    UserUpdated(User),
}

impl Event for SessionEvent {
    const NAMES: &'static [&'static str] = &[
        "connected",
        "reconnected",
        "disconnected",
        "error",
        "ready",
        "user_updated",
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
            Self::Error(_) => "error",
            Self::Ready(_) => "ready",
            Self::UserUpdated(_) => "user_updated",
        }
    }
}

/// Which of the two room marker slots moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSide {
    /// The viewer's side of the conversation.
    Own,
    /// The counterpart's side.
    Other,
}

/// Events emitted by a room synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// First successful join.
    Ready(RoomSnapshot),
    MessagePosted(Message),
    MessageDeleted { message_id: u64 },
    MarkerUpdated { side: MarkerSide, marker: Marker },
    RoomUpdated(Room),
    Error(PushError),
}

impl Event for RoomEvent {
    const NAMES: &'static [&'static str] = &[
        "ready",
        "message_posted",
        "message_deleted",
        "marker_updated",
        "room_updated",
        "error",
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::MessagePosted(_) => "message_posted",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::MarkerUpdated { .. } => "marker_updated",
            Self::RoomUpdated(_) => "room_updated",
            Self::Error(_) => "error",
        }
    }
}

/// Events emitted by an inbox synchronizer. Lists are always in display order.
#[derive(Debug, Clone, PartialEq)]
pub enum InboxEvent {
    Ready(Vec<InboxItem>),
    Updated(Vec<InboxItem>),
    Error(PushError),
}

impl Event for InboxEvent {
    const NAMES: &'static [&'static str] = &["ready", "updated", "error"];

    fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Updated(_) => "updated",
            Self::Error(_) => "error",
        }
    }
}

/// Events emitted by a notifier synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifierEvent {
    Ready(Vec<NotifierItem>),
    Updated(NotifierItem),
    Error(PushError),
}

impl Event for NotifierEvent {
    const NAMES: &'static [&'static str] = &["ready", "updated", "error"];

    fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Updated(_) => "updated",
            Self::Error(_) => "error",
        }
    }
}
