//! Transport-free building blocks of the hubchat client.
//!
//! This crate defines the event dispatcher, error taxonomy, domain records,
//! the connection state machine, the merge structures behind the room,
//! inbox and notifier projections, and the transport capability traits.

/// Typed publish/subscribe with a fixed event vocabulary.
pub mod dispatcher;
/// Usage, connection and push error types.
pub mod error;
/// Consumer-facing event enums.
pub mod events;
/// Inbox filter predicate and ordered item set.
pub mod inbox;
/// Monotonic read-marker slots.
pub mod markers;
/// Push outcome normalization and payload decoding.
pub mod outcome;
/// Single-shot reply futures.
pub mod reply;
/// Session connection state machine.
pub mod state_machine;
/// Bounded room message window.
pub mod timeline;
/// Transport capability traits.
pub mod transport;
/// Domain records and configuration.
pub mod types;
/// Notifier high-water mark.
pub mod watermark;

pub use dispatcher::{Dispatcher, Event, SubscriptionRef};
pub use error::{ConnectionError, ConnectionErrorKind, PushError, UsageError};
pub use events::{InboxEvent, MarkerSide, NotifierEvent, RoomEvent, SessionEvent};
pub use inbox::{Assignee, InboxItems, InboxPredicate};
pub use markers::{MarkerPair, marker_side};
pub use outcome::{OutcomeKind, PushOutcome, decode, decode_field, normalize_push_outcome};
pub use reply::{PendingReply, Reply, ReplySlot, reply_pair};
pub use state_machine::ConnectionStateMachine;
pub use timeline::MessageWindow;
pub use transport::{ChannelHandle, ParamsProvider, PayloadHandler, PushHandle, Transport};
pub use types::{
    ConnectionState, Credential, Hub, Identity, InboxItem, Marker, Message, NotifierItem, Room,
    RoomSnapshot, SyncConfig, Upload, User, ViewSide,
};
pub use watermark::Watermark;
