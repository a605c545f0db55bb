//! Stateful session and channel synchronization on top of `hubchat-core`.
//!
//! A [`SessionConnector`] owns the transport connection and the credential.
//! Once the session identity is known it hands out synchronizers, each bound
//! to one channel: [`RoomSync`] / [`HubRoomSync`] for a room timeline,
//! [`InboxSync`] / [`HubInboxSync`] for a filtered room list, and
//! [`NotifierSync`] for the cross-room stream of new messages.
//!
//! Everything here is single-threaded (`Rc`-based) and driven by transport
//! callbacks. Requests return a [`Reply`](hubchat_core::Reply) future.

mod channel;
mod inbox;
mod notifier;
mod room;
mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::JoinPhase;
pub use inbox::{HubInboxFilter, HubInboxSync, InboxFilter, InboxSync, SearchQuery};
pub use notifier::NotifierSync;
pub use room::{HubRoomSync, PostMessage, RoomSync};
pub use session::{CredentialRefresher, LocalTask, SessionConnector, SessionOptions, TaskSpawner};
