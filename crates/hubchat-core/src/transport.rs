//! Capabilities the synchronization layer needs from the socket transport.
//!
//! The transport owns framing, heartbeats and reconnect scheduling. After a
//! drop it reopens the socket on its own and re-runs the join of every open
//! channel, which re-invokes the join push's outcome handlers.

use std::{rc::Rc, time::Duration};

use serde_json::Value;

use crate::outcome::OutcomeKind;

/// Produces a fresh payload each time the transport (re)connects or (re)joins.
pub type ParamsProvider = Rc<dyn Fn() -> Value>;

/// Handler for a push outcome or a server-pushed event.
///
/// `Timeout` outcomes deliver `Value::Null`.
pub type PayloadHandler = Box<dyn FnMut(Value)>;

/// A request in flight on a channel.
pub trait PushHandle {
    /// Register a handler for one outcome kind.
    ///
    /// For an ordinary push exactly one kind fires, once. For the join push
    /// the `Ok` handler fires again on every rejoin.
    fn on_outcome(&self, kind: OutcomeKind, handler: PayloadHandler);
}

/// One logical channel multiplexed over the transport.
pub trait ChannelHandle {
    /// Start joining. One call per channel instance.
    fn join(&self) -> Rc<dyn PushHandle>;

    fn push(&self, event: &str, payload: Value) -> Rc<dyn PushHandle>;

    fn on_server_event(&self, event: &str, handler: PayloadHandler);

    fn leave(&self);
}

/// The socket connection shared by every channel.
pub trait Transport {
    /// Open a channel. `join_params` is consulted on every (re)join; `timeout`
    /// is the deadline for the join and for each push.
    fn open_channel(
        &self,
        topic: &str,
        join_params: ParamsProvider,
        timeout: Duration,
    ) -> Rc<dyn ChannelHandle>;

    fn on_open(&self, handler: Box<dyn FnMut()>);

    fn on_close(&self, handler: Box<dyn FnMut()>);

    fn on_error(&self, handler: Box<dyn FnMut(String)>);

    /// Open the socket. `params` is consulted on every connection attempt.
    fn connect(&self, params: ParamsProvider);

    fn disconnect(&self);
}
