//! Join/rejoin, push and teardown shared by every synchronizer.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

use hubchat_core::{
    ChannelHandle, Dispatcher, Event, OutcomeKind, ParamsProvider, PendingReply, PushError, Reply,
    SubscriptionRef, Transport, UsageError, reply_pair,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Lifecycle of one channel-backed synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    /// `connect()` not called yet, or the instance was disconnected.
    Unjoined,
    /// Join sent, no successful reply yet.
    Joining,
    /// At least one join succeeded.
    Ready,
}

/// Channel handle, phase, pending replies and dispatcher of one synchronizer.
pub(crate) struct ChannelSession<E: Event> {
    topic: String,
    timeout: Duration,
    transport: Rc<dyn Transport>,
    channel: RefCell<Option<Rc<dyn ChannelHandle>>>,
    phase: Cell<JoinPhase>,
    connect_called: Cell<bool>,
    pending: RefCell<Vec<Weak<dyn PendingReply>>>,
    dispatcher: Dispatcher<E>,
}

impl<E: Event + 'static> ChannelSession<E> {
    pub(crate) fn new(transport: Rc<dyn Transport>, topic: String, timeout: Duration) -> Self {
        Self {
            topic,
            timeout,
            transport,
            channel: RefCell::new(None),
            phase: Cell::new(JoinPhase::Unjoined),
            connect_called: Cell::new(false),
            pending: RefCell::new(Vec::new()),
            dispatcher: Dispatcher::new(),
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn phase(&self) -> JoinPhase {
        self.phase.get()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.channel.borrow().is_some()
    }

    pub(crate) fn on(
        &self,
        event: &str,
        callback: impl FnMut(&E) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.dispatcher.on(event, callback)
    }

    pub(crate) fn once(
        &self,
        event: &str,
        callback: impl FnMut(&E) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.dispatcher.once(event, callback)
    }

    pub(crate) fn off(&self, event: &str, sub_ref: SubscriptionRef) -> Result<(), UsageError> {
        self.dispatcher.off(event, sub_ref)
    }

    pub(crate) fn off_event(&self, event: &str) -> Result<(), UsageError> {
        self.dispatcher.off_event(event)
    }

    pub(crate) fn off_all(&self) {
        self.dispatcher.clear();
    }

    pub(crate) fn emit(&self, event: E) {
        if let Err(err) = self.dispatcher.send(&event) {
            warn!(topic = %self.topic, error = %err, "dropping event outside vocabulary");
        }
    }

    /// Send `event` and settle the returned reply from its outcome.
    ///
    /// `on_ok` runs when the ok outcome is delivered, so any merge it does
    /// happens in transport order. A late outcome after timeout or
    /// disconnect is ignored.
    pub(crate) fn push<T: 'static>(
        &self,
        event: &str,
        payload: Value,
        on_ok: impl FnOnce(Value) -> Result<T, PushError> + 'static,
    ) -> Result<Reply<T>, UsageError> {
        let channel = self.channel.borrow().clone();
        let Some(channel) = channel else {
            return Err(UsageError::not_ready(event));
        };
        if self.phase.get() != JoinPhase::Ready {
            return Err(UsageError::not_ready(event));
        }

        let (slot, reply) = reply_pair::<T>();
        self.track(slot.clone());

        trace!(topic = %self.topic, event, "sending push");
        let handle = channel.push(event, payload);

        let context = event.to_owned();
        let ok_slot = slot.clone();
        let mut on_ok = Some(on_ok);
        handle.on_outcome(
            OutcomeKind::Ok,
            Box::new(move |payload| {
                if ok_slot.is_settled() {
                    warn!(event = %context, "ignoring reply that arrived after settlement");
                    return;
                }
                if let Some(on_ok) = on_ok.take() {
                    ok_slot.settle(on_ok(payload));
                }
            }),
        );

        let context = event.to_owned();
        let error_slot = slot.clone();
        handle.on_outcome(
            OutcomeKind::Error,
            Box::new(move |reason| {
                if !error_slot.settle(Err(PushError::Rejected { reason })) {
                    warn!(event = %context, "ignoring rejection that arrived after settlement");
                }
            }),
        );

        handle.on_outcome(
            OutcomeKind::Timeout,
            Box::new(move |_| {
                slot.settle(Err(PushError::Timeout));
            }),
        );

        Ok(reply)
    }

    fn track(&self, slot: Rc<dyn PendingReply>) {
        let mut pending = self.pending.borrow_mut();
        pending.retain(|entry| entry.upgrade().is_some_and(|entry| !entry.is_settled()));
        pending.push(Rc::downgrade(&slot));
    }

    fn close_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for entry in pending.iter().filter_map(Weak::upgrade) {
            entry.close();
        }
    }
}

/// State and merge rules of one synchronizer kind.
pub(crate) trait ChannelState: 'static {
    type Event: Event + 'static;

    /// Server-pushed events this channel subscribes to.
    const SERVER_EVENTS: &'static [&'static str];

    fn session(&self) -> &ChannelSession<Self::Event>;

    /// Resume parameters built from local high-water state.
    fn join_params(&self) -> Value;

    /// Merge a join reply. `rejoin` is `false` for the first successful join.
    ///
    /// Must validate the payload before mutating anything.
    fn apply_join(&self, payload: Value, rejoin: bool) -> Result<(), PushError>;

    fn apply_server_event(&self, event: &str, payload: Value) -> Result<(), PushError>;

    fn error_event(error: PushError) -> Self::Event;

    /// Drop all local state back to its pre-`connect` shape.
    fn reset(&self);
}

/// Open and join the channel. Valid once per instance.
pub(crate) fn connect<S: ChannelState>(state: &Rc<S>) -> Result<(), UsageError> {
    let session = state.session();
    if session.connect_called.replace(true) {
        return Err(UsageError::already_connected(&session.topic));
    }

    let weak = Rc::downgrade(state);
    let join_params: ParamsProvider = Rc::new(move || {
        weak.upgrade()
            .map(|state| state.join_params())
            .unwrap_or(Value::Null)
    });
    let channel = session
        .transport
        .open_channel(&session.topic, join_params, session.timeout);

    for &event in S::SERVER_EVENTS {
        let weak = Rc::downgrade(state);
        channel.on_server_event(
            event,
            Box::new(move |payload| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let session = state.session();
                if !session.is_attached() {
                    trace!(topic = %session.topic, event, "ignoring push on detached channel");
                    return;
                }
                if let Err(err) = state.apply_server_event(event, payload) {
                    warn!(topic = %session.topic, event, error = %err, "server event not applied");
                    session.emit(S::error_event(err));
                }
            }),
        );
    }

    *session.channel.borrow_mut() = Some(channel.clone());
    session.phase.set(JoinPhase::Joining);
    debug!(topic = %session.topic, "joining channel");

    let join = channel.join();

    let weak = Rc::downgrade(state);
    join.on_outcome(
        OutcomeKind::Ok,
        Box::new(move |payload| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let session = state.session();
            if !session.is_attached() {
                return;
            }

            let previous = session.phase.replace(JoinPhase::Ready);
            let rejoin = previous == JoinPhase::Ready;
            debug!(topic = %session.topic, rejoin, "channel joined");

            if let Err(err) = state.apply_join(payload, rejoin) {
                session.phase.set(previous);
                warn!(topic = %session.topic, error = %err, "join reply not applied");
                session.emit(S::error_event(err));
            }
        }),
    );

    let weak = Rc::downgrade(state);
    join.on_outcome(
        OutcomeKind::Error,
        Box::new(move |reason| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let session = state.session();
            if session.is_attached() {
                warn!(topic = %session.topic, %reason, "join rejected");
                session.emit(S::error_event(PushError::Rejected { reason }));
            }
        }),
    );

    let weak = Rc::downgrade(state);
    join.on_outcome(
        OutcomeKind::Timeout,
        Box::new(move |_| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let session = state.session();
            if session.is_attached() {
                warn!(topic = %session.topic, "join timed out");
                session.emit(S::error_event(PushError::Timeout));
            }
        }),
    );

    Ok(())
}

/// Leave the channel and make the instance inert.
pub(crate) fn disconnect<S: ChannelState>(state: &S) {
    let session = state.session();
    let channel = session.channel.borrow_mut().take();
    if let Some(channel) = channel {
        debug!(topic = %session.topic, "leaving channel");
        channel.leave();
    }
    session.close_pending();
    session.dispatcher.clear();
    session.phase.set(JoinPhase::Unjoined);
    state.reset();
}
