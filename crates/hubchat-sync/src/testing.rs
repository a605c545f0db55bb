//! Scripted in-memory transport.
//!
//! Nothing happens on its own: the test (or the smoke app) fires socket
//! events and push outcomes by hand. Firing the join ok outcome a second
//! time is how a rejoin after a reconnect is modelled.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use hubchat_core::{
    ChannelHandle, OutcomeKind, ParamsProvider, PayloadHandler, PushHandle, Transport,
};
use serde_json::Value;

type Handlers<A> = RefCell<Vec<Box<dyn FnMut(A)>>>;

/// Invoke every handler, keeping handlers added while firing.
fn fire<A: Clone>(handlers: &Handlers<A>, arg: A) {
    let mut current = std::mem::take(&mut *handlers.borrow_mut());
    for handler in current.iter_mut() {
        handler(arg.clone());
    }
    let mut slot = handlers.borrow_mut();
    current.append(&mut slot);
    *slot = current;
}

#[derive(Default)]
pub struct MockTransport {
    open_handlers: Handlers<()>,
    close_handlers: Handlers<()>,
    error_handlers: Handlers<String>,
    params: RefCell<Option<ParamsProvider>>,
    connect_calls: Cell<usize>,
    disconnect_calls: Cell<usize>,
    channels: RefCell<Vec<Rc<MockChannel>>>,
}

impl MockTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Report the socket as open.
    pub fn open(&self) {
        fire(&self.open_handlers, ());
    }

    /// Report the socket as dropped.
    pub fn close(&self) {
        fire(&self.close_handlers, ());
    }

    /// Report a socket error.
    pub fn fail(&self, message: &str) {
        fire(&self.error_handlers, message.to_owned());
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.get()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.get()
    }

    /// Connection parameters as the socket would compute them right now.
    pub fn connect_params(&self) -> Option<Value> {
        let params = self.params.borrow().clone();
        params.map(|params| params())
    }

    /// Most recently opened channel for `topic`.
    pub fn channel(&self, topic: &str) -> Option<Rc<MockChannel>> {
        self.channels
            .borrow()
            .iter()
            .rev()
            .find(|channel| channel.topic == topic)
            .cloned()
    }

    pub fn channels(&self) -> Vec<Rc<MockChannel>> {
        self.channels.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn open_channel(
        &self,
        topic: &str,
        join_params: ParamsProvider,
        timeout: Duration,
    ) -> Rc<dyn ChannelHandle> {
        let channel = Rc::new(MockChannel {
            topic: topic.to_owned(),
            join_params,
            timeout,
            join: RefCell::new(None),
            server_handlers: RefCell::new(HashMap::new()),
            pushes: RefCell::new(Vec::new()),
            left: Cell::new(false),
        });
        self.channels.borrow_mut().push(channel.clone());
        channel
    }

    fn on_open(&self, mut handler: Box<dyn FnMut()>) {
        self.open_handlers
            .borrow_mut()
            .push(Box::new(move |()| handler()));
    }

    fn on_close(&self, mut handler: Box<dyn FnMut()>) {
        self.close_handlers
            .borrow_mut()
            .push(Box::new(move |()| handler()));
    }

    fn on_error(&self, handler: Box<dyn FnMut(String)>) {
        self.error_handlers.borrow_mut().push(handler);
    }

    fn connect(&self, params: ParamsProvider) {
        self.connect_calls.set(self.connect_calls.get() + 1);
        *self.params.borrow_mut() = Some(params);
    }

    fn disconnect(&self) {
        self.disconnect_calls.set(self.disconnect_calls.get() + 1);
    }
}

/// A request recorded by [`MockChannel::push`].
#[derive(Clone)]
pub struct SentPush {
    pub event: String,
    pub payload: Value,
    pub push: Rc<MockPush>,
}

pub struct MockChannel {
    topic: String,
    join_params: ParamsProvider,
    timeout: Duration,
    join: RefCell<Option<Rc<MockPush>>>,
    server_handlers: RefCell<HashMap<String, Vec<PayloadHandler>>>,
    pushes: RefCell<Vec<SentPush>>,
    left: Cell<bool>,
}

impl MockChannel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Join parameters as a (re)join would send them right now.
    pub fn join_params(&self) -> Value {
        (self.join_params)()
    }

    pub fn has_joined(&self) -> bool {
        self.join.borrow().is_some()
    }

    pub fn join_reply_ok(&self, payload: Value) {
        if let Some(join) = self.join_push() {
            join.reply_ok(payload);
        }
    }

    pub fn join_reply_error(&self, reason: Value) {
        if let Some(join) = self.join_push() {
            join.reply_error(reason);
        }
    }

    pub fn join_time_out(&self) {
        if let Some(join) = self.join_push() {
            join.time_out();
        }
    }

    /// Deliver a server-initiated event. Still delivered after `leave()`.
    pub fn server_push(&self, event: &str, payload: Value) {
        let mut handlers = self
            .server_handlers
            .borrow_mut()
            .remove(event)
            .unwrap_or_default();
        for handler in handlers.iter_mut() {
            handler(payload.clone());
        }
        let mut map = self.server_handlers.borrow_mut();
        let slot = map.entry(event.to_owned()).or_default();
        handlers.append(slot);
        *slot = handlers;
    }

    pub fn pushes(&self) -> Vec<SentPush> {
        self.pushes.borrow().clone()
    }

    pub fn last_push(&self) -> Option<SentPush> {
        self.pushes.borrow().last().cloned()
    }

    pub fn is_left(&self) -> bool {
        self.left.get()
    }

    fn join_push(&self) -> Option<Rc<MockPush>> {
        self.join.borrow().clone()
    }
}

impl ChannelHandle for MockChannel {
    fn join(&self) -> Rc<dyn PushHandle> {
        let push = Rc::new(MockPush::default());
        *self.join.borrow_mut() = Some(push.clone());
        push
    }

    fn push(&self, event: &str, payload: Value) -> Rc<dyn PushHandle> {
        let push = Rc::new(MockPush::default());
        self.pushes.borrow_mut().push(SentPush {
            event: event.to_owned(),
            payload,
            push: push.clone(),
        });
        push
    }

    fn on_server_event(&self, event: &str, handler: PayloadHandler) {
        self.server_handlers
            .borrow_mut()
            .entry(event.to_owned())
            .or_default()
            .push(handler);
    }

    fn leave(&self) {
        self.left.set(true);
    }
}

#[derive(Default)]
pub struct MockPush {
    handlers: RefCell<Vec<(OutcomeKind, PayloadHandler)>>,
}

impl MockPush {
    pub fn reply_ok(&self, payload: Value) {
        self.fire(OutcomeKind::Ok, payload);
    }

    pub fn reply_error(&self, reason: Value) {
        self.fire(OutcomeKind::Error, reason);
    }

    pub fn time_out(&self) {
        self.fire(OutcomeKind::Timeout, Value::Null);
    }

    fn fire(&self, kind: OutcomeKind, payload: Value) {
        let mut handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        for (_, handler) in handlers.iter_mut().filter(|(k, _)| *k == kind) {
            handler(payload.clone());
        }
        let mut slot = self.handlers.borrow_mut();
        handlers.append(&mut slot);
        *slot = handlers;
    }
}

impl PushHandle for MockPush {
    fn on_outcome(&self, kind: OutcomeKind, handler: PayloadHandler) {
        self.handlers.borrow_mut().push((kind, handler));
    }
}
