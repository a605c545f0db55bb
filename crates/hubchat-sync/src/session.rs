use std::{
    cell::{Cell, RefCell},
    error::Error,
    future::Future,
    pin::Pin,
    rc::Rc,
    time::Duration,
};

use async_trait::async_trait;
use hubchat_core::{
    ChannelHandle, ConnectionError, ConnectionState, ConnectionStateMachine, Credential,
    Dispatcher, Identity, OutcomeKind, ParamsProvider, SessionEvent, SubscriptionRef, SyncConfig,
    Transport, UsageError, User, ViewSide, decode,
};
use serde_json::{Value, json};
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::{
    inbox::{HubInboxFilter, HubInboxSync, InboxFilter, InboxSync},
    notifier::NotifierSync,
    room::{HubRoomSync, RoomSync},
};

const USER_TOPIC: &str = "user:self";

/// Source of fresh credentials.
#[async_trait(?Send)]
pub trait CredentialRefresher {
    async fn refresh(&self) -> Result<Credential, Box<dyn Error>>;
}

/// Background work queued by the connector.
pub type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// Executor that runs credential refreshes on the connector's thread.
pub trait TaskSpawner {
    fn spawn(&self, task: LocalTask);
}

/// Tasks are queued on the set and run whenever the set is driven.
impl TaskSpawner for LocalSet {
    fn spawn(&self, task: LocalTask) {
        self.spawn_local(task);
    }
}

/// Construction options for [`SessionConnector`].
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Token used for the first connection attempt.
    pub credential: Option<Credential>,
    /// Called when no credential is set at `connect()`, and after transport errors.
    pub refresher: Option<Rc<dyn CredentialRefresher>>,
    /// Required together with `refresher`.
    pub spawner: Option<Rc<dyn TaskSpawner>>,
    pub config: SyncConfig,
}

/// Owner of the transport connection and the session credential.
///
/// Once online it joins the private user channel; the identity it yields
/// gates the synchronizer factories. Credential refreshes run on the
/// configured [`TaskSpawner`].
pub struct SessionConnector {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    transport: Rc<dyn Transport>,
    config: SyncConfig,
    refresher: Option<Rc<dyn CredentialRefresher>>,
    spawner: Option<Rc<dyn TaskSpawner>>,
    credential: RefCell<Option<Credential>>,
    machine: RefCell<ConnectionStateMachine>,
    awaiting_credential: Cell<bool>,
    refresh_in_flight: Cell<bool>,
    user_channel: RefCell<Option<Rc<dyn ChannelHandle>>>,
    identity: RefCell<Option<Identity>>,
    dispatcher: Dispatcher<SessionEvent>,
}

impl SessionConnector {
    pub fn new(transport: Rc<dyn Transport>, options: SessionOptions) -> Self {
        let inner = Rc::new(SessionInner {
            transport,
            config: options.config,
            refresher: options.refresher,
            spawner: options.spawner,
            credential: RefCell::new(options.credential),
            machine: RefCell::new(ConnectionStateMachine::default()),
            awaiting_credential: Cell::new(false),
            refresh_in_flight: Cell::new(false),
            user_channel: RefCell::new(None),
            identity: RefCell::new(None),
            dispatcher: Dispatcher::new(),
        });
        SessionInner::attach_transport(&inner);
        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.machine.borrow().state()
    }

    /// Identity yielded by the user channel, once joined.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.borrow().clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.credential.borrow().clone()
    }

    pub fn on(
        &self,
        event: &str,
        callback: impl FnMut(&SessionEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.inner.dispatcher.on(event, callback)
    }

    pub fn once(
        &self,
        event: &str,
        callback: impl FnMut(&SessionEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.inner.dispatcher.once(event, callback)
    }

    pub fn off(&self, event: &str, sub_ref: SubscriptionRef) -> Result<(), UsageError> {
        self.inner.dispatcher.off(event, sub_ref)
    }

    pub fn off_event(&self, event: &str) -> Result<(), UsageError> {
        self.inner.dispatcher.off_event(event)
    }

    pub fn off_all(&self) {
        self.inner.dispatcher.clear();
    }

    /// Open the transport, fetching a credential first when none is set.
    pub fn connect(&self) -> Result<(), UsageError> {
        let inner = &self.inner;
        let has_credential = inner.credential.borrow().is_some();
        if !has_credential && inner.refresher.is_none() {
            return Err(UsageError::missing_credential());
        }
        if inner.refresher.is_some() && inner.spawner.is_none() {
            return Err(UsageError::invalid_argument(
                "spawner",
                "required when a refresher is set",
            ));
        }
        inner.machine.borrow_mut().begin_connect()?;

        if has_credential {
            debug!("connecting with configured credential");
            inner.open_transport();
        } else {
            debug!("connecting after initial credential fetch");
            inner.awaiting_credential.set(true);
            inner.spawn_refresh();
        }
        Ok(())
    }

    /// Close the transport and clear every subscription. No-op when inactive.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        if !inner.machine.borrow().is_active() {
            return;
        }

        debug!("disconnecting session");
        inner.machine.borrow_mut().reset();
        inner.awaiting_credential.set(false);

        let channel = inner.user_channel.borrow_mut().take();
        if let Some(channel) = channel {
            channel.leave();
        }
        inner.identity.replace(None);
        inner.transport.disconnect();
        inner.dispatcher.clear();
    }

    /// Room synchronizer for an end user.
    pub fn room(&self, room_id: &str) -> Result<RoomSync, UsageError> {
        let identity = self.inner.require_identity("room")?;
        validate_room_id(room_id)?;
        Ok(RoomSync::new(
            self.inner.transport.clone(),
            &self.inner.config,
            room_id,
            identity.side(),
        ))
    }

    /// Room synchronizer with hub-side operations.
    pub fn hub_room(&self, room_id: &str) -> Result<HubRoomSync, UsageError> {
        self.inner.require_hub("hub_room")?;
        validate_room_id(room_id)?;
        Ok(HubRoomSync::new(
            self.inner.transport.clone(),
            &self.inner.config,
            room_id,
        ))
    }

    pub fn inbox(&self, filter: InboxFilter) -> Result<InboxSync, UsageError> {
        let identity = self.inner.require_identity("inbox")?;
        InboxSync::new(
            self.inner.transport.clone(),
            &self.inner.config,
            &identity,
            filter,
        )
    }

    pub fn hub_inbox(&self, filter: HubInboxFilter) -> Result<HubInboxSync, UsageError> {
        let identity = self.inner.require_hub("hub_inbox")?;
        HubInboxSync::new(
            self.inner.transport.clone(),
            &self.inner.config,
            &identity,
            filter,
        )
    }

    pub fn notifier(&self) -> Result<NotifierSync, UsageError> {
        let identity = self.inner.require_identity("notifier")?;
        Ok(NotifierSync::new(
            self.inner.transport.clone(),
            &self.inner.config,
            &identity,
        ))
    }
}

impl SessionInner {
    fn attach_transport(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        this.transport.on_open(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_open();
            }
        }));

        let weak = Rc::downgrade(this);
        this.transport.on_close(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_close();
            }
        }));

        let weak = Rc::downgrade(this);
        this.transport.on_error(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_error(message);
            }
        }));
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.channel_timeout_ms)
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.dispatcher.send(&event) {
            warn!(error = %err, "dropping session event outside vocabulary");
        }
    }

    fn open_transport(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let params: ParamsProvider = Rc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return Value::Null;
            };
            let token = inner
                .credential
                .borrow()
                .as_ref()
                .map(|credential| credential.as_str().to_owned());
            token.map_or(Value::Null, |token| json!({ "token": token }))
        });
        self.transport.connect(params);
    }

    fn handle_open(self: &Rc<Self>) {
        let event = self.machine.borrow_mut().on_open();
        let Some(event) = event else {
            return;
        };
        debug!(?event, "transport open");
        self.emit(event);

        let needs_user_channel =
            self.machine.borrow().is_active() && self.user_channel.borrow().is_none();
        if needs_user_channel {
            self.join_user_channel();
        }
    }

    fn handle_close(&self) {
        let event = self.machine.borrow_mut().on_close();
        if let Some(event) = event {
            debug!("transport closed");
            self.emit(event);
        }
    }

    fn handle_error(self: &Rc<Self>, message: String) {
        if !self.machine.borrow().is_active() {
            debug!(%message, "ignoring transport error while inactive");
            return;
        }
        warn!(%message, "transport error");
        self.emit(SessionEvent::Error(ConnectionError::transport(message)));
        self.spawn_refresh();
    }

    /// Start a credential refresh unless one is already running.
    fn spawn_refresh(self: &Rc<Self>) {
        let (Some(refresher), Some(spawner)) = (self.refresher.clone(), self.spawner.clone())
        else {
            return;
        };
        if self.refresh_in_flight.replace(true) {
            debug!("credential refresh already in flight");
            return;
        }

        let weak = Rc::downgrade(self);
        spawner.spawn(Box::pin(async move {
            let result = refresher.refresh().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.refresh_in_flight.set(false);
            let awaiting = inner.awaiting_credential.replace(false);

            match result {
                Ok(credential) => {
                    debug!("credential refreshed");
                    *inner.credential.borrow_mut() = Some(credential);
                    if awaiting && inner.machine.borrow().is_active() {
                        inner.open_transport();
                    }
                }
                Err(err) => {
                    warn!(error = %err, "credential refresh failed");
                    if awaiting {
                        inner.machine.borrow_mut().reset();
                    }
                    inner.emit(SessionEvent::Error(ConnectionError::credential_refresh(
                        err.to_string(),
                    )));
                }
            }
        }));
    }

    fn join_user_channel(self: &Rc<Self>) {
        let channel =
            self.transport
                .open_channel(USER_TOPIC, Rc::new(|| json!({})), self.timeout());

        let weak = Rc::downgrade(self);
        channel.on_server_event(
            "user_updated",
            Box::new(move |payload| {
                if let Some(inner) = weak.upgrade()
                    && inner.user_channel.borrow().is_some()
                {
                    inner.handle_user_updated(payload);
                }
            }),
        );

        *self.user_channel.borrow_mut() = Some(channel.clone());
        debug!(topic = USER_TOPIC, "joining user channel");
        let join = channel.join();

        let weak = Rc::downgrade(self);
        join.on_outcome(
            OutcomeKind::Ok,
            Box::new(move |payload| {
                if let Some(inner) = weak.upgrade()
                    && inner.user_channel.borrow().is_some()
                {
                    inner.handle_identity(payload);
                }
            }),
        );

        let weak = Rc::downgrade(self);
        join.on_outcome(
            OutcomeKind::Error,
            Box::new(move |reason| {
                if let Some(inner) = weak.upgrade()
                    && inner.user_channel.borrow().is_some()
                {
                    inner.emit(SessionEvent::Error(ConnectionError::user_channel(format!(
                        "join rejected: {reason}"
                    ))));
                }
            }),
        );

        let weak = Rc::downgrade(self);
        join.on_outcome(
            OutcomeKind::Timeout,
            Box::new(move |_| {
                if let Some(inner) = weak.upgrade()
                    && inner.user_channel.borrow().is_some()
                {
                    inner.emit(SessionEvent::Error(ConnectionError::user_channel(
                        "join timed out",
                    )));
                }
            }),
        );
    }

    fn handle_identity(&self, payload: Value) {
        let identity: Identity = match decode("user channel join", payload) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "identity not applied");
                self.emit(SessionEvent::Error(ConnectionError::user_channel(
                    err.to_string(),
                )));
                return;
            }
        };

        let previous = self.identity.replace(Some(identity.clone()));
        match previous {
            None => {
                debug!(user_id = %identity.user.id, side = ?identity.side(), "session ready");
                self.emit(SessionEvent::Ready(identity));
            }
            Some(previous) if previous.user != identity.user => {
                self.emit(SessionEvent::UserUpdated(identity.user));
            }
            Some(_) => {}
        }
    }

    fn handle_user_updated(&self, payload: Value) {
        let user: User = match decode("user_updated", payload) {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "user update not applied");
                self.emit(SessionEvent::Error(ConnectionError::user_channel(
                    err.to_string(),
                )));
                return;
            }
        };

        if let Some(identity) = self.identity.borrow_mut().as_mut() {
            identity.user = user.clone();
        }
        self.emit(SessionEvent::UserUpdated(user));
    }

    fn require_identity(&self, action: &str) -> Result<Identity, UsageError> {
        self.identity
            .borrow()
            .clone()
            .ok_or_else(|| UsageError::not_ready(action))
    }

    fn require_hub(&self, action: &str) -> Result<Identity, UsageError> {
        let identity = self.require_identity(action)?;
        if identity.side() != ViewSide::Hub {
            return Err(UsageError::privileged_operation(action));
        }
        Ok(identity)
    }
}

fn validate_room_id(room_id: &str) -> Result<(), UsageError> {
    if room_id.trim().is_empty() {
        return Err(UsageError::invalid_argument("room_id", "must not be blank"));
    }
    Ok(())
}
