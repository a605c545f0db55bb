use std::{
    cell::RefCell,
    collections::BTreeMap,
    ops::Deref,
    rc::{Rc, Weak},
    time::Duration,
};

use hubchat_core::{
    Marker, MarkerPair, MarkerSide, Message, MessageWindow, PushError, Reply, Room, RoomEvent,
    RoomSnapshot, SubscriptionRef, SyncConfig, Transport, UsageError, ViewSide, decode,
    decode_field, marker_side,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::channel::{self, ChannelSession, ChannelState, JoinPhase};

/// Content of a new message. Exactly one variant is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostMessage {
    Text(String),
    /// Id of an upload created beforehand.
    Upload(String),
}

impl PostMessage {
    fn to_payload(&self) -> Result<Value, UsageError> {
        match self {
            Self::Text(body) if body.trim().is_empty() => {
                Err(UsageError::invalid_argument("text", "must not be blank"))
            }
            Self::Upload(upload_id) if upload_id.trim().is_empty() => {
                Err(UsageError::invalid_argument("upload_id", "must not be blank"))
            }
            Self::Text(body) => Ok(json!({ "body": body })),
            Self::Upload(upload_id) => Ok(json!({ "upload_id": upload_id })),
        }
    }
}

#[derive(Deserialize)]
struct JoinReply {
    room: Room,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    markers: Vec<Marker>,
}

struct RoomData {
    room: Option<Room>,
    window: MessageWindow,
    markers: MarkerPair,
}

struct RoomState {
    view: ViewSide,
    history_limit: u16,
    page_cap: u16,
    session: ChannelSession<RoomEvent>,
    data: RefCell<RoomData>,
}

impl RoomState {
    fn owner_id(&self) -> String {
        self.data
            .borrow()
            .room
            .as_ref()
            .map(|room| room.owner.id.clone())
            .unwrap_or_default()
    }

    /// Replace the room record. Emits `room_updated` when it changed.
    fn merge_room(&self, room: Room) {
        let changed = {
            let mut data = self.data.borrow_mut();
            if data.room.as_ref() == Some(&room) {
                false
            } else {
                data.room = Some(room.clone());
                true
            }
        };
        if changed {
            debug!(topic = %self.session.topic(), archived = room.archived, "room updated");
            self.session.emit(RoomEvent::RoomUpdated(room));
        }
    }

    fn merge_marker(&self, marker: Marker) {
        let side = marker_side(self.view, &self.owner_id(), &marker);
        let moved = self.data.borrow_mut().markers.apply(side, marker.clone());
        if moved {
            let message_id = marker.message_id;
            trace!(topic = %self.session.topic(), message_id, ?side, "marker moved");
            self.session.emit(RoomEvent::MarkerUpdated { side, marker });
        }
    }

    fn merge_message(&self, message: Message) {
        let fresh = self.data.borrow_mut().window.observe(message.clone());
        if fresh {
            self.session.emit(RoomEvent::MessagePosted(message));
        } else {
            let message_id = message.id;
            trace!(topic = %self.session.topic(), message_id, "duplicate message skipped");
        }
    }
}

impl ChannelState for RoomState {
    type Event = RoomEvent;

    const SERVER_EVENTS: &'static [&'static str] = &[
        "message_posted",
        "message_deleted",
        "marker_updated",
        "room_updated",
    ];

    fn session(&self) -> &ChannelSession<RoomEvent> {
        &self.session
    }

    fn join_params(&self) -> Value {
        let after_id = self.data.borrow().window.last_known_id();
        json!({ "after_id": after_id, "limit": self.history_limit })
    }

    fn apply_join(&self, payload: Value, rejoin: bool) -> Result<(), PushError> {
        let reply: JoinReply = decode("room join", payload)?;
        let owner_id = reply.room.owner.id.clone();

        let (room_changed, fresh, moved) = {
            let mut data = self.data.borrow_mut();
            let room_changed = data.room.as_ref() != Some(&reply.room);
            data.room = Some(reply.room.clone());
            let fresh = data.window.ingest(reply.messages);

            let mut moved = Vec::new();
            for marker in reply.markers {
                let side = marker_side(self.view, &owner_id, &marker);
                if data.markers.apply(side, marker.clone()) {
                    moved.push((side, marker));
                }
            }
            (room_changed, fresh, moved)
        };

        if !rejoin {
            let snapshot = {
                let data = self.data.borrow();
                RoomSnapshot {
                    room: reply.room,
                    messages: data.window.messages(),
                    own_marker: data.markers.own().cloned(),
                    other_marker: data.markers.other().cloned(),
                }
            };
            self.session.emit(RoomEvent::Ready(snapshot));
            return Ok(());
        }

        debug!(topic = %self.session.topic(), missed = fresh.len(), "replaying rejoin gap");
        if room_changed {
            self.session.emit(RoomEvent::RoomUpdated(reply.room));
        }
        for message in fresh {
            self.session.emit(RoomEvent::MessagePosted(message));
        }
        for (side, marker) in moved {
            self.session.emit(RoomEvent::MarkerUpdated { side, marker });
        }
        Ok(())
    }

    fn apply_server_event(&self, event: &str, payload: Value) -> Result<(), PushError> {
        match event {
            "message_posted" => self.merge_message(decode(event, payload)?),
            "message_deleted" => {
                let message_id: u64 = decode_field(event, &payload, "message_id")?;
                self.data.borrow_mut().window.remove(message_id);
                self.session.emit(RoomEvent::MessageDeleted { message_id });
            }
            "marker_updated" => self.merge_marker(decode(event, payload)?),
            "room_updated" => self.merge_room(decode(event, payload)?),
            _ => {}
        }
        Ok(())
    }

    fn error_event(error: PushError) -> RoomEvent {
        RoomEvent::Error(error)
    }

    fn reset(&self) {
        let mut data = self.data.borrow_mut();
        data.room = None;
        data.window.clear();
        data.markers.clear();
    }
}

/// Live view of one room: message window, read markers and metadata.
///
/// Created through [`SessionConnector::room`](crate::SessionConnector::room).
/// Call [`connect`](Self::connect) to join `room:{id}`; every rejoin after a
/// reconnect replays only the messages that were missed.
pub struct RoomSync {
    room_id: String,
    state: Rc<RoomState>,
}

impl RoomSync {
    pub(crate) fn new(
        transport: Rc<dyn Transport>,
        config: &SyncConfig,
        room_id: &str,
        view: ViewSide,
    ) -> Self {
        let session = ChannelSession::new(
            transport,
            format!("room:{room_id}"),
            Duration::from_millis(config.channel_timeout_ms),
        );
        Self {
            room_id: room_id.to_owned(),
            state: Rc::new(RoomState {
                view,
                history_limit: config.room_history_limit,
                page_cap: config.pagination_limit_cap,
                session,
                data: RefCell::new(RoomData {
                    room: None,
                    window: MessageWindow::new(config.timeline_max_items),
                    markers: MarkerPair::default(),
                }),
            }),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn view(&self) -> ViewSide {
        self.state.view
    }

    pub fn phase(&self) -> JoinPhase {
        self.state.session.phase()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == JoinPhase::Ready
    }

    pub fn connect(&self) -> Result<(), UsageError> {
        channel::connect(&self.state)
    }

    pub fn disconnect(&self) {
        channel::disconnect(self.state.as_ref());
    }

    pub fn on(
        &self,
        event: &str,
        callback: impl FnMut(&RoomEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.state.session.on(event, callback)
    }

    pub fn once(
        &self,
        event: &str,
        callback: impl FnMut(&RoomEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.state.session.once(event, callback)
    }

    pub fn off(&self, event: &str, sub_ref: SubscriptionRef) -> Result<(), UsageError> {
        self.state.session.off(event, sub_ref)
    }

    pub fn off_event(&self, event: &str) -> Result<(), UsageError> {
        self.state.session.off_event(event)
    }

    /// Remove every subscription.
    pub fn off_all(&self) {
        self.state.session.off_all();
    }

    pub fn room(&self) -> Option<Room> {
        self.state.data.borrow().room.clone()
    }

    /// Retained messages in id order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.data.borrow().window.messages()
    }

    pub fn first_known_id(&self) -> Option<u64> {
        self.state.data.borrow().window.first_known_id()
    }

    pub fn last_known_id(&self) -> Option<u64> {
        self.state.data.borrow().window.last_known_id()
    }

    pub fn own_marker(&self) -> Option<Marker> {
        self.state.data.borrow().markers.own().cloned()
    }

    pub fn other_marker(&self) -> Option<Marker> {
        self.state.data.borrow().markers.other().cloned()
    }

    /// Post a message. The created message is merged as soon as the server
    /// confirms it, so the matching broadcast is not delivered twice.
    pub fn post_message(&self, message: PostMessage) -> Result<Reply<Message>, UsageError> {
        let payload = message.to_payload()?;
        let weak = self.weak();
        self.state
            .session
            .push("post_message", payload, move |reply| {
                let message: Message = decode("post_message", reply)?;
                if let Some(state) = weak.upgrade() {
                    state.merge_message(message.clone());
                }
                Ok(message)
            })
    }

    pub fn delete_message(&self, message_id: u64) -> Result<Reply<()>, UsageError> {
        self.state.session.push(
            "delete_message",
            json!({ "message_id": message_id }),
            |_| Ok(()),
        )
    }

    /// Move the viewer's read marker, by default to the last known message.
    pub fn move_marker(&self, message_id: Option<u64>) -> Result<Reply<Marker>, UsageError> {
        let message_id = message_id
            .or_else(|| self.last_known_id())
            .ok_or_else(UsageError::no_known_message)?;

        let weak = self.weak();
        self.state.session.push(
            "move_marker",
            json!({ "message_id": message_id }),
            move |reply| {
                let marker: Marker = decode("move_marker", reply)?;
                if let Some(state) = weak.upgrade() {
                    state.merge_marker(marker.clone());
                }
                Ok(marker)
            },
        )
    }

    /// Fetch messages strictly older than the first known one.
    ///
    /// Resolves with the messages not seen before. Returns an empty result
    /// without a request when no boundary is known yet.
    pub fn load_earlier(&self, limit: Option<u16>) -> Result<Reply<Vec<Message>>, UsageError> {
        let Some(before_id) = self.first_known_id() else {
            return Ok(Reply::ready(Ok(Vec::new())));
        };
        let limit = MessageWindow::bounded_page_limit(
            limit.unwrap_or(self.state.history_limit),
            self.state.page_cap,
        );

        let weak = self.weak();
        self.state.session.push(
            "load_earlier",
            json!({ "before_id": before_id, "limit": limit }),
            move |reply| {
                let messages: Vec<Message> = decode_field("load_earlier", &reply, "messages")?;
                let Some(state) = weak.upgrade() else {
                    return Ok(messages);
                };
                Ok(state.data.borrow_mut().window.ingest_earlier(messages))
            },
        )
    }

    fn weak(&self) -> Weak<RoomState> {
        Rc::downgrade(&self.state)
    }

    /// Push a metadata operation whose reply is the updated room.
    fn push_room_update(
        &self,
        event: &'static str,
        payload: Value,
    ) -> Result<Reply<Room>, UsageError> {
        let weak = self.weak();
        self.state.session.push(event, payload, move |reply| {
            let room: Room = decode(event, reply)?;
            if let Some(state) = weak.upgrade() {
                state.merge_room(room.clone());
            }
            Ok(room)
        })
    }
}

/// Room view of a hub operator, with archival and assignment operations.
pub struct HubRoomSync {
    inner: RoomSync,
}

impl HubRoomSync {
    pub(crate) fn new(transport: Rc<dyn Transport>, config: &SyncConfig, room_id: &str) -> Self {
        Self {
            inner: RoomSync::new(transport, config, room_id, ViewSide::Hub),
        }
    }

    /// Archive the room, optionally until a time in milliseconds since Unix epoch.
    pub fn archive(&self, until_ms: Option<u64>) -> Result<Reply<Room>, UsageError> {
        self.inner
            .push_room_update("archive", json!({ "until_ms": until_ms }))
    }

    pub fn unarchive(&self) -> Result<Reply<Room>, UsageError> {
        self.inner.push_room_update("unarchive", json!({}))
    }

    pub fn update_attributes(
        &self,
        attributes: BTreeMap<String, Value>,
    ) -> Result<Reply<Room>, UsageError> {
        if attributes.keys().any(|key| key.trim().is_empty()) {
            return Err(UsageError::invalid_argument(
                "attributes",
                "keys must not be blank",
            ));
        }
        self.inner
            .push_room_update("update_attributes", json!({ "attributes": attributes }))
    }

    /// Assign the room to a user, or clear the assignment with `None`.
    pub fn update_assignment(&self, user_id: Option<&str>) -> Result<Reply<Room>, UsageError> {
        if user_id.is_some_and(|id| id.trim().is_empty()) {
            return Err(UsageError::invalid_argument("user_id", "must not be blank"));
        }
        self.inner
            .push_room_update("update_assignment", json!({ "assignee_id": user_id }))
    }
}

impl Deref for HubRoomSync {
    type Target = RoomSync;

    fn deref(&self) -> &RoomSync {
        &self.inner
    }
}
