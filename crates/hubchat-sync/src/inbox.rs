use std::{cell::RefCell, collections::BTreeMap, ops::Deref, rc::Rc, time::Duration};

use hubchat_core::{
    Assignee, Identity, InboxEvent, InboxItem, InboxItems, InboxPredicate, PushError, Reply,
    SubscriptionRef, SyncConfig, Transport, UsageError, decode, decode_field,
};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::channel::{self, ChannelSession, ChannelState, JoinPhase};

const DEFAULT_PAGE_SIZE: u16 = 20;

/// Inbox filter of an end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxFilter {
    /// `None` lists archived and active rooms alike.
    pub archived: Option<bool>,
    pub page_size: u16,
}

impl Default for InboxFilter {
    fn default() -> Self {
        Self {
            archived: Some(false),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Inbox filter of a hub operator.
#[derive(Debug, Clone, PartialEq)]
pub struct HubInboxFilter {
    pub archived: Option<bool>,
    pub assignee: Option<Assignee>,
    /// Every listed attribute must be present on the room with an equal value.
    pub attributes: BTreeMap<String, Value>,
    pub page_size: u16,
}

impl Default for HubInboxFilter {
    fn default() -> Self {
        Self {
            archived: Some(false),
            assignee: None,
            attributes: BTreeMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One-shot hub inbox search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub limit: Option<u16>,
    pub offset: Option<u32>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            offset: None,
        }
    }
}

struct InboxState {
    page_size: u16,
    session: ChannelSession<InboxEvent>,
    items: RefCell<InboxItems>,
}

impl InboxState {
    /// Merge a batch through the filter. Returns the sorted list and whether it changed.
    fn merge(&self, items: Vec<InboxItem>) -> (Vec<InboxItem>, bool) {
        let mut held = self.items.borrow_mut();
        let changed = held.apply_all(items);
        (held.sorted(), changed)
    }

    fn emit_if_changed(&self, list: Vec<InboxItem>, changed: bool) {
        if changed {
            trace!(topic = %self.session.topic(), items = list.len(), "inbox updated");
            self.session.emit(InboxEvent::Updated(list));
        }
    }
}

impl ChannelState for InboxState {
    type Event = InboxEvent;

    const SERVER_EVENTS: &'static [&'static str] = &["item_added", "item_updated", "item_removed"];

    fn session(&self) -> &ChannelSession<InboxEvent> {
        &self.session
    }

    fn join_params(&self) -> Value {
        let items = self.items.borrow();
        let limit = items.len().max(usize::from(self.page_size));
        json!({ "filter": items.predicate().to_params(), "limit": limit })
    }

    fn apply_join(&self, payload: Value, rejoin: bool) -> Result<(), PushError> {
        let items: Vec<InboxItem> = decode_field("inbox join", &payload, "items")?;
        let (list, changed) = {
            let mut held = self.items.borrow_mut();
            let changed = held.replace_all(items);
            (held.sorted(), changed)
        };
        if rejoin {
            self.emit_if_changed(list, changed);
        } else {
            debug!(topic = %self.session.topic(), items = list.len(), "inbox ready");
            self.session.emit(InboxEvent::Ready(list));
        }
        Ok(())
    }

    fn apply_server_event(&self, event: &str, payload: Value) -> Result<(), PushError> {
        match event {
            "item_added" | "item_updated" => {
                let item: InboxItem = decode(event, payload)?;
                let (list, changed) = self.merge(vec![item]);
                self.emit_if_changed(list, changed);
            }
            "item_removed" => {
                let room_id: String = decode_field(event, &payload, "room_id")?;
                let (list, changed) = {
                    let mut held = self.items.borrow_mut();
                    let changed = held.remove(&room_id);
                    (held.sorted(), changed)
                };
                self.emit_if_changed(list, changed);
            }
            _ => {}
        }
        Ok(())
    }

    fn error_event(error: PushError) -> InboxEvent {
        InboxEvent::Error(error)
    }

    fn reset(&self) {
        self.items.borrow_mut().clear();
    }
}

/// Filtered, activity-ordered list of rooms.
pub struct InboxSync {
    state: Rc<InboxState>,
}

impl InboxSync {
    pub(crate) fn new(
        transport: Rc<dyn Transport>,
        config: &SyncConfig,
        identity: &Identity,
        filter: InboxFilter,
    ) -> Result<Self, UsageError> {
        let predicate = InboxPredicate {
            archived: filter.archived,
            ..InboxPredicate::default()
        };
        Self::with_topic(
            transport,
            config,
            format!("inbox:{}", identity.user.id),
            predicate,
            filter.page_size,
        )
    }

    fn with_topic(
        transport: Rc<dyn Transport>,
        config: &SyncConfig,
        topic: String,
        predicate: InboxPredicate,
        page_size: u16,
    ) -> Result<Self, UsageError> {
        if page_size == 0 {
            return Err(UsageError::invalid_argument("page_size", "must be at least 1"));
        }
        let session = ChannelSession::new(
            transport,
            topic,
            Duration::from_millis(config.channel_timeout_ms),
        );
        Ok(Self {
            state: Rc::new(InboxState {
                page_size,
                session,
                items: RefCell::new(InboxItems::new(predicate)),
            }),
        })
    }

    pub fn topic(&self) -> &str {
        self.state.session.topic()
    }

    pub fn phase(&self) -> JoinPhase {
        self.state.session.phase()
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
        callback: impl FnMut(&InboxEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.state.session.on(event, callback)
    }

    pub fn once(
        &self,
        event: &str,
        callback: impl FnMut(&InboxEvent) + 'static,
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

    /// Held items in display order.
    pub fn list_items(&self) -> Vec<InboxItem> {
        self.state.items.borrow().sorted()
    }

    /// Request the next page, offset by the number of items held.
    ///
    /// Resolves with the full list after merging the page.
    pub fn load_more(&self) -> Result<Reply<Vec<InboxItem>>, UsageError> {
        let payload = {
            let items = self.state.items.borrow();
            json!({
                "filter": items.predicate().to_params(),
                "offset": items.len(),
                "limit": self.state.page_size,
            })
        };

        let weak = Rc::downgrade(&self.state);
        self.state.session.push("load_more", payload, move |reply| {
            let page: Vec<InboxItem> = decode_field("load_more", &reply, "items")?;
            let Some(state) = weak.upgrade() else {
                return Err(PushError::Closed);
            };
            let (list, changed) = state.merge(page);
            state.emit_if_changed(list.clone(), changed);
            Ok(list)
        })
    }
}

/// Inbox of a hub operator: assignee and attribute filters, plus search.
pub struct HubInboxSync {
    inner: InboxSync,
}

impl HubInboxSync {
    pub(crate) fn new(
        transport: Rc<dyn Transport>,
        config: &SyncConfig,
        identity: &Identity,
        filter: HubInboxFilter,
    ) -> Result<Self, UsageError> {
        let hub_id = identity
            .hub
            .as_ref()
            .map(|hub| hub.id.clone())
            .ok_or_else(|| UsageError::privileged_operation("hub_inbox"))?;
        if filter.attributes.keys().any(|key| key.trim().is_empty()) {
            return Err(UsageError::invalid_argument(
                "attributes",
                "keys must not be blank",
            ));
        }

        let predicate = InboxPredicate {
            archived: filter.archived,
            assignee: filter.assignee,
            attributes: filter.attributes,
        };
        Ok(Self {
            inner: InboxSync::with_topic(
                transport,
                config,
                format!("hub_inbox:{hub_id}"),
                predicate,
                filter.page_size,
            )?,
        })
    }

    /// Server-side search. The result is not merged into the held list.
    pub fn search(&self, query: SearchQuery) -> Result<Reply<Vec<InboxItem>>, UsageError> {
        if query.query.trim().is_empty() {
            return Err(UsageError::invalid_argument("query", "must not be blank"));
        }
        if query.limit == Some(0) {
            return Err(UsageError::invalid_argument("limit", "must be at least 1"));
        }

        self.inner.state.session.push(
            "search",
            json!({
                "query": query.query,
                "limit": query.limit,
                "offset": query.offset,
            }),
            |reply| decode_field("search", &reply, "items"),
        )
    }
}

impl Deref for HubInboxSync {
    type Target = InboxSync;

    fn deref(&self) -> &InboxSync {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use hubchat_core::{Event, Hub, User};

    use super::*;
    use crate::testing::{MockChannel, MockTransport};

    fn identity(hub: bool) -> Identity {
        Identity {
            user: User {
                id: "agent".to_owned(),
                name: None,
            },
            hub: hub.then(|| Hub {
                id: "h1".to_owned(),
                name: None,
            }),
        }
    }

    fn item(room_id: &str, timestamp_ms: Option<u64>, archived: bool) -> Value {
        json!({
            "room": {"id": room_id, "owner": {"id": "u1"}, "archived": archived},
            "last_message": timestamp_ms.map(|ts| json!({
                "id": ts,
                "room_id": room_id,
                "user_id": "u1",
                "body": "hi",
                "timestamp_ms": ts
            })),
        })
    }

    fn open(filter: InboxFilter) -> (InboxSync, Rc<MockChannel>) {
        let transport = MockTransport::new();
        let inbox = InboxSync::new(
            transport.clone(),
            &SyncConfig::default(),
            &identity(false),
            filter,
        )
        .expect("valid filter");
        inbox.connect().expect("connect");
        let channel = transport.channel("inbox:agent").expect("inbox channel");
        (inbox, channel)
    }

    fn record(inbox: &InboxSync) -> Rc<RefCell<Vec<InboxEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        for name in InboxEvent::NAMES {
            let events = events.clone();
            inbox
                .on(name, move |event| events.borrow_mut().push(event.clone()))
                .expect("subscribe");
        }
        events
    }

    fn ids(items: &[InboxItem]) -> Vec<&str> {
        items.iter().map(InboxItem::room_id).collect()
    }

    #[test]
    fn ready_lists_items_by_recent_activity() {
        let (inbox, channel) = open(InboxFilter::default());
        let events = record(&inbox);

        assert_eq!(
            channel.join_params(),
            json!({"filter": {"archived": false}, "limit": 20})
        );
        channel.join_reply_ok(json!({"items": [
            item("quiet", None, false),
            item("old", Some(10), false),
            item("new", Some(20), false),
        ]}));

        match events.borrow().as_slice() {
            [InboxEvent::Ready(list)] => assert_eq!(ids(list), vec!["new", "old", "quiet"]),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn archived_room_is_evicted_from_active_inbox() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": [item("r1", Some(1), false)]}));
        let events = record(&inbox);

        channel.server_push("item_updated", item("r1", Some(2), true));

        assert!(inbox.list_items().is_empty());
        assert_eq!(events.borrow().as_slice(), &[InboxEvent::Updated(Vec::new())]);
    }

    #[test]
    fn non_matching_unknown_item_is_ignored() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": []}));
        let events = record(&inbox);

        channel.server_push("item_added", item("r9", Some(5), true));

        assert!(events.borrow().is_empty());
        assert!(inbox.list_items().is_empty());
    }

    #[test]
    fn removed_item_updates_the_list() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": [
            item("r1", Some(1), false),
            item("r2", Some(2), false),
        ]}));
        let events = record(&inbox);

        channel.server_push("item_removed", json!({"room_id": "r2"}));
        channel.server_push("item_removed", json!({"room_id": "r2"}));

        assert_eq!(ids(&inbox.list_items()), vec!["r1"]);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn load_more_offsets_by_held_items() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": []}));

        let mut reply = inbox.load_more().expect("load accepted");
        let sent = channel.last_push().expect("push sent");
        assert_eq!(sent.payload["offset"], json!(0));
        sent.push
            .reply_ok(json!({"items": [item("r1", Some(3), false)]}));
        let list = reply.try_take().expect("settled").expect("page merged");
        assert_eq!(ids(&list), vec!["r1"]);

        let _next = inbox.load_more().expect("load accepted");
        let sent = channel.last_push().expect("push sent");
        assert_eq!(sent.payload["offset"], json!(1));
        assert_eq!(sent.payload["limit"], json!(20));
    }

    #[test]
    fn rejoin_asks_for_every_held_item() {
        let (inbox, channel) = open(InboxFilter {
            archived: None,
            page_size: 1,
        });
        channel.join_reply_ok(json!({"items": [
            item("r1", Some(1), false),
            item("r2", Some(2), true),
        ]}));
        let events = record(&inbox);

        assert_eq!(channel.join_params(), json!({"filter": {}, "limit": 2}));

        channel.join_reply_ok(json!({"items": [
            item("r2", Some(2), true),
            item("r1", Some(1), false),
        ]}));
        assert!(events.borrow().is_empty());

        channel.join_reply_ok(json!({"items": [
            item("r3", Some(3), false),
            item("r2", Some(2), true),
            item("r1", Some(1), false),
        ]}));
        match events.borrow().as_slice() {
            [InboxEvent::Updated(list)] => assert_eq!(ids(list), vec!["r3", "r2", "r1"]),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn rejoin_drops_rooms_that_left_the_filter_while_offline() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": [
            item("r1", Some(1), false),
            item("r2", Some(2), false),
        ]}));
        let events = record(&inbox);

        channel.join_reply_ok(json!({"items": [item("r2", Some(2), false)]}));

        assert_eq!(ids(&inbox.list_items()), vec!["r2"]);
        match events.borrow().as_slice() {
            [InboxEvent::Updated(list)] => assert_eq!(ids(list), vec!["r2"]),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let transport = MockTransport::new();
        let err = InboxSync::new(
            transport,
            &SyncConfig::default(),
            &identity(false),
            InboxFilter {
                archived: None,
                page_size: 0,
            },
        )
        .err()
        .expect("page size 0");
        assert_eq!(err.code, "invalid_argument");
    }

    #[test]
    fn disconnect_drops_held_items() {
        let (inbox, channel) = open(InboxFilter::default());
        channel.join_reply_ok(json!({"items": [item("r1", Some(1), false)]}));

        inbox.disconnect();

        assert!(inbox.list_items().is_empty());
        channel.server_push("item_added", item("r2", Some(2), false));
        assert!(inbox.list_items().is_empty());
    }

    fn open_hub(filter: HubInboxFilter) -> (HubInboxSync, Rc<MockChannel>) {
        let transport = MockTransport::new();
        let inbox = HubInboxSync::new(
            transport.clone(),
            &SyncConfig::default(),
            &identity(true),
            filter,
        )
        .expect("valid filter");
        inbox.connect().expect("connect");
        let channel = transport.channel("hub_inbox:h1").expect("hub inbox channel");
        (inbox, channel)
    }

    #[test]
    fn hub_filter_applies_assignee_and_attributes() {
        let (inbox, channel) = open_hub(HubInboxFilter {
            assignee: Some(Assignee::Unassigned),
            attributes: BTreeMap::from([("tier".to_owned(), json!("gold"))]),
            ..HubInboxFilter::default()
        });
        assert_eq!(
            channel.join_params()["filter"],
            json!({"archived": false, "assignee_id": null, "attributes": {"tier": "gold"}})
        );

        let mut matching = item("r1", Some(1), false);
        matching["room"]["attributes"] = json!({"tier": "gold"});
        let mut assigned = matching.clone();
        assigned["room"]["id"] = json!("r2");
        assigned["room"]["assignee"] = json!({"id": "agent"});
        let plain = item("r3", Some(3), false);

        channel.join_reply_ok(json!({"items": [matching, assigned, plain]}));

        assert_eq!(ids(&inbox.list_items()), vec!["r1"]);
    }

    #[test]
    fn search_resolves_without_touching_the_list() {
        let (inbox, channel) = open_hub(HubInboxFilter::default());
        channel.join_reply_ok(json!({"items": []}));
        let events = record(&inbox);

        let mut reply = inbox
            .search(SearchQuery {
                limit: Some(5),
                ..SearchQuery::new("refund")
            })
            .expect("search accepted");
        let sent = channel.last_push().expect("push sent");
        assert_eq!(sent.event, "search");
        assert_eq!(
            sent.payload,
            json!({"query": "refund", "limit": 5, "offset": null})
        );

        sent.push
            .reply_ok(json!({"items": [item("r7", Some(7), true)]}));
        let found = reply.try_take().expect("settled").expect("search ok");

        assert_eq!(ids(&found), vec!["r7"]);
        assert!(inbox.list_items().is_empty());
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn blank_search_is_rejected() {
        let (inbox, channel) = open_hub(HubInboxFilter::default());
        channel.join_reply_ok(json!({"items": []}));

        let err = inbox
            .search(SearchQuery::new(" "))
            .err()
            .expect("blank query");
        assert_eq!(err.code, "invalid_argument");
    }

    #[test]
    fn hub_inbox_requires_hub_identity() {
        let err = HubInboxSync::new(
            MockTransport::new(),
            &SyncConfig::default(),
            &identity(false),
            HubInboxFilter::default(),
        )
        .err()
        .expect("member identity");
        assert_eq!(err.code, "privileged_operation");
    }
}
