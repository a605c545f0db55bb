use std::{cell::Cell, collections::HashSet, rc::Rc, time::Duration};

use hubchat_core::{
    Identity, NotifierEvent, NotifierItem, PushError, SubscriptionRef, SyncConfig, Transport,
    UsageError, Watermark, decode, decode_field,
};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::channel::{self, ChannelSession, ChannelState, JoinPhase};

struct NotifierState {
    session: ChannelSession<NotifierEvent>,
    watermark: Cell<Watermark>,
}

impl NotifierState {
    /// Returns `true` when `message_id` raised the watermark.
    fn observe(&self, message_id: u64) -> bool {
        let mut watermark = self.watermark.get();
        let advanced = watermark.observe(message_id);
        self.watermark.set(watermark);
        advanced
    }
}

impl ChannelState for NotifierState {
    type Event = NotifierEvent;

    const SERVER_EVENTS: &'static [&'static str] = &["message_posted"];

    fn session(&self) -> &ChannelSession<NotifierEvent> {
        &self.session
    }

    fn join_params(&self) -> Value {
        json!({ "after_id": self.watermark.get().get() })
    }

    fn apply_join(&self, payload: Value, rejoin: bool) -> Result<(), PushError> {
        let items: Vec<NotifierItem> = decode_field("notifier join", &payload, "items")?;

        if !rejoin {
            for item in &items {
                self.observe(item.message.id);
            }
            debug!(topic = %self.session.topic(), items = items.len(), "notifier ready");
            self.session.emit(NotifierEvent::Ready(items));
            return Ok(());
        }

        let baseline = self.watermark.get();
        let mut replayed = HashSet::new();
        for item in items {
            let id = item.message.id;
            self.observe(id);
            if baseline.is_above(id) && replayed.insert(id) {
                self.session.emit(NotifierEvent::Updated(item));
            }
        }
        debug!(topic = %self.session.topic(), replayed = replayed.len(), "notifier rejoined");
        Ok(())
    }

    fn apply_server_event(&self, event: &str, payload: Value) -> Result<(), PushError> {
        if event == "message_posted" {
            let item: NotifierItem = decode(event, payload)?;
            if self.observe(item.message.id) {
                self.session.emit(NotifierEvent::Updated(item));
            } else {
                let message_id = item.message.id;
                trace!(topic = %self.session.topic(), message_id, "stale message skipped");
            }
        }
        Ok(())
    }

    fn error_event(error: PushError) -> NotifierEvent {
        NotifierEvent::Error(error)
    }

    fn reset(&self) {
        self.watermark.set(Watermark::default());
    }
}

/// Cross-room stream of new messages for the session user.
///
/// Keeps no timeline, only the highest message id seen, so a rejoin asks
/// for the gap and nothing else.
pub struct NotifierSync {
    state: Rc<NotifierState>,
}

impl NotifierSync {
    pub(crate) fn new(
        transport: Rc<dyn Transport>,
        config: &SyncConfig,
        identity: &Identity,
    ) -> Self {
        let session = ChannelSession::new(
            transport,
            format!("notifier:{}", identity.user.id),
            Duration::from_millis(config.channel_timeout_ms),
        );
        Self {
            state: Rc::new(NotifierState {
                session,
                watermark: Cell::new(Watermark::default()),
            }),
        }
    }

    pub fn phase(&self) -> JoinPhase {
        self.state.session.phase()
    }

    /// Highest message id observed so far.
    pub fn watermark(&self) -> Option<u64> {
        self.state.watermark.get().get()
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
        callback: impl FnMut(&NotifierEvent) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.state.session.on(event, callback)
    }

    pub fn once(
        &self,
        event: &str,
        callback: impl FnMut(&NotifierEvent) + 'static,
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
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use hubchat_core::{Event, User};

    use super::*;
    use crate::testing::{MockChannel, MockTransport};

    fn item(id: u64) -> Value {
        json!({
            "room": {"id": "r1", "owner": {"id": "u1"}},
            "message": {"id": id, "room_id": "r1", "user_id": "u1", "timestamp_ms": id}
        })
    }

    fn batch(ids: &[u64]) -> Value {
        json!({"items": ids.iter().map(|id| item(*id)).collect::<Vec<_>>()})
    }

    fn open() -> (NotifierSync, Rc<MockChannel>, Rc<RefCell<Vec<NotifierEvent>>>) {
        let transport = MockTransport::new();
        let identity = Identity {
            user: User {
                id: "u1".to_owned(),
                name: None,
            },
            hub: None,
        };
        let notifier = NotifierSync::new(transport.clone(), &SyncConfig::default(), &identity);
        let events = Rc::new(RefCell::new(Vec::new()));
        for name in NotifierEvent::NAMES {
            let events = events.clone();
            notifier
                .on(name, move |event| events.borrow_mut().push(event.clone()))
                .expect("subscribe");
        }
        notifier.connect().expect("connect");
        let channel = transport.channel("notifier:u1").expect("notifier channel");
        (notifier, channel, events)
    }

    fn updated_ids(events: &[NotifierEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|event| match event {
                NotifierEvent::Updated(item) => Some(item.message.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_join_sets_watermark_from_snapshot() {
        let (notifier, channel, events) = open();
        assert_eq!(channel.join_params(), json!({"after_id": null}));

        channel.join_reply_ok(batch(&[3, 1, 2]));

        assert_eq!(notifier.watermark(), Some(3));
        assert_eq!(channel.join_params(), json!({"after_id": 3}));
        match events.borrow().as_slice() {
            [NotifierEvent::Ready(items)] => assert_eq!(items.len(), 3),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn rejoin_replays_only_the_gap() {
        let (notifier, channel, events) = open();
        channel.join_reply_ok(batch(&[4]));
        channel.server_push("message_posted", item(5));

        channel.join_reply_ok(batch(&[5, 6, 6, 7]));

        assert_eq!(updated_ids(&events.borrow()), vec![5, 6, 7]);
        assert_eq!(notifier.watermark(), Some(7));
    }

    #[test]
    fn live_push_overlapping_rejoin_is_not_repeated() {
        let (notifier, channel, events) = open();
        channel.join_reply_ok(batch(&[5]));
        channel.join_reply_ok(batch(&[6, 7]));

        channel.server_push("message_posted", item(7));
        channel.server_push("message_posted", item(3));

        assert_eq!(updated_ids(&events.borrow()), vec![6, 7]);
        assert_eq!(notifier.watermark(), Some(7));
    }

    #[test]
    fn malformed_push_keeps_watermark() {
        let (notifier, channel, events) = open();
        channel.join_reply_ok(batch(&[2]));

        channel.server_push("message_posted", json!({"message": {"id": 9}}));

        assert_eq!(notifier.watermark(), Some(2));
        assert!(matches!(
            events.borrow().last(),
            Some(NotifierEvent::Error(PushError::Malformed { .. }))
        ));
    }

    #[test]
    fn off_all_drops_subscribers_but_keeps_tracking() {
        let (notifier, channel, events) = open();
        channel.join_reply_ok(batch(&[1]));

        notifier.off_all();
        channel.server_push("message_posted", item(2));

        assert_eq!(events.borrow().len(), 1);
        assert_eq!(notifier.watermark(), Some(2));
    }

    #[test]
    fn disconnect_resets_watermark() {
        let (notifier, channel, _events) = open();
        channel.join_reply_ok(batch(&[8]));

        notifier.disconnect();

        assert_eq!(notifier.watermark(), None);
        assert_eq!(notifier.phase(), JoinPhase::Unjoined);
        assert!(channel.is_left());
        assert_eq!(
            notifier.connect().expect_err("instance is spent").code,
            "already_connected"
        );
    }
}
