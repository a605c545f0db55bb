use std::{
    collections::{BTreeMap, BTreeSet},
    ops::RangeInclusive,
};

use crate::types::Message;

/// Bounded in-memory message window for one room.
///
/// Tracks the known id range separately from the retained messages: the
/// range only ever grows (it drives pagination and resume parameters),
/// while the retained window holds at most `max_items` messages. Live
/// messages push out the oldest ones; an earlier page pushes out the newest.
///
/// A replayed message is never delivered twice. Inside the retained span
/// the exact ids are tracked; every other id of the known range counts as
/// already delivered.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    messages: BTreeMap<u64, Message>,
    seen: BTreeSet<u64>,
    first_known_id: Option<u64>,
    last_known_id: Option<u64>,
    max_items: usize,
}

impl MessageWindow {
    /// Create a window with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            messages: BTreeMap::new(),
            seen: BTreeSet::new(),
            first_known_id: None,
            last_known_id: None,
            max_items: max_items.max(1),
        }
    }

    pub fn first_known_id(&self) -> Option<u64> {
        self.first_known_id
    }

    pub fn last_known_id(&self) -> Option<u64> {
        self.last_known_id
    }

    /// Retained messages in id order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.values().cloned().collect()
    }

    pub fn has_seen(&self, message_id: u64) -> bool {
        if self.seen.contains(&message_id) {
            return true;
        }
        let known = match (self.first_known_id, self.last_known_id) {
            (Some(first), Some(last)) => (first..=last).contains(&message_id),
            _ => false,
        };
        known
            && !self
                .retained_span()
                .is_some_and(|span| span.contains(&message_id))
    }

    /// Merge a batch and return the messages not seen before, in arrival order.
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let fresh = self.insert_all(batch);
        self.trim(Edge::Oldest);
        fresh
    }

    /// Merge a page of older history. When full, the newest messages give way.
    pub fn ingest_earlier(&mut self, batch: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let fresh = self.insert_all(batch);
        self.trim(Edge::Newest);
        fresh
    }

    /// Merge one message. Returns `false` when its id was already seen.
    pub fn observe(&mut self, message: Message) -> bool {
        let fresh = self.insert(message);
        self.trim(Edge::Oldest);
        fresh
    }

    /// Drop a message from the retained window. The known range is kept.
    pub fn remove(&mut self, message_id: u64) -> Option<Message> {
        let removed = self.messages.remove(&message_id);
        self.prune_seen();
        removed
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.first_known_id = None;
        self.last_known_id = None;
    }

    /// Clamp a requested pagination limit against safety and server caps.
    ///
    /// The result is always in `1..=100`.
    pub fn bounded_page_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(100)
    }

    fn insert_all(&mut self, batch: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut fresh = Vec::new();
        for message in batch {
            if self.insert(message.clone()) {
                fresh.push(message);
            }
        }
        fresh
    }

    fn insert(&mut self, message: Message) -> bool {
        let id = message.id;
        if self.has_seen(id) {
            return false;
        }

        self.first_known_id = Some(self.first_known_id.map_or(id, |first| first.min(id)));
        self.last_known_id = Some(self.last_known_id.map_or(id, |last| last.max(id)));
        self.seen.insert(id);
        self.messages.insert(id, message);
        true
    }

    fn retained_span(&self) -> Option<RangeInclusive<u64>> {
        let (&first, _) = self.messages.first_key_value()?;
        let (&last, _) = self.messages.last_key_value()?;
        Some(first..=last)
    }

    fn trim(&mut self, edge: Edge) {
        let mut evicted = false;
        while self.messages.len() > self.max_items {
            let popped = match edge {
                Edge::Oldest => self.messages.pop_first(),
                Edge::Newest => self.messages.pop_last(),
            };
            if popped.is_none() {
                break;
            }
            evicted = true;
        }
        if evicted {
            self.prune_seen();
        }
    }

    /// Forget exact ids outside the retained span; the known range covers them.
    fn prune_seen(&mut self) {
        match self.retained_span() {
            Some(span) => self.seen.retain(|id| span.contains(id)),
            None => self.seen.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Oldest,
    Newest,
}
