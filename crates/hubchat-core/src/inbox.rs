use std::{cmp::Ordering, collections::BTreeMap, collections::HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::InboxItem;

/// Assignment constraint of an inbox filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Assignee {
    /// Rooms nobody is assigned to.
    Unassigned,
    /// Rooms assigned to this user id.
    User(String),
}

/// Client-held predicate deciding which rooms belong in an inbox.
///
/// `None` fields do not constrain. Attribute tests require exact equality
/// for every listed key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxPredicate {
    pub archived: Option<bool>,
    pub assignee: Option<Assignee>,
    pub attributes: BTreeMap<String, Value>,
}

impl InboxPredicate {
    pub fn matches(&self, item: &InboxItem) -> bool {
        let room = &item.room;

        if let Some(archived) = self.archived
            && room.archived != archived
        {
            return false;
        }

        match &self.assignee {
            None => {}
            Some(Assignee::Unassigned) if room.assignee.is_some() => return false,
            Some(Assignee::User(user_id))
                if room.assignee.as_ref().map(|user| &user.id) != Some(user_id) =>
            {
                return false;
            }
            Some(_) => {}
        }

        self.attributes
            .iter()
            .all(|(key, expected)| room.attributes.get(key) == Some(expected))
    }

    /// Wire form sent with joins and page requests.
    pub fn to_params(&self) -> Value {
        let mut params = Map::new();
        if let Some(archived) = self.archived {
            params.insert("archived".to_owned(), json!(archived));
        }
        match &self.assignee {
            Some(Assignee::Unassigned) => {
                params.insert("assignee_id".to_owned(), Value::Null);
            }
            Some(Assignee::User(user_id)) => {
                params.insert("assignee_id".to_owned(), json!(user_id));
            }
            None => {}
        }
        if !self.attributes.is_empty() {
            params.insert("attributes".to_owned(), json!(self.attributes));
        }
        Value::Object(params)
    }
}

/// Keyed set of inbox items that only ever holds items matching its predicate.
#[derive(Debug, Clone)]
pub struct InboxItems {
    predicate: InboxPredicate,
    items: HashMap<String, InboxItem>,
}

impl InboxItems {
    pub fn new(predicate: InboxPredicate) -> Self {
        Self {
            predicate,
            items: HashMap::new(),
        }
    }

    pub fn predicate(&self) -> &InboxPredicate {
        &self.predicate
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.items.contains_key(room_id)
    }

    /// Insert, replace or evict `item` according to the predicate.
    ///
    /// Returns `true` when the held set changed.
    pub fn apply(&mut self, item: InboxItem) -> bool {
        if self.predicate.matches(&item) {
            let previous = self.items.insert(item.room_id().to_owned(), item.clone());
            previous.as_ref() != Some(&item)
        } else {
            self.items.remove(item.room_id()).is_some()
        }
    }

    /// Apply a batch. Returns `true` when any item changed the set.
    pub fn apply_all(&mut self, items: impl IntoIterator<Item = InboxItem>) -> bool {
        items
            .into_iter()
            .fold(false, |changed, item| self.apply(item) || changed)
    }

    /// Rebuild the set from a full snapshot, dropping every item it omits.
    ///
    /// Returns `true` when the held set changed.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = InboxItem>) -> bool {
        let rebuilt: HashMap<String, InboxItem> = items
            .into_iter()
            .filter(|item| self.predicate.matches(item))
            .map(|item| (item.room_id().to_owned(), item))
            .collect();
        let changed = rebuilt != self.items;
        self.items = rebuilt;
        changed
    }

    pub fn remove(&mut self, room_id: &str) -> bool {
        self.items.remove(room_id).is_some()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items in display order: most recent activity first, rooms without
    /// messages last, room id as the tie-break.
    pub fn sorted(&self) -> Vec<InboxItem> {
        let mut items: Vec<_> = self.items.values().cloned().collect();
        items.sort_by(display_order);
        items
    }
}

fn display_order(a: &InboxItem, b: &InboxItem) -> Ordering {
    let by_activity = match (a.activity_ms(), b.activity_ms()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_activity.then_with(|| a.room_id().cmp(b.room_id()))
}
