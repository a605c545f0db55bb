use crate::{
    events::MarkerSide,
    types::{Marker, ViewSide},
};

/// The two read-marker slots of a room, seen from one viewer.
///
/// A slot only moves forward: an incoming marker is applied when its
/// `message_id` is strictly greater than the one held for that slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerPair {
    own: Option<Marker>,
    other: Option<Marker>,
}

impl MarkerPair {
    pub fn own(&self) -> Option<&Marker> {
        self.own.as_ref()
    }

    pub fn other(&self) -> Option<&Marker> {
        self.other.as_ref()
    }

    pub fn get(&self, side: MarkerSide) -> Option<&Marker> {
        match side {
            MarkerSide::Own => self.own(),
            MarkerSide::Other => self.other(),
        }
    }

    /// Apply `marker` to `side`. Returns `true` when the slot advanced.
    pub fn apply(&mut self, side: MarkerSide, marker: Marker) -> bool {
        let slot = match side {
            MarkerSide::Own => &mut self.own,
            MarkerSide::Other => &mut self.other,
        };

        if slot
            .as_ref()
            .is_some_and(|held| held.message_id >= marker.message_id)
        {
            return false;
        }
        *slot = Some(marker);
        true
    }

    pub fn clear(&mut self) {
        self.own = None;
        self.other = None;
    }
}

/// Slot a marker belongs to for a given viewer.
///
/// Markers are split between the room owner and everybody else (the hub
/// side). The owner's marker is `Own` for an end user and `Other` for a hub
/// operator; the best non-owner marker is the reverse.
pub fn marker_side(view: ViewSide, owner_id: &str, marker: &Marker) -> MarkerSide {
    let from_owner = marker.user_id == owner_id;
    match (view, from_owner) {
        (ViewSide::Member, true) | (ViewSide::Hub, false) => MarkerSide::Own,
        (ViewSide::Member, false) | (ViewSide::Hub, true) => MarkerSide::Other,
    }
}
