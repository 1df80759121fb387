//! Parcel boundary markers, held in an arena and linked by handle.
//!
//! Every marker has three edge slots. `left` and `right` run along the road
//! side the marker belongs to; `forward` is the cross-connection that closes
//! a parcel, or joins two cut markers after a subdivision.

use bevy::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::ops::{Index, IndexMut};

use super::lot_geometry::{polygon_area, self_crossing, signed_area};
use super::roads::SegmentId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u32);

impl MarkerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Left,
    Right,
    Forward,
}

/// Which side of its road a marker sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoadSide {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerState {
    /// At least one lateral slot is still open.
    Unsettled,
    /// Both lateral slots are set.
    Settled,
    /// Gave up waiting for a lateral partner.
    Stalled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosureState {
    Pending,
    Tried,
}

#[derive(Clone, Debug)]
pub struct ParcelMarker {
    pub position: Vec2,
    /// Unit direction pointing away from the road, into the land it bounds.
    pub facing: Vec2,
    pub left: Option<MarkerId>,
    pub right: Option<MarkerId>,
    pub forward: Option<MarkerId>,
    pub is_left_cycle: bool,
    pub is_end: bool,
    pub is_parcel_marker: bool,
    pub segment: Option<SegmentId>,
    pub side: Option<RoadSide>,
    pub state: MarkerState,
    pub closure: ClosureState,
}

impl ParcelMarker {
    fn blank(position: Vec2, facing: Vec2) -> Self {
        Self {
            position,
            facing,
            left: None,
            right: None,
            forward: None,
            is_left_cycle: false,
            is_end: false,
            is_parcel_marker: false,
            segment: None,
            side: None,
            state: MarkerState::Unsettled,
            closure: ClosureState::Pending,
        }
    }

    /// Marker along one side of a road segment.
    pub fn side(position: Vec2, facing: Vec2, segment: SegmentId, side: RoadSide) -> Self {
        Self {
            segment: Some(segment),
            side: Some(side),
            ..Self::blank(position, facing)
        }
    }

    /// One of the two markers capping a dead end.
    pub fn end(position: Vec2, facing: Vec2, segment: SegmentId) -> Self {
        Self {
            segment: Some(segment),
            is_end: true,
            ..Self::blank(position, facing)
        }
    }

    /// Free-floating marker inserted by subdivision.
    pub fn cut(position: Vec2) -> Self {
        Self {
            is_parcel_marker: true,
            state: MarkerState::Settled,
            closure: ClosureState::Tried,
            ..Self::blank(position, Vec2::ZERO)
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<MarkerId> {
        match slot {
            Slot::Left => self.left,
            Slot::Right => self.right,
            Slot::Forward => self.forward,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<MarkerId> {
        match slot {
            Slot::Left => &mut self.left,
            Slot::Right => &mut self.right,
            Slot::Forward => &mut self.forward,
        }
    }

    pub fn is_laterally_linked(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    pub fn links(&self) -> impl Iterator<Item = MarkerId> + '_ {
        [self.left, self.right, self.forward].into_iter().flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    UnknownMarker(MarkerId),
    SelfLink(MarkerId),
    SlotOccupied {
        marker: MarkerId,
        slot: Slot,
        occupant: MarkerId,
    },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnknownMarker(id) => write!(f, "marker {id} does not exist"),
            LinkError::SelfLink(id) => write!(f, "marker {id} cannot link to itself"),
            LinkError::SlotOccupied {
                marker,
                slot,
                occupant,
            } => write!(f, "{slot:?} slot of {marker} already holds {occupant}"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Arena owning every marker; handles are indices.
#[derive(Clone, Debug, Default)]
pub struct MarkerArena {
    markers: Vec<ParcelMarker>,
}

impl MarkerArena {
    pub fn insert(&mut self, marker: ParcelMarker) -> MarkerId {
        let id = MarkerId(self.markers.len() as u32);
        self.markers.push(marker);
        id
    }

    pub fn get(&self, id: MarkerId) -> Option<&ParcelMarker> {
        self.markers.get(id.index())
    }

    pub fn get_mut(&mut self, id: MarkerId) -> Option<&mut ParcelMarker> {
        self.markers.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = MarkerId> {
        (0..self.markers.len() as u32).map(MarkerId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &ParcelMarker)> {
        self.markers
            .iter()
            .enumerate()
            .map(|(i, m)| (MarkerId(i as u32), m))
    }

    pub fn position(&self, id: MarkerId) -> Vec2 {
        self.get(id).map_or(Vec2::ZERO, |m| m.position)
    }

    pub fn neighbor(&self, id: MarkerId, slot: Slot) -> Option<MarkerId> {
        self.get(id).and_then(|m| m.slot(slot))
    }

    /// Slot of `a` holding `b`, lateral slots first.
    pub fn slot_of(&self, a: MarkerId, b: MarkerId) -> Option<Slot> {
        let m = self.get(a)?;
        [Slot::Left, Slot::Right, Slot::Forward]
            .into_iter()
            .find(|&s| m.slot(s) == Some(b))
    }

    /// Symmetric link: `a.sa = b` and `b.sb = a` in one step. A slot that
    /// already holds a different marker is never overwritten.
    pub fn link(&mut self, a: MarkerId, sa: Slot, b: MarkerId, sb: Slot) -> Result<(), LinkError> {
        if a == b {
            return Err(LinkError::SelfLink(a));
        }
        for (id, slot, other) in [(a, sa, b), (b, sb, a)] {
            let marker = self.get(id).ok_or(LinkError::UnknownMarker(id))?;
            if let Some(occupant) = marker.slot(slot) {
                if occupant != other {
                    return Err(LinkError::SlotOccupied {
                        marker: id,
                        slot,
                        occupant,
                    });
                }
            }
        }

        self.relink(a, sa, b, sb)
    }

    /// Symmetric link that replaces whatever the two slots held.
    pub fn relink(&mut self, a: MarkerId, sa: Slot, b: MarkerId, sb: Slot) -> Result<(), LinkError> {
        if a == b {
            return Err(LinkError::SelfLink(a));
        }
        if self.get(b).is_none() {
            return Err(LinkError::UnknownMarker(b));
        }
        *self
            .get_mut(a)
            .ok_or(LinkError::UnknownMarker(a))?
            .slot_mut(sa) = Some(b);
        *self
            .get_mut(b)
            .ok_or(LinkError::UnknownMarker(b))?
            .slot_mut(sb) = Some(a);
        Ok(())
    }
}

impl Index<MarkerId> for MarkerArena {
    type Output = ParcelMarker;

    fn index(&self, id: MarkerId) -> &ParcelMarker {
        &self.markers[id.index()]
    }
}

impl IndexMut<MarkerId> for MarkerArena {
    fn index_mut(&mut self, id: MarkerId) -> &mut ParcelMarker {
        &mut self.markers[id.index()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParcelError {
    TooFewMarkers(usize),
    RepeatedMarker(MarkerId),
    UnknownMarker(MarkerId),
    Unlinked(MarkerId, MarkerId),
    /// The edges starting at these markers cross.
    SelfIntersecting(MarkerId, MarkerId),
}

impl fmt::Display for ParcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcelError::TooFewMarkers(n) => write!(f, "cycle has only {n} markers"),
            ParcelError::RepeatedMarker(id) => write!(f, "cycle visits {id} twice"),
            ParcelError::UnknownMarker(id) => write!(f, "cycle references missing marker {id}"),
            ParcelError::Unlinked(a, b) => write!(f, "{a} and {b} are consecutive but not linked"),
            ParcelError::SelfIntersecting(a, b) => {
                write!(f, "edges leaving {a} and {b} cross each other")
            }
        }
    }
}

impl std::error::Error for ParcelError {}

/// A closed cycle of markers describing one piece of land.
#[derive(Clone, Debug)]
pub struct Parcel {
    pub markers: Vec<MarkerId>,
    /// Lateral direction the cycle was walked in.
    pub is_left_cycle: bool,
}

impl Parcel {
    pub fn polygon(&self, arena: &MarkerArena) -> Vec<Vec2> {
        self.markers.iter().map(|&id| arena.position(id)).collect()
    }

    pub fn area(&self, arena: &MarkerArena) -> f32 {
        polygon_area(&self.polygon(arena))
    }

    pub fn signed_area(&self, arena: &MarkerArena) -> f32 {
        signed_area(&self.polygon(arena))
    }

    /// Every marker exists, appears once and is linked to the next one, and
    /// the boundary never crosses itself.
    pub fn validate(&self, arena: &MarkerArena) -> Result<(), ParcelError> {
        let n = self.markers.len();
        if n < 3 {
            return Err(ParcelError::TooFewMarkers(n));
        }

        let mut seen = HashSet::with_capacity(n);
        for &id in &self.markers {
            if arena.get(id).is_none() {
                return Err(ParcelError::UnknownMarker(id));
            }
            if !seen.insert(id) {
                return Err(ParcelError::RepeatedMarker(id));
            }
        }

        for i in 0..n {
            let (a, b) = (self.markers[i], self.markers[(i + 1) % n]);
            if arena.slot_of(a, b).is_none() || arena.slot_of(b, a).is_none() {
                return Err(ParcelError::Unlinked(a, b));
            }
        }

        if let Some((i, j)) = self_crossing(&self.polygon(arena)) {
            return Err(ParcelError::SelfIntersecting(self.markers[i], self.markers[j]));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(n: usize) -> (MarkerArena, Vec<MarkerId>) {
        let mut arena = MarkerArena::default();
        let ids = (0..n)
            .map(|i| arena.insert(ParcelMarker::cut(Vec2::new(i as f32, 0.0))))
            .collect();
        (arena, ids)
    }

    #[test]
    fn link_is_symmetric_and_never_overwrites() {
        let (mut arena, ids) = arena_with(3);
        arena.link(ids[0], Slot::Left, ids[1], Slot::Right).unwrap();

        assert_eq!(arena.neighbor(ids[0], Slot::Left), Some(ids[1]));
        assert_eq!(arena.neighbor(ids[1], Slot::Right), Some(ids[0]));
        assert_eq!(arena.slot_of(ids[1], ids[0]), Some(Slot::Right));

        // Re-stating an existing link is fine.
        assert!(arena.link(ids[0], Slot::Left, ids[1], Slot::Right).is_ok());

        let err = arena
            .link(ids[2], Slot::Right, ids[0], Slot::Left)
            .unwrap_err();
        assert_eq!(
            err,
            LinkError::SlotOccupied {
                marker: ids[0],
                slot: Slot::Left,
                occupant: ids[1],
            }
        );
        // Nothing was written on failure.
        assert_eq!(arena.neighbor(ids[2], Slot::Right), None);

        assert_eq!(
            arena.link(ids[2], Slot::Left, ids[2], Slot::Right),
            Err(LinkError::SelfLink(ids[2]))
        );
    }

    #[test]
    fn relink_replaces() {
        let (mut arena, ids) = arena_with(3);
        arena.link(ids[0], Slot::Forward, ids[1], Slot::Forward).unwrap();
        arena.relink(ids[0], Slot::Forward, ids[2], Slot::Left).unwrap();
        assert_eq!(arena.neighbor(ids[0], Slot::Forward), Some(ids[2]));
        assert_eq!(arena.neighbor(ids[2], Slot::Left), Some(ids[0]));
    }

    #[test]
    fn parcel_validation_catches_gaps_and_repeats() {
        let (mut arena, ids) = arena_with(4);
        for i in 0..4 {
            arena
                .link(ids[i], Slot::Left, ids[(i + 1) % 4], Slot::Right)
                .unwrap();
        }

        let ok = Parcel {
            markers: ids.clone(),
            is_left_cycle: true,
        };
        assert!(ok.validate(&arena).is_ok());

        let repeated = Parcel {
            markers: vec![ids[0], ids[1], ids[0]],
            is_left_cycle: true,
        };
        assert_eq!(repeated.validate(&arena), Err(ParcelError::RepeatedMarker(ids[0])));

        let gap = Parcel {
            markers: vec![ids[0], ids[2], ids[3]],
            is_left_cycle: true,
        };
        assert_eq!(gap.validate(&arena), Err(ParcelError::Unlinked(ids[0], ids[2])));
    }

    #[test]
    fn parcel_validation_rejects_crossed_boundary() {
        let mut arena = MarkerArena::default();
        let ids: Vec<MarkerId> = [(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]
            .into_iter()
            .map(|(x, y)| arena.insert(ParcelMarker::cut(Vec2::new(x, y))))
            .collect();
        for i in 0..4 {
            arena
                .link(ids[i], Slot::Left, ids[(i + 1) % 4], Slot::Right)
                .unwrap();
        }

        let bowtie = Parcel {
            markers: ids.clone(),
            is_left_cycle: true,
        };
        assert_eq!(
            bowtie.validate(&arena),
            Err(ParcelError::SelfIntersecting(ids[0], ids[2]))
        );
    }
}
