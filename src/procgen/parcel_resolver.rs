//! Parcel boundary resolution.
//!
//! Markers are placed beside every parcel-bearing road segment and around
//! every dead end, then linked in two phases:
//!
//! 1. **Relaxing**: each unsettled marker fills its `left` and `right` slots
//!    with the nearest unobstructed marker on that side, provided the partner
//!    agrees. One pass over all markers per tick.
//! 2. **Closing**: settled markers cast a ray away from their road. When the
//!    ray meets another road whose nearer side marker is reachable by walking
//!    the lateral chain around a bounded face, the two markers are joined
//!    through `forward` and the closure is recorded as a [`ParcelSeed`].
//!
//! Parcels are read back from the seeds with [`ParcelResolver::materialize`].

use bevy::prelude::*;
use smallvec::SmallVec;
use std::collections::{HashSet, VecDeque};

use super::lot_geometry::{segment_intersection, signed_area};
use super::markers::{
    ClosureState, MarkerArena, MarkerId, MarkerState, Parcel, ParcelMarker, RoadSide, Slot,
};
use super::occlusion::{Occluder, RoadOccluder, SurfaceMask};
use super::roads::{RoadNetwork, SegmentId};

/// Tie tolerance when comparing link distances.
const DISTANCE_EPSILON: f32 = 1e-4;

#[derive(Clone, Debug)]
pub struct ParcelConfig {
    /// Distance from a road centerline to its side markers.
    pub marker_offset: f32,
    /// How far past a dead end its cap markers sit.
    pub end_cap_depth: f32,
    pub max_link_distance: f32,
    pub max_closure_distance: f32,
    /// Bound on a single face walk.
    pub max_cycle_steps: usize,
    /// Segments searched past the start when gathering link candidates.
    pub search_depth: usize,
    pub max_ticks: u32,
    /// Consecutive ticks without a new link before the relax phase gives up.
    pub stall_patience: u32,
}

impl Default for ParcelConfig {
    fn default() -> Self {
        Self {
            marker_offset: 4.0,
            end_cap_depth: 5.0,
            max_link_distance: 40.0,
            max_closure_distance: 150.0,
            max_cycle_steps: 512,
            search_depth: 6,
            max_ticks: 64,
            stall_patience: 2,
        }
    }
}

impl ParcelConfig {
    /// Length of the occluding stub past each dead end. Shorter than the cap
    /// depth so caps stay linkable around it.
    pub fn stub_length(&self) -> f32 {
        self.end_cap_depth * 0.6
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolverPhase {
    Relaxing,
    Closing,
    Complete,
}

/// Progress of one resolution run.
#[derive(Clone, Debug)]
pub struct ResolutionContext {
    pub phase: ResolverPhase,
    pub tick: u32,
    /// Markers still waiting on a lateral slot.
    pub unsettled: usize,
    pub stagnant_ticks: u32,
    pub links: usize,
    pub stalled: Vec<MarkerId>,
    pub closures: usize,
    pub abandoned: usize,
}

/// A committed cross-connection. Walking `direction` from `to` leads back to
/// `from` around one parcel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParcelSeed {
    pub from: MarkerId,
    pub to: MarkerId,
    pub direction: Slot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClosureOutcome {
    Closed(MarkerId),
    AdjacentToClosure,
    NoTarget,
    Rejected,
    Open,
    Abandoned,
}

/// Why a lateral link candidate was turned down, in the order the checks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkRejection {
    NoCandidates,
    AlreadyLinked,
    WrongSide,
    OutOfRange,
    /// The candidate's answering slot holds another marker.
    SlotTaken,
    Occluded,
}

impl std::fmt::Display for LinkRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            LinkRejection::NoCandidates => "no candidates",
            LinkRejection::AlreadyLinked => "candidates already linked",
            LinkRejection::WrongSide => "no candidate on that side",
            LinkRejection::OutOfRange => "nearest candidate out of range",
            LinkRejection::SlotTaken => "answering slot taken",
            LinkRejection::Occluded => "line of sight crosses a road",
        };
        f.write_str(reason)
    }
}

enum Walk {
    /// Markers visited from the start up to, excluding, the target.
    Found(Vec<MarkerId>),
    Open,
    Exceeded,
    Looped,
}

pub struct ParcelResolver<O: Occluder = RoadOccluder> {
    network: RoadNetwork,
    occluder: O,
    markers: MarkerArena,
    config: ParcelConfig,
    context: ResolutionContext,
    seeds: Vec<ParcelSeed>,
}

impl<O: Occluder> ParcelResolver<O> {
    /// Place every marker and start in the relax phase.
    pub fn new(mut network: RoadNetwork, occluder: O, config: ParcelConfig) -> Self {
        let mut markers = MarkerArena::default();
        let offset = config.marker_offset;

        let ids: Vec<SegmentId> = network.segments().map(|(id, _)| id).collect();
        for id in ids {
            let position = network.segment(id).position;

            if network.segment(id).can_make_parcels {
                let normal = network.tangent(id).perp();
                let left = markers.insert(ParcelMarker::side(
                    position + normal * offset,
                    normal,
                    id,
                    RoadSide::Left,
                ));
                let right = markers.insert(ParcelMarker::side(
                    position - normal * offset,
                    -normal,
                    id,
                    RoadSide::Right,
                ));
                let segment = network.segment_mut(id);
                segment.left_marker = Some(left);
                segment.right_marker = Some(right);
            }

            if let Some(open) = network.open_direction(id) {
                let across = open.perp();
                let base = position + open * config.end_cap_depth;
                let a = markers.insert(ParcelMarker::end(
                    base + across * offset,
                    (open + across).normalize_or(open),
                    id,
                ));
                let b = markers.insert(ParcelMarker::end(
                    base - across * offset,
                    (open - across).normalize_or(open),
                    id,
                ));
                network.segment_mut(id).end_markers = Some([a, b]);
            }
        }

        info!(
            "Placed {} parcel markers along {} road segments",
            markers.len(),
            network.segment_count()
        );

        let context = ResolutionContext {
            phase: ResolverPhase::Relaxing,
            tick: 0,
            unsettled: markers.len(),
            stagnant_ticks: 0,
            links: 0,
            stalled: Vec::new(),
            closures: 0,
            abandoned: 0,
        };

        Self {
            network,
            occluder,
            markers,
            config,
            context,
            seeds: Vec::new(),
        }
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn markers(&self) -> &MarkerArena {
        &self.markers
    }

    pub fn occluder(&self) -> &O {
        &self.occluder
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn seeds(&self) -> &[ParcelSeed] {
        &self.seeds
    }

    pub fn phase(&self) -> ResolverPhase {
        self.context.phase
    }

    pub fn is_complete(&self) -> bool {
        self.context.phase == ResolverPhase::Complete
    }

    /// Run one step of the current phase.
    pub fn advance_tick(&mut self) -> ResolverPhase {
        match self.context.phase {
            ResolverPhase::Relaxing => self.relax_tick(),
            ResolverPhase::Closing => {
                self.close_cycles();
                self.context.phase = ResolverPhase::Complete;
            }
            ResolverPhase::Complete => {}
        }
        self.context.phase
    }

    /// Advance until complete; returns the number of ticks taken.
    pub fn run_to_completion(&mut self) -> u32 {
        let mut ticks = 0;
        while !self.is_complete() {
            self.advance_tick();
            ticks += 1;
        }
        ticks
    }

    pub fn into_parts(self) -> (RoadNetwork, O, MarkerArena) {
        (self.network, self.occluder, self.markers)
    }

    fn relax_tick(&mut self) {
        self.context.tick += 1;

        let mut linked = 0;
        let ids: Vec<MarkerId> = self.markers.ids().collect();
        for id in ids {
            if self.markers[id].state == MarkerState::Unsettled {
                linked += self.relax_marker(id);
            }
        }

        self.context.links += linked;
        if linked == 0 {
            self.context.stagnant_ticks += 1;
        } else {
            self.context.stagnant_ticks = 0;
        }

        debug!(
            "Relax tick {}: {} new links, {} markers unsettled",
            self.context.tick, linked, self.context.unsettled
        );

        if self.context.unsettled == 0 {
            info!(
                "All {} markers settled after {} ticks",
                self.markers.len(),
                self.context.tick
            );
            self.context.phase = ResolverPhase::Closing;
        } else if self.context.stagnant_ticks >= self.config.stall_patience
            || self.context.tick >= self.config.max_ticks
        {
            self.stall_remaining();
            self.context.phase = ResolverPhase::Closing;
        }
    }

    fn stall_remaining(&mut self) {
        let ids: Vec<MarkerId> = self.markers.ids().collect();
        for id in ids {
            let marker = &mut self.markers[id];
            if marker.state == MarkerState::Unsettled {
                marker.state = MarkerState::Stalled;
                self.context.stalled.push(id);
            }
        }
        self.context.unsettled = 0;

        warn!(
            "{} markers stalled without a lateral partner after {} ticks",
            self.context.stalled.len(),
            self.context.tick
        );
    }

    fn relax_marker(&mut self, id: MarkerId) -> usize {
        let mut linked = 0;
        if let Some(initial) = self.initial_candidates(id) {
            linked += self.fill_slots(id, &initial);
        }
        if !self.markers[id].is_laterally_linked() {
            let search = self.search_candidates(id);
            linked += self.fill_slots(id, &search);
        }
        linked
    }

    fn fill_slots(&mut self, id: MarkerId, candidates: &[MarkerId]) -> usize {
        let mut linked = 0;
        for slot in [Slot::Left, Slot::Right] {
            if self.markers[id].slot(slot).is_some() {
                continue;
            }
            let (partner, reciprocal, distance) = match self.best_option(id, slot, candidates) {
                Ok(best) => best,
                Err(reason) => {
                    debug!("{} has no {:?} partner: {}", id, slot, reason);
                    continue;
                }
            };
            if !self.prefers(partner, id, reciprocal, distance) {
                debug!("{} passed over by {}, which has a closer partner", id, partner);
                continue;
            }

            match self.markers.link(id, slot, partner, reciprocal) {
                Ok(()) => {
                    linked += 1;
                    self.settle(id);
                    self.settle(partner);
                }
                Err(e) => warn!("Lateral link skipped: {}", e),
            }
        }
        linked
    }

    fn settle(&mut self, id: MarkerId) {
        let marker = &mut self.markers[id];
        if marker.state == MarkerState::Unsettled && marker.is_laterally_linked() {
            marker.state = MarkerState::Settled;
            self.context.unsettled = self.context.unsettled.saturating_sub(1);
        }
    }

    /// Which lateral side of `from` the marker `to` lies on.
    fn classify(&self, from: MarkerId, to: MarkerId) -> Slot {
        let a = &self.markers[from];
        let offset = self.markers[to].position - a.position;
        if a.facing.perp_dot(offset) > 0.0 {
            Slot::Left
        } else {
            Slot::Right
        }
    }

    /// Same-side markers of head and tail, when both carry markers.
    fn initial_candidates(&self, id: MarkerId) -> Option<SmallVec<[MarkerId; 2]>> {
        let marker = &self.markers[id];
        let (segment, side) = (marker.segment?, marker.side?);
        let s = self.network.segment(segment);

        let mut out = SmallVec::new();
        for other in [s.head?, s.tail?] {
            let o = self.network.segment(other);
            if !o.can_make_parcels {
                return None;
            }
            let pick = match side {
                RoadSide::Left => o.left_marker,
                RoadSide::Right => o.right_marker,
            };
            out.extend(pick);
        }
        Some(out)
    }

    /// Breadth-first over the road graph from the marker's segment, taking
    /// dead-end caps and the markers of the nearest parcel-bearing segments.
    fn search_candidates(&self, id: MarkerId) -> SmallVec<[MarkerId; 16]> {
        let mut out: SmallVec<[MarkerId; 16]> = SmallVec::new();
        let marker = &self.markers[id];
        let Some(start) = marker.segment else {
            return out;
        };
        let opposite = marker.side.and_then(|side| {
            let s = self.network.segment(start);
            match side {
                RoadSide::Left => s.right_marker,
                RoadSide::Right => s.left_marker,
            }
        });

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0)]);
        while let Some((segment, depth)) = queue.pop_front() {
            let s = self.network.segment(segment);
            if let Some(caps) = s.end_markers {
                out.extend(caps);
            }
            if s.can_make_parcels {
                out.extend(s.left_marker);
                out.extend(s.right_marker);
                if segment != start {
                    continue;
                }
            }
            if depth >= self.config.search_depth {
                continue;
            }
            for next in self.network.neighbors(segment) {
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        out.retain(|c| *c != id && Some(*c) != opposite);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn candidates_for(&self, id: MarkerId) -> SmallVec<[MarkerId; 16]> {
        match self.initial_candidates(id) {
            Some(initial) if !initial.is_empty() => initial.into_iter().collect(),
            _ => self.search_candidates(id),
        }
    }

    /// Why `c` cannot take `slot` of `id`, or the reciprocal slot and
    /// distance when it can.
    fn check_candidate(
        &self,
        id: MarkerId,
        slot: Slot,
        c: MarkerId,
    ) -> Result<(Slot, f32), LinkRejection> {
        let marker = &self.markers[id];
        if c == id || marker.left == Some(c) || marker.right == Some(c) {
            return Err(LinkRejection::AlreadyLinked);
        }
        if self.classify(id, c) != slot {
            return Err(LinkRejection::WrongSide);
        }

        let distance = marker.position.distance(self.markers[c].position);
        if distance > self.config.max_link_distance {
            return Err(LinkRejection::OutOfRange);
        }

        let reciprocal = self.classify(c, id);
        if matches!(self.markers[c].slot(reciprocal), Some(occupant) if occupant != id) {
            return Err(LinkRejection::SlotTaken);
        }

        if self
            .occluder
            .blocked(marker.position, self.markers[c].position, SurfaceMask::ALL)
        {
            return Err(LinkRejection::Occluded);
        }

        Ok((reciprocal, distance))
    }

    /// Nearest usable partner for `slot` of `id`: on that side, within
    /// range, free to answer back, and not behind a road. Without one, the
    /// furthest check any candidate got past.
    fn best_option(
        &self,
        id: MarkerId,
        slot: Slot,
        candidates: &[MarkerId],
    ) -> Result<(MarkerId, Slot, f32), LinkRejection> {
        let mut best: Option<(MarkerId, Slot, f32)> = None;
        let mut reason = LinkRejection::NoCandidates;

        for &c in candidates {
            match self.check_candidate(id, slot, c) {
                Ok((reciprocal, distance)) => {
                    let better = best.map_or(true, |(b, _, d)| {
                        distance.total_cmp(&d).then(c.cmp(&b)).is_lt()
                    });
                    if better {
                        best = Some((c, reciprocal, distance));
                    }
                }
                Err(e) => reason = reason.max(e),
            }
        }

        best.ok_or(reason)
    }

    /// Whether `partner` has nothing strictly closer for its `slot`.
    fn prefers(&self, partner: MarkerId, id: MarkerId, slot: Slot, distance: f32) -> bool {
        let candidates = self.candidates_for(partner);
        match self.best_option(partner, slot, &candidates) {
            Ok((other, _, d)) if other != id && d < distance - DISTANCE_EPSILON => false,
            _ => true,
        }
    }

    fn close_cycles(&mut self) {
        let ids: Vec<MarkerId> = self.markers.ids().collect();
        for id in ids {
            let m = &self.markers[id];
            if m.state != MarkerState::Settled
                || m.closure != ClosureState::Pending
                || m.is_end
                || m.is_parcel_marker
                || m.forward.is_some()
            {
                continue;
            }

            let outcome = self.try_close(id);
            self.markers[id].closure = ClosureState::Tried;
            match outcome {
                ClosureOutcome::Closed(partner) => debug!("Closed {} -> {}", id, partner),
                ClosureOutcome::Abandoned => {
                    self.context.abandoned += 1;
                    warn!(
                        "Closure from {} abandoned after {} walk steps",
                        id, self.config.max_cycle_steps
                    );
                }
                other => trace!("No closure from {}: {:?}", id, other),
            }
        }

        info!(
            "Closing phase done: {} closures, {} abandoned",
            self.context.closures, self.context.abandoned
        );
    }

    fn try_close(&mut self, id: MarkerId) -> ClosureOutcome {
        let m = &self.markers[id];
        let (position, facing, segment) = (m.position, m.facing, m.segment);
        let lateral = [m.left, m.right];

        if lateral
            .into_iter()
            .flatten()
            .any(|n| self.markers[n].forward.is_some())
        {
            return ClosureOutcome::AdjacentToClosure;
        }

        let Some(hit) = self.occluder.raycast(
            position,
            facing,
            self.config.max_closure_distance,
            SurfaceMask::ALL,
        ) else {
            return ClosureOutcome::NoTarget;
        };
        let Some(target) = self.nearest_bearing_segment(&hit.segments, hit.point) else {
            return ClosureOutcome::NoTarget;
        };
        let t = self.network.segment(target);
        let Some(partner) = [t.left_marker, t.right_marker]
            .into_iter()
            .flatten()
            .min_by(|a, b| {
                let da = position.distance(self.markers[*a].position);
                let db = position.distance(self.markers[*b].position);
                da.total_cmp(&db)
            })
        else {
            return ClosureOutcome::NoTarget;
        };

        let p = &self.markers[partner];
        if partner == id
            || p.forward.is_some()
            || p.state != MarkerState::Settled
            || lateral.contains(&Some(partner))
            || p.segment == segment
            || position.distance(p.position) > self.config.max_closure_distance
            || self.occluder.blocked(position, p.position, SurfaceMask::ALL)
            || self.crosses_closure(position, p.position)
        {
            return ClosureOutcome::Rejected;
        }

        let (mut open, mut exceeded) = (false, false);
        for direction in [Slot::Left, Slot::Right] {
            match self.walk_face(partner, direction, id) {
                Walk::Found(path) => {
                    let mut ring = vec![position];
                    ring.extend(path.iter().map(|&k| self.markers.position(k)));
                    if bounded_orientation(direction, signed_area(&ring)) {
                        return self.commit_closure(id, partner, direction);
                    }
                }
                Walk::Open => open = true,
                Walk::Exceeded => exceeded = true,
                Walk::Looped => {}
            }
        }

        if exceeded {
            ClosureOutcome::Abandoned
        } else if open {
            ClosureOutcome::Open
        } else {
            ClosureOutcome::Rejected
        }
    }

    fn commit_closure(&mut self, from: MarkerId, to: MarkerId, direction: Slot) -> ClosureOutcome {
        if let Err(e) = self.markers.link(from, Slot::Forward, to, Slot::Forward) {
            warn!("Closure {} -> {} not committed: {}", from, to, e);
            return ClosureOutcome::Rejected;
        }
        let left = direction == Slot::Left;
        self.markers[to].is_left_cycle = left;
        self.markers[from].is_left_cycle = !left;
        self.seeds.push(ParcelSeed {
            from,
            to,
            direction,
        });
        self.context.closures += 1;
        ClosureOutcome::Closed(to)
    }

    /// Nearest parcel-bearing segment to `point`, searching outward from the
    /// segments a ray hit.
    fn nearest_bearing_segment(&self, hit: &[SegmentId], point: Vec2) -> Option<SegmentId> {
        let mut found = Vec::new();
        let mut visited: HashSet<SegmentId> = hit.iter().copied().collect();
        let mut queue: VecDeque<(SegmentId, usize)> = hit.iter().map(|&s| (s, 0)).collect();

        while let Some((segment, depth)) = queue.pop_front() {
            let s = self.network.segment(segment);
            if s.can_make_parcels && s.left_marker.is_some() {
                found.push(segment);
                continue;
            }
            if depth >= self.config.search_depth {
                continue;
            }
            for next in self.network.neighbors(segment) {
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        found.into_iter().min_by(|a, b| {
            let da = self.network.segment(*a).position.distance(point);
            let db = self.network.segment(*b).position.distance(point);
            da.total_cmp(&db).then(a.cmp(b))
        })
    }

    fn crosses_closure(&self, a: Vec2, b: Vec2) -> bool {
        self.seeds.iter().any(|seed| {
            let (c, d) = (
                self.markers.position(seed.from),
                self.markers.position(seed.to),
            );
            segment_intersection(a, b, c, d).is_some()
        })
    }

    /// Walk `direction` slots from `start`, crossing any forward link met on
    /// the way, until `target` is next.
    fn walk_face(&self, start: MarkerId, direction: Slot, target: MarkerId) -> Walk {
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        let mut current = start;

        for _ in 0..self.config.max_cycle_steps {
            let Some(mut next) = self.markers.neighbor(current, direction) else {
                return Walk::Open;
            };
            if next == target {
                return Walk::Found(path);
            }

            if let Some(across) = self.markers.neighbor(next, Slot::Forward) {
                if !visited.insert(next) {
                    return Walk::Looped;
                }
                path.push(next);
                next = across;
                if next == target {
                    return Walk::Found(path);
                }
            }

            if !visited.insert(next) {
                return Walk::Looped;
            }
            path.push(next);
            current = next;
        }

        Walk::Exceeded
    }

    /// Every bounded parcel reachable from the committed seeds.
    pub fn materialize(&self) -> Vec<Parcel> {
        let mut parcels = Vec::new();
        let mut seen: HashSet<Vec<MarkerId>> = HashSet::new();

        for seed in &self.seeds {
            for (from, to) in [(seed.from, seed.to), (seed.to, seed.from)] {
                let path = match self.walk_face(to, seed.direction, from) {
                    Walk::Found(path) => path,
                    Walk::Exceeded => {
                        warn!("Face {} -> {} exceeded the walk bound", from, to);
                        continue;
                    }
                    Walk::Open | Walk::Looped => continue,
                };

                let mut markers = Vec::with_capacity(path.len() + 1);
                markers.push(from);
                markers.extend(path);

                let ring: Vec<Vec2> = markers.iter().map(|&k| self.markers.position(k)).collect();
                if !bounded_orientation(seed.direction, signed_area(&ring)) {
                    continue;
                }

                let mut key = markers.clone();
                key.sort_unstable();
                if !seen.insert(key) {
                    continue;
                }

                let parcel = Parcel {
                    markers,
                    is_left_cycle: seed.direction == Slot::Left,
                };
                match parcel.validate(&self.markers) {
                    Ok(()) => parcels.push(parcel),
                    Err(e) => warn!("Dropping parcel from {}: {}", from, e),
                }
            }
        }

        info!("Materialized {} parcels", parcels.len());
        parcels
    }
}

/// Left walks trace bounded faces clockwise, right walks counter-clockwise.
fn bounded_orientation(direction: Slot, signed: f32) -> bool {
    match direction {
        Slot::Left => signed < 0.0,
        _ => signed > 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::fixtures::u_mask;
    use crate::procgen::road_generator::build_road_network;
    use crate::world::grid::{GridPoint, RoadMask};
    use crate::world::WorldConfig;

    fn resolver_for(mask: &RoadMask) -> ParcelResolver {
        let world = WorldConfig::default();
        let config = ParcelConfig::default();
        let network = build_road_network(mask, &world);
        let occluder = RoadOccluder::from_network(
            &network,
            world.cell_size,
            world.road_half_width,
            config.stub_length(),
        );
        ParcelResolver::new(network, occluder, config)
    }

    fn assert_links_symmetric(markers: &MarkerArena) {
        for (id, m) in markers.iter() {
            for other in m.links() {
                assert!(
                    markers.slot_of(other, id).is_some(),
                    "{id} -> {other} has no link back"
                );
            }
        }
    }

    #[test]
    fn markers_sit_beside_roads_and_around_dead_ends() {
        let resolver = resolver_for(&u_mask());
        let net = resolver.network();
        let markers = resolver.markers();

        let root = net.segment_at(GridPoint::new(2, 2)).unwrap();
        let left = net.segment(root).left_marker.unwrap();
        let right = net.segment(root).right_marker.unwrap();
        assert!((markers[left].position - Vec2::new(20.0, 24.0)).length() < 1e-4);
        assert!((markers[right].position - Vec2::new(20.0, 16.0)).length() < 1e-4);

        let [a, b] = net.segment(root).end_markers.unwrap();
        assert!((markers[a].position - Vec2::new(15.0, 16.0)).length() < 1e-4);
        assert!((markers[b].position - Vec2::new(15.0, 24.0)).length() < 1e-4);
        assert!(markers[a].is_end && markers[b].is_end);

        let end = net.segment_at(GridPoint::new(10, 2)).unwrap();
        let [c, d] = net.segment(end).end_markers.unwrap();
        assert!((markers[c].position - Vec2::new(15.0, 96.0)).length() < 1e-4);
        assert!((markers[d].position - Vec2::new(15.0, 104.0)).length() < 1e-4);

        // 29 bearing segments with two markers each, plus two caps per dead end.
        assert_eq!(markers.len(), 29 * 2 + 4);
    }

    #[test]
    fn link_rejections_name_the_failing_check() {
        let mut resolver = resolver_for(&u_mask());
        let net = resolver.network();
        let straight = net.segment_at(GridPoint::new(2, 6)).unwrap();
        let neighbour = net.segment_at(GridPoint::new(2, 5)).unwrap();
        let far = net.segment_at(GridPoint::new(10, 6)).unwrap();
        let left = net.segment(straight).left_marker.unwrap();
        let right = net.segment(straight).right_marker.unwrap();
        let neighbour_left = net.segment(neighbour).left_marker.unwrap();
        let far_left = net.segment(far).left_marker.unwrap();

        assert_eq!(
            resolver.best_option(left, Slot::Right, &[]),
            Err(LinkRejection::NoCandidates)
        );
        assert_eq!(
            resolver.best_option(left, Slot::Left, &[right]),
            Err(LinkRejection::WrongSide)
        );
        assert_eq!(
            resolver.best_option(left, Slot::Right, &[far_left]),
            Err(LinkRejection::OutOfRange)
        );
        // Straight across the road: in range, but the centerline is in the way.
        assert_eq!(
            resolver.best_option(left, Slot::Right, &[right]),
            Err(LinkRejection::Occluded)
        );
        // The furthest check reached wins over earlier failures.
        assert_eq!(
            resolver.best_option(left, Slot::Right, &[far_left, right]),
            Err(LinkRejection::Occluded)
        );

        resolver
            .markers
            .link(right, Slot::Right, neighbour_left, Slot::Left)
            .unwrap();
        assert_eq!(
            resolver.best_option(left, Slot::Right, &[right]),
            Err(LinkRejection::SlotTaken)
        );
    }

    #[test]
    fn u_road_settles_and_closes_five_strips() {
        let mut resolver = resolver_for(&u_mask());
        let ticks = resolver.run_to_completion();

        assert!(resolver.is_complete());
        assert!(ticks >= 2);
        assert!(resolver.context().stalled.is_empty());
        assert!(resolver
            .markers()
            .iter()
            .all(|(_, m)| m.state == MarkerState::Settled));
        assert_links_symmetric(resolver.markers());

        assert_eq!(resolver.seeds().len(), 5);
        assert_eq!(resolver.context().abandoned, 0);

        let parcels = resolver.materialize();
        assert_eq!(parcels.len(), 5);
        for parcel in &parcels {
            assert!(parcel.validate(resolver.markers()).is_ok());
        }
        // The last strip wraps the inside corner; the others are 20 x 72.
        for parcel in &parcels[..4] {
            assert!((parcel.area(resolver.markers()) - 1440.0).abs() < 1e-2);
        }
        assert!(parcels[4].area(resolver.markers()) > 1000.0);

        let first = parcels[0].polygon(resolver.markers());
        let expected = [
            Vec2::new(20.0, 24.0),
            Vec2::new(20.0, 96.0),
            Vec2::new(30.0, 96.0),
            Vec2::new(40.0, 96.0),
            Vec2::new(40.0, 24.0),
            Vec2::new(30.0, 24.0),
        ];
        assert_eq!(first.len(), expected.len());
        for (got, want) in first.iter().zip(expected) {
            assert!((*got - want).length() < 1e-3, "{got} != {want}");
        }
        assert!(parcels[0].signed_area(resolver.markers()) < 0.0);
        assert!(parcels[0].is_left_cycle);
    }

    #[test]
    fn closures_mark_both_ends() {
        let mut resolver = resolver_for(&u_mask());
        resolver.run_to_completion();

        for seed in resolver.seeds() {
            let (from, to) = (&resolver.markers()[seed.from], &resolver.markers()[seed.to]);
            assert_eq!(from.forward, Some(seed.to));
            assert_eq!(to.forward, Some(seed.from));
            assert_eq!(to.is_left_cycle, seed.direction == Slot::Left);
            assert_ne!(from.is_left_cycle, to.is_left_cycle);
        }
    }

    #[test]
    fn phases_advance_one_tick_at_a_time() {
        let mut resolver = resolver_for(&u_mask());
        assert_eq!(resolver.phase(), ResolverPhase::Relaxing);

        let mut seen_closing = false;
        for _ in 0..100 {
            match resolver.advance_tick() {
                ResolverPhase::Closing => seen_closing = true,
                ResolverPhase::Complete => break,
                ResolverPhase::Relaxing => {}
            }
        }
        assert!(seen_closing);
        assert!(resolver.is_complete());
        // Further ticks are no-ops.
        assert_eq!(resolver.advance_tick(), ResolverPhase::Complete);
    }

    #[test]
    fn lone_road_settles_without_parcels() {
        let mask = RoadMask::from_rows(&["......", ".XXXX.", "......"]);
        let mut resolver = resolver_for(&mask);
        resolver.run_to_completion();

        assert!(resolver.context().stalled.is_empty());
        assert_links_symmetric(resolver.markers());
        assert!(resolver.seeds().is_empty());
        assert!(resolver.materialize().is_empty());
    }

    #[test]
    fn empty_network_completes_immediately() {
        let mut resolver = resolver_for(&RoadMask::new(4, 4));
        assert_eq!(resolver.markers().len(), 0);
        resolver.run_to_completion();
        assert!(resolver.is_complete());
        assert!(resolver.materialize().is_empty());
    }
}
