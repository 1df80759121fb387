//! Road segment graph built over the connected road mask.
//!
//! Uses petgraph for the underlying graph structure. Every road cell owns one
//! segment; graph edges carry the head/tail relation (`Tail`) or a branch
//! leaving an intersection (`Branch`), always pointing from the head segment
//! towards the newly discovered one.

use bevy::prelude::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use smallvec::SmallVec;
use std::collections::HashMap;

use super::markers::MarkerId;
use crate::world::grid::GridPoint;

pub type SegmentId = NodeIndex;

/// How a segment was reached from its head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoadLink {
    /// First continuation of the head segment.
    Tail,
    /// Additional continuation; the head is an intersection.
    Branch,
}

/// One road cell.
#[derive(Clone, Debug)]
pub struct RoadSegment {
    pub cell: GridPoint,
    pub position: Vec2,
    /// Cumulative vertical offset, lowered a step for each intersection branch.
    pub elevation: f32,
    /// Direction of travel into this segment (radians).
    pub heading: f32,
    /// Heading at the head joint, i.e. the head segment's heading.
    pub head_rotation: f32,
    /// Turn from the head segment's heading, wrapped to (-pi, pi].
    pub curvature: f32,
    pub head: Option<SegmentId>,
    pub tail: Option<SegmentId>,
    pub intersecting: SmallVec<[SegmentId; 4]>,
    pub is_intersection: bool,
    pub can_make_parcels: bool,
    pub left_marker: Option<MarkerId>,
    pub right_marker: Option<MarkerId>,
    pub end_markers: Option<[MarkerId; 2]>,
}

impl RoadSegment {
    pub fn new(cell: GridPoint, position: Vec2) -> Self {
        Self {
            cell,
            position,
            elevation: 0.0,
            heading: 0.0,
            head_rotation: 0.0,
            curvature: 0.0,
            head: None,
            tail: None,
            intersecting: SmallVec::new(),
            is_intersection: false,
            can_make_parcels: false,
            left_marker: None,
            right_marker: None,
            end_markers: None,
        }
    }
}

/// Elevation step applied to each intersection branch.
pub const INTERSECTION_DROP: f32 = 0.01;

/// Wrap an angle to (-pi, pi].
pub fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// The road network.
#[derive(Clone, Debug, Default)]
pub struct RoadNetwork {
    pub graph: DiGraph<RoadSegment, RoadLink>,
    by_cell: HashMap<GridPoint, SegmentId>,
}

impl RoadNetwork {
    pub fn add_segment(&mut self, segment: RoadSegment) -> SegmentId {
        let cell = segment.cell;
        let id = self.graph.add_node(segment);
        self.by_cell.insert(cell, id);
        id
    }

    /// Attach `child` to `head`. A head that already has a tail becomes an
    /// intersection and the two register each other.
    pub fn attach(&mut self, head: SegmentId, child: SegmentId) -> RoadLink {
        let head_pos = self.graph[head].position;
        let head_has_head = self.graph[head].head.is_some();
        let head_elevation = self.graph[head].elevation;
        let delta = self.graph[child].position - head_pos;
        let heading = delta.y.atan2(delta.x);

        let link = if self.graph[head].tail.is_none() {
            let h = &mut self.graph[head];
            h.tail = Some(child);
            // A root has nothing behind it; it faces along its first continuation.
            if !head_has_head {
                h.heading = heading;
            }
            RoadLink::Tail
        } else {
            let h = &mut self.graph[head];
            h.is_intersection = true;
            h.intersecting.push(child);
            RoadLink::Branch
        };

        let head_heading = self.graph[head].heading;
        let c = &mut self.graph[child];
        c.head = Some(head);
        c.heading = heading;
        c.head_rotation = head_heading;
        c.curvature = wrap_angle(heading - head_heading);
        c.elevation = match link {
            RoadLink::Tail => head_elevation,
            RoadLink::Branch => head_elevation - INTERSECTION_DROP,
        };
        if link == RoadLink::Branch {
            c.intersecting.push(head);
        }

        self.graph.add_edge(head, child, link);
        link
    }

    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.graph[id]
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> &mut RoadSegment {
        &mut self.graph[id]
    }

    pub fn segment_at(&self, cell: GridPoint) -> Option<SegmentId> {
        self.by_cell.get(&cell).copied()
    }

    /// Segments in creation order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &RoadSegment)> {
        self.graph.node_indices().map(|i| (i, &self.graph[i]))
    }

    pub fn segment_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn intersection_count(&self) -> usize {
        self.graph.node_weights().filter(|s| s.is_intersection).count()
    }

    /// Adjacent segments regardless of link direction.
    pub fn neighbors(&self, id: SegmentId) -> impl Iterator<Item = SegmentId> + '_ {
        self.graph.neighbors_undirected(id)
    }

    pub fn degree(&self, id: SegmentId) -> usize {
        self.neighbors(id).count()
    }

    pub fn is_dead_end(&self, id: SegmentId) -> bool {
        self.degree(id) == 1
    }

    /// Direction out of the open end of a dead end.
    pub fn open_direction(&self, id: SegmentId) -> Option<Vec2> {
        if !self.is_dead_end(id) {
            return None;
        }
        let other = self.neighbors(id).next()?;
        (self.graph[id].position - self.graph[other].position).try_normalize()
    }

    /// Road direction through a segment: the average of the incoming and
    /// outgoing directions along its head and tail.
    pub fn tangent(&self, id: SegmentId) -> Vec2 {
        let s = &self.graph[id];
        let incoming = s
            .head
            .and_then(|h| (s.position - self.graph[h].position).try_normalize())
            .unwrap_or(Vec2::ZERO);
        let outgoing = s
            .tail
            .and_then(|t| (self.graph[t].position - s.position).try_normalize())
            .unwrap_or(Vec2::ZERO);

        (incoming + outgoing)
            .try_normalize()
            .or_else(|| incoming.try_normalize())
            .unwrap_or(Vec2::X)
    }

    /// Head/tail/branch links as (head, child) pairs.
    pub fn centerline_edges(&self) -> impl Iterator<Item = (SegmentId, SegmentId)> + '_ {
        self.graph.edge_references().map(|e| (e.source(), e.target()))
    }

    /// Whether a segment may carry side markers: neither it nor the
    /// segments directly along the road are intersections.
    pub fn supports_parcels(&self, id: SegmentId) -> bool {
        let s = &self.graph[id];
        let touches_intersection = |other: Option<SegmentId>| {
            other.is_some_and(|o| self.graph[o].is_intersection)
        };
        self.degree(id) > 0
            && !s.is_intersection
            && !touches_intersection(s.head)
            && !touches_intersection(s.tail)
    }
}
