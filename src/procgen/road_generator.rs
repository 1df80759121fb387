//! Road network generator: a depth-first walk over the connected mask.
//!
//! Creates the segment graph by:
//! 1. Starting at the first road cell in row-major order
//! 2. Visiting neighbours orthogonals-first, each new cell hanging off the
//!    cell it was discovered from
//! 3. Flagging intersections wherever a cell gains a second continuation

use bevy::prelude::*;

use super::roads::{RoadLink, RoadNetwork, RoadSegment, SegmentId};
use crate::world::grid::{GridPoint, RoadMask};
use crate::world::WorldConfig;

/// Walk the mask and build the segment graph.
///
/// The walk is the iterative form of a recursive depth-first search: the
/// stack holds `(cell, discovered_from)` pairs pushed in reverse walk order,
/// and cells are marked when popped.
pub fn build_road_network(mask: &RoadMask, world: &WorldConfig) -> RoadNetwork {
    let mut network = RoadNetwork::default();

    let Some(start) = mask.first_road() else {
        return network;
    };

    let mut searched = vec![false; mask.length * mask.width];
    let mut stack: Vec<(GridPoint, Option<SegmentId>)> = vec![(start, None)];
    let mut branches = 0;

    while let Some((cell, prev)) = stack.pop() {
        let index = cell.row * mask.width + cell.col;
        if searched[index] {
            continue;
        }
        searched[index] = true;

        let id = network.add_segment(RoadSegment::new(cell, world.cell_to_world(cell)));
        if let Some(prev) = prev {
            if network.attach(prev, id) == RoadLink::Branch {
                branches += 1;
            }
        }

        for next in mask.neighbors8(cell).into_iter().rev() {
            if mask.is_road(next) && !searched[next.row * mask.width + next.col] {
                stack.push((next, Some(id)));
            }
        }
    }

    let ids: Vec<SegmentId> = network.segments().map(|(id, _)| id).collect();
    for id in ids {
        let supports = network.supports_parcels(id);
        network.segment_mut(id).can_make_parcels = supports;
    }

    if network.segment_count() < mask.road_count() {
        warn!(
            "Road walk reached {} of {} road cells; mask is not connected",
            network.segment_count(),
            mask.road_count()
        );
    }

    info!(
        "Road graph built: {} segments, {} intersections, {} branches",
        network.segment_count(),
        network.intersection_count(),
        branches
    );

    network
}
