//! Occlusion queries against the road network.
//!
//! Markers may only link, and parcels may only close, across ground that no
//! road crosses. The resolver asks an [`Occluder`]; [`RoadOccluder`] answers
//! from the road centerlines plus a short stub past every dead end, bucketed
//! in a [`SpatialGrid`].

use bevy::prelude::*;
use smallvec::SmallVec;

use super::lot_geometry::{distance_to_segment, segment_intersection};
use super::roads::{RoadNetwork, SegmentId};
use crate::world::grid::SpatialGrid;

/// Bit set of blocking surface classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceMask(pub u32);

impl SurfaceMask {
    /// Centerline between two connected road cells.
    pub const ROAD: Self = Self(1);
    /// Stub extending past the open end of a dead end.
    pub const ROAD_END: Self = Self(1 << 1);
    pub const ALL: Self = Self(Self::ROAD.0 | Self::ROAD_END.0);

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// What lies at a point, for consumers placing props.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceClass {
    Road,
    Ground,
}

/// Nearest blocking surface along a ray.
#[derive(Clone, Debug)]
pub struct RayHit {
    pub point: Vec2,
    pub distance: f32,
    /// Road segments owning the surfaces hit at that distance.
    pub segments: SmallVec<[SegmentId; 4]>,
}

pub trait Occluder {
    fn raycast(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        mask: SurfaceMask,
    ) -> Option<RayHit>;

    fn classify(&self, point: Vec2) -> SurfaceClass;

    /// Whether a surface in `mask` lies on the straight segment `from-to`.
    fn blocked(&self, from: Vec2, to: Vec2, mask: SurfaceMask) -> bool {
        let delta = to - from;
        let length = delta.length();
        if length < 1e-6 {
            return false;
        }
        self.raycast(from, delta / length, length, mask).is_some()
    }
}

#[derive(Clone, Debug)]
struct Barrier {
    start: Vec2,
    end: Vec2,
    class: SurfaceMask,
    segments: SmallVec<[SegmentId; 2]>,
}

#[derive(Clone, Debug)]
pub struct RoadOccluder {
    barriers: Vec<Barrier>,
    grid: SpatialGrid<usize>,
    road_half_width: f32,
}

impl RoadOccluder {
    pub fn from_network(network: &RoadNetwork, cell_size: f32, road_half_width: f32, stub_length: f32) -> Self {
        let mut occluder = Self {
            barriers: Vec::new(),
            grid: SpatialGrid::new(cell_size.max(1.0) * 2.0),
            road_half_width,
        };

        for (a, b) in network.centerline_edges() {
            occluder.add_barrier(Barrier {
                start: network.segment(a).position,
                end: network.segment(b).position,
                class: SurfaceMask::ROAD,
                segments: SmallVec::from_slice(&[a, b]),
            });
        }

        let dead_ends: Vec<SegmentId> = network
            .segments()
            .map(|(id, _)| id)
            .filter(|&id| network.is_dead_end(id))
            .collect();
        for id in dead_ends {
            if let Some(dir) = network.open_direction(id) {
                let start = network.segment(id).position;
                occluder.add_barrier(Barrier {
                    start,
                    end: start + dir * stub_length,
                    class: SurfaceMask::ROAD_END,
                    segments: SmallVec::from_slice(&[id]),
                });
            }
        }

        occluder
    }

    fn add_barrier(&mut self, barrier: Barrier) {
        let index = self.barriers.len();
        self.grid.insert_rect(index, barrier.start, barrier.end);
        self.barriers.push(barrier);
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers.len()
    }
}

impl Occluder for RoadOccluder {
    fn raycast(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        mask: SurfaceMask,
    ) -> Option<RayHit> {
        let end = origin + direction * max_distance;
        let mut hit: Option<RayHit> = None;

        for index in self.grid.query_rect(origin, end) {
            let barrier = &self.barriers[index];
            if !barrier.class.intersects(mask) {
                continue;
            }
            let Some((point, t, _)) = segment_intersection(origin, end, barrier.start, barrier.end)
            else {
                continue;
            };

            let distance = t * max_distance;
            let nearer = hit.as_ref().map_or(true, |h| distance < h.distance - 1e-4);
            if nearer {
                hit = Some(RayHit {
                    point,
                    distance,
                    segments: barrier.segments.iter().copied().collect(),
                });
            } else if let Some(h) = hit.as_mut() {
                // Same distance: a shared joint or a stub root.
                if (distance - h.distance).abs() < 1e-4 {
                    for &s in &barrier.segments {
                        if !h.segments.contains(&s) {
                            h.segments.push(s);
                        }
                    }
                }
            }
        }

        hit
    }

    fn classify(&self, point: Vec2) -> SurfaceClass {
        let on_road = self
            .grid
            .query_radius(point, self.road_half_width)
            .into_iter()
            .map(|i| &self.barriers[i])
            .filter(|b| b.class.intersects(SurfaceMask::ROAD))
            .any(|b| distance_to_segment(point, b.start, b.end) <= self.road_half_width);

        if on_road {
            SurfaceClass::Road
        } else {
            SurfaceClass::Ground
        }
    }
}
