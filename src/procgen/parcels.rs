//! Parcel subdivision by recursive bounding-box bisection.
//!
//! Converts closed parcels into buildable lots. Each step cuts the parcel
//! across the short axis of its minimum bounding box, splices two cut markers
//! into the marker cycle where the cut crosses it, and recurses on both
//! halves.

use bevy::prelude::*;
use std::fmt;

use super::bounding_box::{minimum_bounding_box, BoundingBox};
use super::lot_geometry::{distance_to_segment, polygon_area, segment_intersection};
use super::markers::{LinkError, MarkerArena, MarkerId, Parcel, ParcelMarker, Slot};

const EPSILON: f32 = 1e-4;

/// Configuration for subdivision.
#[derive(Clone, Debug)]
pub struct SubdivisionConfig {
    /// Bounding-box area below which a parcel is a finished lot.
    pub min_lot_area: f32,
    /// Smallest bounding-box half-extent, on either axis, worth cutting
    /// further. Zero extents are exempt.
    pub min_lot_extent: f32,
    pub max_depth: u32,
    /// How far the cut line reaches past the box on each side.
    pub cut_buffer: f32,
}

impl Default for SubdivisionConfig {
    fn default() -> Self {
        Self {
            min_lot_area: 400.0,
            min_lot_extent: 4.0,
            max_depth: 25,
            cut_buffer: 5.0,
        }
    }
}

/// Why a lot was not split further.
#[derive(Clone, Debug, PartialEq)]
pub enum LotOutcome {
    MinimumArea,
    MinimumExtent,
    DepthLimit,
    Unsplittable(CutError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CutError {
    /// The cut met the boundary some number of times other than two.
    Crossings(usize),
    /// Consecutive cycle markers share no edge.
    Unlinked(MarkerId, MarkerId),
    Link(LinkError),
}

impl fmt::Display for CutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutError::Crossings(n) => write!(f, "cut crosses the boundary {n} times"),
            CutError::Unlinked(a, b) => write!(f, "{a} and {b} share no edge"),
            CutError::Link(e) => write!(f, "splice failed: {e}"),
        }
    }
}

impl std::error::Error for CutError {}

impl From<LinkError> for CutError {
    fn from(e: LinkError) -> Self {
        CutError::Link(e)
    }
}

/// A buildable lot (subdivision result).
#[derive(Clone, Debug)]
pub struct Lot {
    pub markers: Vec<MarkerId>,
    pub polygon: Vec<Vec2>,
    pub bounds: BoundingBox,
    pub area: f32,
    pub depth: u32,
    pub outcome: LotOutcome,
}

impl Lot {
    pub fn is_split_cleanly(&self) -> bool {
        !matches!(self.outcome, LotOutcome::Unsplittable(_))
    }
}

pub struct ParcelSubdivider<'a> {
    markers: &'a mut MarkerArena,
    config: &'a SubdivisionConfig,
}

impl<'a> ParcelSubdivider<'a> {
    pub fn new(markers: &'a mut MarkerArena, config: &'a SubdivisionConfig) -> Self {
        Self { markers, config }
    }

    /// Subdivide every parcel, then bring each lot's cycle up to date with
    /// cuts made later on edges it shares with its neighbours.
    pub fn subdivide_all(&mut self, parcels: &[Parcel]) -> Vec<Lot> {
        let mut lots = Vec::new();
        for parcel in parcels {
            self.split_recursive(parcel.markers.clone(), 0, &mut lots);
        }

        for lot in &mut lots {
            lot.markers = self.expand_chains(&lot.markers);
            lot.polygon = self.polygon(&lot.markers);
        }

        let unsplittable = lots.iter().filter(|l| !l.is_split_cleanly()).count();
        info!(
            "Subdivided {} parcels into {} lots ({} unsplittable)",
            parcels.len(),
            lots.len(),
            unsplittable
        );
        lots
    }

    pub fn subdivide(&mut self, parcel: &Parcel) -> Vec<Lot> {
        self.subdivide_all(std::slice::from_ref(parcel))
    }

    /// One bisection of `cycle`, returning both halves.
    pub fn split_once(&mut self, cycle: &[MarkerId]) -> Result<[Vec<MarkerId>; 2], CutError> {
        let cycle = self.expand_chains(cycle);
        let polygon = self.polygon(&cycle);
        let bounds = minimum_bounding_box(&polygon);
        self.cut(&cycle, &polygon, &bounds)
    }

    fn split_recursive(&mut self, cycle: Vec<MarkerId>, depth: u32, lots: &mut Vec<Lot>) {
        let cycle = self.expand_chains(&cycle);
        let polygon = self.polygon(&cycle);
        let bounds = minimum_bounding_box(&polygon);
        let too_narrow = bounds
            .extents
            .iter()
            .any(|&e| e > 0.0 && e < self.config.min_lot_extent);

        let stop = if too_narrow {
            Some(LotOutcome::MinimumExtent)
        } else if depth > self.config.max_depth {
            Some(LotOutcome::DepthLimit)
        } else if bounds.area < self.config.min_lot_area {
            Some(LotOutcome::MinimumArea)
        } else {
            None
        };

        let outcome = match stop {
            Some(outcome) => outcome,
            None => match self.cut(&cycle, &polygon, &bounds) {
                Ok([a, b]) => {
                    self.split_recursive(a, depth + 1, lots);
                    self.split_recursive(b, depth + 1, lots);
                    return;
                }
                Err(e) => {
                    warn!(
                        "Parcel of {} markers at depth {} left unsplit: {}",
                        cycle.len(),
                        depth,
                        e
                    );
                    LotOutcome::Unsplittable(e)
                }
            },
        };

        lots.push(Lot {
            area: polygon_area(&polygon),
            markers: cycle,
            polygon,
            bounds,
            depth,
            outcome,
        });
    }

    fn polygon(&self, cycle: &[MarkerId]) -> Vec<Vec2> {
        cycle.iter().map(|&id| self.markers.position(id)).collect()
    }

    /// Bisect along the box's short axis and splice the two cut markers in.
    fn cut(
        &mut self,
        cycle: &[MarkerId],
        polygon: &[Vec2],
        bounds: &BoundingBox,
    ) -> Result<[Vec<MarkerId>; 2], CutError> {
        let minor = bounds.minor_axis();
        let axis = bounds.axes[minor];
        let reach = bounds.extents[minor] + self.config.cut_buffer;
        let (from, to) = (bounds.centre - axis * reach, bounds.centre + axis * reach);

        let n = polygon.len();
        let crossings: Vec<(usize, Vec2)> = (0..n)
            .filter_map(|i| {
                let (point, _, u) = segment_intersection(from, to, polygon[i], polygon[(i + 1) % n])?;
                (u < 1.0).then_some((i, point))
            })
            .collect();

        let [(i, p), (j, q)] = crossings[..] else {
            return Err(CutError::Crossings(crossings.len()));
        };

        let edge = |k: usize| (cycle[k], cycle[(k + 1) % n]);
        for (a, b) in [edge(i), edge(j)] {
            if self.markers.slot_of(a, b).is_none() || self.markers.slot_of(b, a).is_none() {
                return Err(CutError::Unlinked(a, b));
            }
        }

        let (a1, b1) = edge(i);
        let (a2, b2) = edge(j);
        let x1 = self.splice(a1, b1, p)?;
        let x2 = self.splice(a2, b2, q)?;
        self.markers.link(x1, Slot::Forward, x2, Slot::Forward)?;

        let mut first = Vec::with_capacity(j - i + 2);
        first.push(x1);
        first.extend_from_slice(&cycle[i + 1..=j]);
        first.push(x2);

        let mut second = Vec::with_capacity(n - (j - i) + 2);
        second.push(x2);
        second.extend_from_slice(&cycle[j + 1..]);
        second.extend_from_slice(&cycle[..=i]);
        second.push(x1);

        Ok([first, second])
    }

    /// Insert a cut marker on the edge `a-b`, taking over the slots that held
    /// the edge on both sides.
    fn splice(&mut self, a: MarkerId, b: MarkerId, point: Vec2) -> Result<MarkerId, CutError> {
        let (Some(s_ab), Some(s_ba)) = (self.markers.slot_of(a, b), self.markers.slot_of(b, a))
        else {
            return Err(CutError::Unlinked(a, b));
        };

        // Lateral slots keep their orientation through the new marker.
        let (to_a, to_b) = match (s_ab, s_ba) {
            (Slot::Left, _) => (Slot::Right, Slot::Left),
            (Slot::Right, _) => (Slot::Left, Slot::Right),
            (Slot::Forward, Slot::Left) => (Slot::Left, Slot::Right),
            (Slot::Forward, _) => (Slot::Right, Slot::Left),
        };

        let x = self.markers.insert(ParcelMarker::cut(point));
        self.markers.relink(x, to_a, a, s_ab)?;
        self.markers.relink(x, to_b, b, s_ba)?;
        Ok(x)
    }

    /// Restore cut markers spliced into edges after `cycle` was recorded.
    fn expand_chains(&self, cycle: &[MarkerId]) -> Vec<MarkerId> {
        let n = cycle.len();
        let mut out = Vec::with_capacity(n);
        for k in 0..n {
            let (a, b) = (cycle[k], cycle[(k + 1) % n]);
            out.push(a);
            if n > 1 && self.markers.slot_of(a, b).is_none() {
                if let Some(chain) = self.collinear_chain(a, b) {
                    out.extend(chain);
                }
            }
        }
        out
    }

    /// Cut markers lying on the segment `a-b`, in order from `a`.
    fn collinear_chain(&self, a: MarkerId, b: MarkerId) -> Option<Vec<MarkerId>> {
        let (pa, pb) = (self.markers.position(a), self.markers.position(b));
        let mut chain = Vec::new();
        let mut current = a;

        for _ in 0..self.markers.len() {
            if self.markers.slot_of(current, b).is_some() {
                return Some(chain);
            }
            let remaining = self.markers.position(current).distance(pb);
            let next = self.markers[current].links().find(|&c| {
                let m = &self.markers[c];
                m.is_parcel_marker
                    && distance_to_segment(m.position, pa, pb) < EPSILON
                    && m.position.distance(pb) < remaining - EPSILON
            });
            // A cut on top of an existing marker makes no progress in distance.
            let next = next.or_else(|| {
                self.markers[current].links().find(|&c| {
                    let m = &self.markers[c];
                    m.is_parcel_marker
                        && !chain.contains(&c)
                        && c != a
                        && m.position.distance(self.markers.position(current)) < EPSILON
                })
            })?;
            chain.push(next);
            current = next;
        }

        None
    }
}
