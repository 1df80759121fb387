//! Thresholding the noise field into a road mask.

use bevy::prelude::*;

use crate::world::grid::{GridPoint, RoadMask};

use super::noise_field::NoiseFieldSampler;

/// Most road neighbours a cell may keep after pruning.
pub const MAX_ROAD_NEIGHBORS: usize = 4;

/// Diagonals removed from an over-dense cell, in order:
/// upper-left, upper-right, lower-left, lower-right.
const PRUNE_ORDER: [(i64, i64); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// Road mask generation settings.
#[derive(Clone, Debug)]
pub struct RoadMaskConfig {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub length: usize,
    /// Noise periods spanned by the grid (higher = busier roads).
    pub resolution: f64,
    /// Cells whose noise value is at least this become road.
    pub threshold: f64,
}

impl Default for RoadMaskConfig {
    fn default() -> Self {
        Self {
            width: 32,
            length: 32,
            resolution: 4.0,
            threshold: 0.5,
        }
    }
}

/// Sample, threshold and prune.
pub fn generate_road_mask(config: &RoadMaskConfig, sampler: &NoiseFieldSampler) -> RoadMask {
    let mut mask = RoadMask::new(config.length, config.width);

    for row in 0..config.length {
        for col in 0..config.width {
            let x = row as f64 / config.length as f64 * config.resolution;
            let y = col as f64 / config.width as f64 * config.resolution;
            if sampler.sample(x, y) >= config.threshold {
                mask.set(GridPoint::new(row, col), true);
            }
        }
    }

    let pruned = prune_diagonal_clutter(&mut mask);
    info!(
        "Road mask {}x{}: {} road cells ({} pruned)",
        config.width,
        config.length,
        mask.road_count(),
        pruned
    );
    mask
}

/// Remove diagonal roads around every cell with more than four road
/// neighbours. Returns the number of cells cleared.
///
/// Clearing a cell only lowers its neighbours' counts, so one row-major
/// pass leaves every cell at or below the limit.
pub fn prune_diagonal_clutter(mask: &mut RoadMask) -> usize {
    let mut removed = 0;

    for row in 0..mask.length {
        for col in 0..mask.width {
            let p = GridPoint::new(row, col);
            let mut count = mask.road_neighbor_count(p);

            for delta in PRUNE_ORDER {
                if count <= MAX_ROAD_NEIGHBORS {
                    break;
                }
                if let Some(q) = mask.offset(p, delta) {
                    if mask.is_road(q) {
                        mask.set(q, false);
                        count -= 1;
                        removed += 1;
                    }
                }
            }
        }
    }

    removed
}
