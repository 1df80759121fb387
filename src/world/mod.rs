//! World data: the road mask grid, spatial partitioning and grid-to-world mapping.

use bevy::prelude::*;

pub mod grid;

use grid::GridPoint;

/// Mapping from grid cells to world space.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Size of one grid cell in world units.
    pub cell_size: f32,
    /// Half the paved width of a road, used for surface lookups.
    pub road_half_width: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            road_half_width: 3.0,
        }
    }
}

impl WorldConfig {
    /// World position of a cell centre: columns run along x, rows along y.
    pub fn cell_to_world(&self, p: GridPoint) -> Vec2 {
        Vec2::new(p.col as f32 * self.cell_size, p.row as f32 * self.cell_size)
    }
}
