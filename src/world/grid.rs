//! Road mask grid and spatial partitioning for fast geometric queries.

use bevy::prelude::*;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// A cell coordinate in the road mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPoint {
    pub row: usize,
    pub col: usize,
}

impl GridPoint {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Squared straight-line distance in grid space.
    pub fn distance_squared(self, other: GridPoint) -> i64 {
        let dr = self.row as i64 - other.row as i64;
        let dc = self.col as i64 - other.col as i64;
        dr * dr + dc * dc
    }

    pub fn manhattan(self, other: GridPoint) -> u32 {
        (self.row.abs_diff(other.row) + self.col.abs_diff(other.col)) as u32
    }
}

/// Neighbour deltas in the order the road walk explores them:
/// the four orthogonal moves first, then the diagonals.
pub const WALK_ORDER: [(i64, i64); 8] = [
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Boolean "is-road" grid, `length` rows by `width` columns, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoadMask {
    pub length: usize,
    pub width: usize,
    cells: Vec<bool>,
}

impl RoadMask {
    pub fn new(length: usize, width: usize) -> Self {
        Self {
            length,
            width,
            cells: vec![false; length * width],
        }
    }

    /// Build a mask from rows of `X` (road) and anything else (empty).
    pub fn from_rows(rows: &[&str]) -> Self {
        let length = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut mask = Self::new(length, width);
        for (row, line) in rows.iter().enumerate() {
            for (col, ch) in line.chars().enumerate() {
                if ch == 'X' {
                    mask.set(GridPoint::new(row, col), true);
                }
            }
        }
        mask
    }

    pub fn contains(&self, p: GridPoint) -> bool {
        p.row < self.length && p.col < self.width
    }

    fn index(&self, p: GridPoint) -> usize {
        p.row * self.width + p.col
    }

    pub fn is_road(&self, p: GridPoint) -> bool {
        self.contains(p) && self.cells[self.index(p)]
    }

    pub fn set(&mut self, p: GridPoint, road: bool) {
        if self.contains(p) {
            let i = self.index(p);
            self.cells[i] = road;
        }
    }

    /// Offset a point, returning `None` when the result leaves the grid.
    pub fn offset(&self, p: GridPoint, delta: (i64, i64)) -> Option<GridPoint> {
        let row = p.row as i64 + delta.0;
        let col = p.col as i64 + delta.1;
        if row < 0 || col < 0 {
            return None;
        }
        let q = GridPoint::new(row as usize, col as usize);
        self.contains(q).then_some(q)
    }

    /// In-bounds eight-connected neighbours in walk order.
    pub fn neighbors8(&self, p: GridPoint) -> SmallVec<[GridPoint; 8]> {
        WALK_ORDER
            .iter()
            .filter_map(|&d| self.offset(p, d))
            .collect()
    }

    pub fn road_neighbor_count(&self, p: GridPoint) -> usize {
        self.neighbors8(p).into_iter().filter(|&q| self.is_road(q)).count()
    }

    pub fn road_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Road cells in row-major order.
    pub fn iter_roads(&self) -> impl Iterator<Item = GridPoint> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, road)| **road)
            .map(move |(i, _)| GridPoint::new(i / self.width, i % self.width))
    }

    pub fn first_road(&self) -> Option<GridPoint> {
        self.iter_roads().next()
    }

    /// Plain-text dump, one line per row: `X` for road, `O` for empty.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.length * (self.width + 1));
        for row in 0..self.length {
            for col in 0..self.width {
                out.push(if self.is_road(GridPoint::new(row, col)) {
                    'X'
                } else {
                    'O'
                });
            }
            out.push('\n');
        }
        out
    }

    pub fn write_dump(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.to_text())
    }
}

/// Spatial hash grid bucketing items by world cell.
#[derive(Clone, Debug, Default)]
pub struct SpatialGrid<T> {
    pub cell_size: f32,
    pub cells: HashMap<(i32, i32), Vec<T>>,
}

impl<T: Copy + Ord> SpatialGrid<T> {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    /// Convert world position to cell coordinates.
    pub fn to_cell(&self, pos: Vec2) -> (i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    /// Insert an item at a position.
    pub fn insert(&mut self, item: T, pos: Vec2) {
        let cell = self.to_cell(pos);
        self.cells.entry(cell).or_default().push(item);
    }

    /// Insert an item into every cell overlapped by a rectangle.
    pub fn insert_rect(&mut self, item: T, min: Vec2, max: Vec2) {
        let (lo, hi) = (self.to_cell(min.min(max)), self.to_cell(min.max(max)));
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                self.cells.entry((cx, cy)).or_default().push(item);
            }
        }
    }

    /// Items in cells overlapping a rectangle, sorted and deduplicated.
    pub fn query_rect(&self, min: Vec2, max: Vec2) -> Vec<T> {
        let (lo, hi) = (self.to_cell(min.min(max)), self.to_cell(min.max(max)));

        let mut result = Vec::new();
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                if let Some(items) = self.cells.get(&(cx, cy)) {
                    result.extend(items);
                }
            }
        }

        result.sort_unstable();
        result.dedup();
        result
    }

    /// Query items in a radius (cell granularity).
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<T> {
        self.query_rect(center - Vec2::splat(radius), center + Vec2::splat(radius))
    }
}
