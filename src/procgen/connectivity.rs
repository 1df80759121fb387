//! Island detection and repair so the road mask forms one connected skeleton.

use bevy::prelude::*;

use crate::world::grid::{GridPoint, RoadMask, WALK_ORDER};

/// Summary of a connectivity repair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub initial_islands: usize,
    pub rounds: usize,
    pub paths_carved: usize,
    pub cells_carved: usize,
}

/// Maximal eight-connected groups of road cells. Islands are ordered by
/// their first row-major cell, which is also each island's first entry.
pub fn find_islands(mask: &RoadMask) -> Vec<Vec<GridPoint>> {
    let mut seen = vec![false; mask.length * mask.width];
    let mut islands = Vec::new();
    let mut stack = Vec::new();

    for start in mask.iter_roads() {
        if seen[start.row * mask.width + start.col] {
            continue;
        }

        let mut island = Vec::new();
        seen[start.row * mask.width + start.col] = true;
        stack.push(start);

        while let Some(p) = stack.pop() {
            island.push(p);
            for q in mask.neighbors8(p) {
                let i = q.row * mask.width + q.col;
                if mask.is_road(q) && !seen[i] {
                    seen[i] = true;
                    stack.push(q);
                }
            }
        }

        islands.push(island);
    }

    islands
}

/// Grid shortest-path search over explicit cost/closed/link tables.
///
/// Tables are sized once for the grid and reset at the start of every
/// query. The open set is scanned linearly for the lowest estimated cost
/// instead of being kept in a priority queue.
pub struct PathSearch {
    length: usize,
    width: usize,
    cost: Vec<u32>,
    open: Vec<bool>,
    closed: Vec<bool>,
    link: Vec<Option<usize>>,
}

impl PathSearch {
    pub fn new(length: usize, width: usize) -> Self {
        let n = length * width;
        Self {
            length,
            width,
            cost: vec![u32::MAX; n],
            open: vec![false; n],
            closed: vec![false; n],
            link: vec![None; n],
        }
    }

    fn reset(&mut self) {
        self.cost.fill(u32::MAX);
        self.open.fill(false);
        self.closed.fill(false);
        self.link.fill(None);
    }

    fn point(&self, i: usize) -> GridPoint {
        GridPoint::new(i / self.width, i % self.width)
    }

    /// Shortest eight-directional path from `start` to `end`, both included.
    ///
    /// Every cell is walkable. The search stays inside the bounding window
    /// of the two endpoints, which always contains a shortest path.
    pub fn find_path(&mut self, start: GridPoint, end: GridPoint) -> Option<Vec<GridPoint>> {
        if start.row >= self.length
            || end.row >= self.length
            || start.col >= self.width
            || end.col >= self.width
        {
            return None;
        }

        self.reset();

        let rows = start.row.min(end.row)..=start.row.max(end.row);
        let cols = start.col.min(end.col)..=start.col.max(end.col);

        let s = start.row * self.width + start.col;
        let goal = end.row * self.width + end.col;
        self.cost[s] = 0;
        self.open[s] = true;

        loop {
            // Lowest cost + Manhattan estimate; row-major order breaks ties.
            let mut best: Option<(usize, u32)> = None;
            for row in rows.clone() {
                for col in cols.clone() {
                    let i = row * self.width + col;
                    if !self.open[i] {
                        continue;
                    }
                    let f = self.cost[i] + self.point(i).manhattan(end);
                    if best.map_or(true, |(_, bf)| f < bf) {
                        best = Some((i, f));
                    }
                }
            }

            let (current, _) = best?;
            if current == goal {
                break;
            }

            self.open[current] = false;
            self.closed[current] = true;

            let p = self.point(current);
            for (dr, dc) in WALK_ORDER {
                let row = p.row as i64 + dr;
                let col = p.col as i64 + dc;
                if row < 0 || col < 0 {
                    continue;
                }
                let (row, col) = (row as usize, col as usize);
                if !rows.contains(&row) || !cols.contains(&col) {
                    continue;
                }

                let next = row * self.width + col;
                if self.closed[next] {
                    continue;
                }
                let cost = self.cost[current] + 1;
                if cost < self.cost[next] {
                    self.cost[next] = cost;
                    self.link[next] = Some(current);
                    self.open[next] = true;
                }
            }
        }

        let mut path = vec![end];
        let mut cursor = goal;
        while let Some(prev) = self.link[cursor] {
            path.push(self.point(prev));
            cursor = prev;
        }
        path.reverse();
        Some(path)
    }
}

fn nearest_in(island: &[GridPoint], to: GridPoint) -> GridPoint {
    let mut best = island[0];
    for &p in &island[1..] {
        if p.distance_squared(to) < best.distance_squared(to) {
            best = p;
        }
    }
    best
}

/// Carve paths between islands until the mask is a single island.
pub fn resolve_connectivity(mask: &mut RoadMask) -> ConnectivityReport {
    let mut report = ConnectivityReport::default();
    let mut search = PathSearch::new(mask.length, mask.width);
    let mut islands = find_islands(mask);
    report.initial_islands = islands.len();

    while islands.len() > 1 {
        report.rounds += 1;
        let mut connected = vec![false; islands.len()];

        for i in 0..islands.len() {
            if connected[i] {
                continue;
            }

            let anchor = islands[i][0];
            let mut target: Option<(usize, GridPoint)> = None;
            for (k, other) in islands.iter().enumerate() {
                if k == i {
                    continue;
                }
                let p = nearest_in(other, anchor);
                if target.map_or(true, |(_, t)| p.distance_squared(anchor) < t.distance_squared(anchor)) {
                    target = Some((k, p));
                }
            }

            let Some((k, to)) = target else {
                continue;
            };
            let from = nearest_in(&islands[i], to);

            if let Some(path) = search.find_path(from, to) {
                for &cell in &path {
                    if !mask.is_road(cell) {
                        mask.set(cell, true);
                        report.cells_carved += 1;
                    }
                }
                report.paths_carved += 1;
                debug!(
                    "Carved {} cells from ({}, {}) to ({}, {})",
                    path.len(),
                    from.row,
                    from.col,
                    to.row,
                    to.col
                );
            }

            connected[i] = true;
            connected[k] = true;
        }

        islands = find_islands(mask);
    }

    info!(
        "Connectivity resolved: {} islands merged with {} paths over {} rounds",
        report.initial_islands, report.paths_carved, report.rounds
    );

    report
}
