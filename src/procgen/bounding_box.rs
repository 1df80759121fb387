//! Minimum-area bounding rectangles for parcel polygons.
//!
//! Convex polygons get an exact oriented box from rotating calipers; anything
//! else falls back to the axis-aligned box.

use bevy::prelude::*;

use super::lot_geometry::{polygon_bounds, signed_area};

const EPSILON: f32 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxKind {
    /// Minimum-area box from rotating calipers.
    Obb,
    /// Axis-aligned fallback for non-convex input.
    Aabb,
}

#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub centre: Vec2,
    /// Orthonormal box axes.
    pub axes: [Vec2; 2],
    /// Half-sizes along each axis.
    pub extents: [f32; 2],
    pub area: f32,
    pub kind: BoxKind,
}

impl BoundingBox {
    pub fn axis_aligned(points: &[Vec2]) -> Self {
        if points.is_empty() {
            return Self {
                centre: Vec2::ZERO,
                axes: [Vec2::X, Vec2::Y],
                extents: [0.0, 0.0],
                area: 0.0,
                kind: BoxKind::Aabb,
            };
        }

        let (min, max) = polygon_bounds(points);
        let size = max - min;
        Self {
            centre: (min + max) * 0.5,
            axes: [Vec2::X, Vec2::Y],
            extents: [size.x * 0.5, size.y * 0.5],
            area: size.x * size.y,
            kind: BoxKind::Aabb,
        }
    }

    /// Corners in order around the box.
    pub fn corners(&self) -> [Vec2; 4] {
        let a = self.axes[0] * self.extents[0];
        let b = self.axes[1] * self.extents[1];
        [
            self.centre - a - b,
            self.centre + a - b,
            self.centre + a + b,
            self.centre - a + b,
        ]
    }

    /// Index of the shorter axis.
    pub fn minor_axis(&self) -> usize {
        if self.extents[0] > self.extents[1] {
            1
        } else {
            0
        }
    }
}

/// Convex iff every non-degenerate vertex turn has the same sign.
pub fn is_convex(polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut sign = 0.0f32;
    for i in 0..n {
        let prev = polygon[(i + n - 1) % n];
        let cur = polygon[i];
        let next = polygon[(i + 1) % n];
        let (e1, e2) = (cur - prev, next - cur);
        let cross = e1.perp_dot(e2);
        if cross.abs() <= EPSILON * e1.length() * e2.length() {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }

    true
}

/// Drop repeated and collinear vertices and orient counter-clockwise.
fn clean_hull(polygon: &[Vec2]) -> Vec<Vec2> {
    let mut pts: Vec<Vec2> = Vec::with_capacity(polygon.len());
    for &p in polygon {
        if pts.last().map_or(true, |&q: &Vec2| q.distance(p) > EPSILON) {
            pts.push(p);
        }
    }
    while pts.len() > 1 && pts[0].distance(pts[pts.len() - 1]) <= EPSILON {
        pts.pop();
    }

    loop {
        let n = pts.len();
        if n < 3 {
            break;
        }
        let collinear = (0..n).find(|&i| {
            let e1 = pts[i] - pts[(i + n - 1) % n];
            let e2 = pts[(i + 1) % n] - pts[i];
            e1.perp_dot(e2).abs() <= EPSILON * e1.length() * e2.length()
        });
        match collinear {
            Some(i) => {
                pts.remove(i);
            }
            None => break,
        }
    }

    if signed_area(&pts) < 0.0 {
        pts.reverse();
    }
    pts
}

/// Minimum-area bounding box.
pub fn minimum_bounding_box(polygon: &[Vec2]) -> BoundingBox {
    if !is_convex(polygon) {
        return BoundingBox::axis_aligned(polygon);
    }

    let hull = clean_hull(polygon);
    if hull.len() < 3 {
        return BoundingBox::axis_aligned(polygon);
    }

    rotating_calipers(&hull)
}

/// Calipers over a counter-clockwise convex hull without collinear points.
///
/// Each hull edge in turn is the box base. Three pointers track the vertex
/// furthest along the edge, furthest from it, and furthest back; each only
/// ever advances, so the sweep is linear.
fn rotating_calipers(hull: &[Vec2]) -> BoundingBox {
    let n = hull.len();
    let proj = |k: usize, origin: Vec2, dir: Vec2| (hull[k % n] - origin).dot(dir);

    let base = hull[0];
    let u0 = (hull[1] - hull[0]).normalize_or_zero();
    let v0 = u0.perp();
    let argbest = |dir: Vec2, better: fn(f32, f32) -> bool| {
        (1..n).fold(0, |best, k| {
            if better(proj(k, base, dir), proj(best, base, dir)) {
                k
            } else {
                best
            }
        })
    };
    let mut right = argbest(u0, |a, b| a > b);
    let mut top = argbest(v0, |a, b| a > b);
    let mut left = argbest(u0, |a, b| a < b);

    let mut best: Option<BoundingBox> = None;

    for i in 0..n {
        let origin = hull[i];
        let u = (hull[(i + 1) % n] - origin).normalize_or_zero();
        if u == Vec2::ZERO {
            continue;
        }
        let v = u.perp();

        for _ in 0..n {
            if proj(right + 1, origin, u) > proj(right, origin, u) {
                right = (right + 1) % n;
            } else {
                break;
            }
        }
        for _ in 0..n {
            if proj(top + 1, origin, v) > proj(top, origin, v) {
                top = (top + 1) % n;
            } else {
                break;
            }
        }
        for _ in 0..n {
            if proj(left + 1, origin, u) < proj(left, origin, u) {
                left = (left + 1) % n;
            } else {
                break;
            }
        }

        let (min_u, max_u) = (proj(left, origin, u), proj(right, origin, u));
        let max_v = proj(top, origin, v);
        let area = (max_u - min_u) * max_v;

        if best.map_or(true, |b| area < b.area - EPSILON) {
            best = Some(BoundingBox {
                centre: origin + u * ((min_u + max_u) * 0.5) + v * (max_v * 0.5),
                axes: [u, v],
                extents: [(max_u - min_u) * 0.5, max_v * 0.5],
                area,
                kind: BoxKind::Obb,
            });
        }
    }

    best.unwrap_or_else(|| BoundingBox::axis_aligned(hull))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Reference: every edge as axis, every vertex projected.
    fn brute_force_area(polygon: &[Vec2]) -> f32 {
        let n = polygon.len();
        let mut best = f32::MAX;
        for i in 0..n {
            let u = (polygon[(i + 1) % n] - polygon[i]).normalize_or_zero();
            if u == Vec2::ZERO {
                continue;
            }
            let v = u.perp();
            let (mut lo_u, mut hi_u, mut lo_v, mut hi_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
            for &p in polygon {
                lo_u = lo_u.min(p.dot(u));
                hi_u = hi_u.max(p.dot(u));
                lo_v = lo_v.min(p.dot(v));
                hi_v = hi_v.max(p.dot(v));
            }
            best = best.min((hi_u - lo_u) * (hi_v - lo_v));
        }
        best
    }

    fn random_convex(rng: &mut StdRng) -> Vec<Vec2> {
        let count = rng.gen_range(3..12);
        let mut angles: Vec<f32> = (0..count)
            .map(|_| rng.gen_range(0.0..std::f32::consts::TAU))
            .collect();
        angles.sort_by(|a, b| a.total_cmp(b));
        angles.dedup_by(|a, b| (*a - *b).abs() < 0.05);
        let centre = Vec2::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
        let (rx, ry) = (rng.gen_range(5.0..40.0), rng.gen_range(5.0..40.0));
        angles
            .into_iter()
            .map(|a| centre + Vec2::new(a.cos() * rx, a.sin() * ry))
            .collect()
    }

    #[test]
    fn square_of_side_ten() {
        let square = [
            Vec2::new(-5.0, -5.0),
            Vec2::new(5.0, -5.0),
            Vec2::new(5.0, 5.0),
            Vec2::new(-5.0, 5.0),
        ];
        let bb = minimum_bounding_box(&square);

        assert_eq!(bb.kind, BoxKind::Obb);
        assert!((bb.area - 100.0).abs() < 1e-3);
        assert!((bb.extents[0] - 5.0).abs() < 1e-4 && (bb.extents[1] - 5.0).abs() < 1e-4);
        assert!(bb.centre.length() < 1e-4);
        for axis in bb.axes {
            assert!(axis.x.abs() < 1e-5 || axis.y.abs() < 1e-5);
        }
    }

    #[test]
    fn rotated_rectangle_is_tight() {
        let (u, v) = (Vec2::new(3.0, 4.0) / 5.0, Vec2::new(-4.0, 3.0) / 5.0);
        let rect = [Vec2::ZERO, u * 20.0, u * 20.0 + v * 6.0, v * 6.0];
        let bb = minimum_bounding_box(&rect);

        assert!((bb.area - 120.0).abs() < 1e-2);
        assert!(bb.area < BoundingBox::axis_aligned(&rect).area);
        let corners = bb.corners();
        for c in rect {
            assert!(corners.iter().any(|k| k.distance(c) < 1e-3));
        }
    }

    #[test]
    fn calipers_match_brute_force_on_random_convex_polygons() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let polygon = random_convex(&mut rng);
            if polygon.len() < 3 || !is_convex(&polygon) {
                continue;
            }
            let bb = minimum_bounding_box(&polygon);
            let reference = brute_force_area(&polygon);
            let aabb = BoundingBox::axis_aligned(&polygon).area;

            assert!((bb.area - reference).abs() <= 1e-3 * reference.max(1.0));
            assert!(bb.area <= aabb + 1e-3 * aabb.max(1.0));
        }
    }

    #[test]
    fn non_convex_falls_back_to_axis_aligned() {
        let l_shape = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 4.0),
            Vec2::new(4.0, 4.0),
            Vec2::new(4.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        assert!(!is_convex(&l_shape));
        let bb = minimum_bounding_box(&l_shape);
        assert_eq!(bb.kind, BoxKind::Aabb);
        assert!((bb.area - 100.0).abs() < 1e-4);
        assert!((bb.centre - Vec2::new(5.0, 5.0)).length() < 1e-5);
    }

    #[test]
    fn collinear_vertices_do_not_break_convexity() {
        let strip = [
            Vec2::new(20.0, 24.0),
            Vec2::new(20.0, 96.0),
            Vec2::new(30.0, 96.0),
            Vec2::new(40.0, 96.0),
            Vec2::new(40.0, 24.0),
            Vec2::new(30.0, 24.0),
        ];
        assert!(is_convex(&strip));
        let bb = minimum_bounding_box(&strip);
        assert_eq!(bb.kind, BoxKind::Obb);
        assert!((bb.area - 1440.0).abs() < 1e-2);
        let mut extents = bb.extents;
        extents.sort_by(|a, b| a.total_cmp(b));
        assert!((extents[0] - 10.0).abs() < 1e-3 && (extents[1] - 36.0).abs() < 1e-3);
    }
}
