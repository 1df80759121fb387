use bevy::prelude::*;

/// Signed shoelace area: positive for counter-clockwise vertices.
pub fn signed_area(vertices: &[Vec2]) -> f32 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += vertices[i].x * vertices[j].y;
        area -= vertices[j].x * vertices[i].y;
    }

    area / 2.0
}

pub fn polygon_area(vertices: &[Vec2]) -> f32 {
    signed_area(vertices).abs()
}

/// Compute axis-aligned bounding box of a polygon.
pub fn polygon_bounds(vertices: &[Vec2]) -> (Vec2, Vec2) {
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);

    for &v in vertices {
        min = min.min(v);
        max = max.max(v);
    }

    (min, max)
}

/// Intersection of segments `p1-p2` and `q1-q2`.
///
/// Returns the point and the parameters along each segment. Both parameters
/// are constrained to `[0, 1]`; parallel segments never intersect.
pub fn segment_intersection(p1: Vec2, p2: Vec2, q1: Vec2, q2: Vec2) -> Option<(Vec2, f32, f32)> {
    let r = p2 - p1;
    let s = q2 - q1;
    let denom = r.perp_dot(s);
    if denom.abs() < 1e-9 {
        return None;
    }

    let qp = q1 - p1;
    let t = qp.perp_dot(s) / denom;
    let u = qp.perp_dot(r) / denom;

    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then(|| (p1 + r * t, t, u))
}

/// First pair of non-adjacent edges that cross each other, by start index.
///
/// Only proper crossings count: edges that merely touch at an end, or run
/// parallel, are ignored.
pub fn self_crossing(vertices: &[Vec2]) -> Option<(usize, usize)> {
    const EDGE_EPSILON: f32 = 1e-4;

    let n = vertices.len();
    if n < 4 {
        return None;
    }

    for i in 0..n {
        let (a1, a2) = (vertices[i], vertices[(i + 1) % n]);
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (b1, b2) = (vertices[j], vertices[(j + 1) % n]);
            let Some((_, t, u)) = segment_intersection(a1, a2, b1, b2) else {
                continue;
            };
            let inside = EDGE_EPSILON..=1.0 - EDGE_EPSILON;
            if inside.contains(&t) && inside.contains(&u) {
                return Some((i, j));
            }
        }
    }

    None
}

/// Closest distance from `p` to segment `a-b`.
pub fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 < 1e-12 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}
