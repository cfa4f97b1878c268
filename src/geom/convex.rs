//! Hemisphericality, convexity and convex hulls of point sets on the sphere.
//!
//! Hemisphericality is decided by looking for a plane normal `n` with
//! `n . p > 0` for every point `p`. Fixing one component of `n` turns this
//! into a 2-D linear feasibility problem, solved with Megiddo's prune and
//! search in linear expected time.

use crate::error::{ConvexityFailure, GeometryError};
use crate::geom::sphere::{
    CROSS_N2MIN, SIN_MIN, Vec3, centroid, cross, dot, normalize, scale, sub,
};
use crate::region::SphericalConvexPolygon;

/// Orientation of a convex vertex list as seen from outside the sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    CounterClockwise,
    Clockwise,
}

// ---------------------------------------------------------------------------
// 2-D feasibility
// ---------------------------------------------------------------------------

/// The line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy)]
struct Line {
    slope: f64,
    intercept: f64,
}

impl Line {
    fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Which side of its lines the feasible region lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// `y > line`: the feasible region is above the max of these lines.
    Below,
    /// `y < line`: the feasible region is under the min of these lines.
    Above,
}

/// Of two lines crossing at `x`, the one that binds to the right of `x`.
fn binding_right(side: Side, a: Line, b: Line) -> Line {
    let a_steeper = a.slope > b.slope;
    match side {
        Side::Below if a_steeper => a,
        Side::Below => b,
        Side::Above if a_steeper => b,
        Side::Above => a,
    }
}

/// Of two lines crossing at `x`, the one that binds to the left of `x`.
fn binding_left(side: Side, a: Line, b: Line) -> Line {
    let right = binding_right(side, a, b);
    if right.slope == a.slope && right.intercept == a.intercept {
        b
    } else {
        a
    }
}

/// Pair up lines. Pairs whose crossing is outside `(lo, hi)` (or that are
/// parallel) lose their non-binding member right away; the rest are
/// returned together with their crossing abscissa.
fn pair_lines(
    side: Side,
    lines: &[Line],
    lo: f64,
    hi: f64,
    kept: &mut Vec<Line>,
    pending: &mut Vec<(Line, Line, f64)>,
) {
    for pair in lines.chunks(2) {
        let [a, b] = match pair {
            [a, b] => [*a, *b],
            [a] => {
                kept.push(*a);
                continue;
            }
            _ => continue,
        };
        if a.slope == b.slope {
            let higher = a.intercept > b.intercept;
            kept.push(match (side, higher) {
                (Side::Below, true) | (Side::Above, false) => a,
                _ => b,
            });
            continue;
        }
        let x = (b.intercept - a.intercept) / (a.slope - b.slope);
        if x <= lo {
            kept.push(binding_right(side, a, b));
        } else if x >= hi {
            kept.push(binding_left(side, a, b));
        } else {
            pending.push((a, b, x));
        }
    }
}

/// Resolve a pending pair against the narrowed interval.
fn resolve_pair(side: Side, pair: (Line, Line, f64), lo: f64, hi: f64, kept: &mut Vec<Line>) {
    let (a, b, x) = pair;
    if x <= lo {
        kept.push(binding_right(side, a, b));
    } else if x >= hi {
        kept.push(binding_left(side, a, b));
    } else {
        kept.push(a);
        kept.push(b);
    }
}

/// Envelope value at `x` and the slope range of the lines attaining it.
fn envelope(side: Side, lines: &[Line], x: f64) -> (f64, f64, f64) {
    let mut best = match side {
        Side::Below => f64::NEG_INFINITY,
        Side::Above => f64::INFINITY,
    };
    for l in lines {
        let y = l.at(x);
        best = match side {
            Side::Below => best.max(y),
            Side::Above => best.min(y),
        };
    }
    let tol = 1e-12 * (1.0 + best.abs());
    let mut smin = f64::INFINITY;
    let mut smax = f64::NEG_INFINITY;
    for l in lines {
        if (l.at(x) - best).abs() <= tol {
            smin = smin.min(l.slope);
            smax = smax.max(l.slope);
        }
    }
    (best, smin, smax)
}

/// Feasibility of the final one lower / one upper line problem on `(lo, hi)`.
fn two_line_feasible(lower: Line, upper: Line, lo: f64, hi: f64) -> bool {
    // g(x) = lower(x) - upper(x) must be negative somewhere in (lo, hi)
    let slope = lower.slope - upper.slope;
    let intercept = lower.intercept - upper.intercept;
    if slope > 0.0 {
        lo == f64::NEG_INFINITY || slope * lo + intercept < 0.0
    } else if slope < 0.0 {
        hi == f64::INFINITY || slope * hi + intercept < 0.0
    } else {
        intercept < 0.0
    }
}

/// Is there `(x, y)` with `a*x + b*y + c > 0` for every `(a, b, c)`?
fn feasible_2d(constraints: impl Iterator<Item = (f64, f64, f64)>) -> bool {
    let mut below = Vec::new();
    let mut above = Vec::new();
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;
    for (a, b, c) in constraints {
        if b > 0.0 {
            below.push(Line { slope: -a / b, intercept: -c / b });
        } else if b < 0.0 {
            above.push(Line { slope: -a / b, intercept: -c / b });
        } else if a > 0.0 {
            lo = lo.max(-c / a);
        } else if a < 0.0 {
            hi = hi.min(-c / a);
        } else if c <= 0.0 {
            return false;
        }
    }
    if lo >= hi {
        return false;
    }

    loop {
        if below.is_empty() || above.is_empty() {
            return true;
        }
        if below.len() == 1 && above.len() == 1 {
            return two_line_feasible(below[0], above[0], lo, hi);
        }

        let mut next_below = Vec::with_capacity(below.len());
        let mut next_above = Vec::with_capacity(above.len());
        let mut pending_below = Vec::new();
        let mut pending_above = Vec::new();
        pair_lines(Side::Below, &below, lo, hi, &mut next_below, &mut pending_below);
        pair_lines(Side::Above, &above, lo, hi, &mut next_above, &mut pending_above);

        if pending_below.is_empty() && pending_above.is_empty() {
            below = next_below;
            above = next_above;
            continue;
        }

        let mut xs: Vec<f64> = pending_below
            .iter()
            .chain(pending_above.iter())
            .map(|p| p.2)
            .collect();
        let mid = xs.len() / 2;
        let (_, &mut xm, _) = xs.select_nth_unstable_by(mid, f64::total_cmp);

        let all_below: Vec<Line> = next_below
            .iter()
            .copied()
            .chain(pending_below.iter().flat_map(|p| [p.0, p.1]))
            .collect();
        let all_above: Vec<Line> = next_above
            .iter()
            .copied()
            .chain(pending_above.iter().flat_map(|p| [p.0, p.1]))
            .collect();
        let (ymax, below_smin, below_smax) = envelope(Side::Below, &all_below, xm);
        let (ymin, above_smin, above_smax) = envelope(Side::Above, &all_above, xm);
        if ymax < ymin {
            return true;
        }
        // g = max(below) - min(above) is convex; step toward its minimum
        if below_smax - above_smin < 0.0 {
            lo = xm;
        } else if below_smin - above_smax > 0.0 {
            hi = xm;
        } else {
            return false;
        }

        for pair in pending_below {
            resolve_pair(Side::Below, pair, lo, hi, &mut next_below);
        }
        for pair in pending_above {
            resolve_pair(Side::Above, pair, lo, hi, &mut next_above);
        }
        below = next_below;
        above = next_above;
    }
}

/// Is there `x` with `a*x + c > 0` for every `(a, c)`?
fn feasible_1d(constraints: impl Iterator<Item = (f64, f64)>) -> bool {
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;
    for (a, c) in constraints {
        if a > 0.0 {
            lo = lo.max(-c / a);
        } else if a < 0.0 {
            hi = hi.min(-c / a);
        } else if c <= 0.0 {
            return false;
        }
    }
    lo < hi
}

// ---------------------------------------------------------------------------
// Public predicates
// ---------------------------------------------------------------------------

/// True if some plane through the origin has every point strictly on one
/// side of it.
pub fn hemispherical(points: &[Vec3]) -> bool {
    // n = (x, y, +-1)
    for z in [1.0, -1.0] {
        if feasible_2d(points.iter().map(|p| (p[0], p[1], p[2] * z))) {
            return true;
        }
    }
    // n = (x, +-1, 0)
    for y in [1.0, -1.0] {
        if feasible_1d(points.iter().map(|p| (p[0], p[1] * y))) {
            return true;
        }
    }
    // n = (+-1, 0, 0)
    points.iter().all(|p| p[0] > 0.0) || points.iter().all(|p| p[0] < 0.0)
}

/// Check that `vertices` form a convex polygon, returning its winding.
///
/// The vertex list must be hemispherical, free of near-duplicate and
/// near-antipodal consecutive pairs, turn the same way at every vertex, and
/// wind around the vertex centroid exactly once.
pub fn convex(vertices: &[Vec3]) -> Result<Winding, ConvexityFailure> {
    let n = vertices.len();
    if n < 3 {
        return Err(ConvexityFailure::TooFewVertices);
    }
    if !hemispherical(vertices) {
        return Err(ConvexityFailure::NotHemispherical);
    }
    let center = centroid(vertices).map_err(|_| ConvexityFailure::NotHemispherical)?;

    let mut ccw = false;
    let mut cw = false;
    let mut winding = 0.0;
    let mut p1 = cross(center, vertices[n - 1]);
    if dot(p1, p1) < CROSS_N2MIN {
        return Err(ConvexityFailure::CentroidNearVertex);
    }

    for i in 0..n {
        let beg = vertices[(i + n - 2) % n];
        let mid = vertices[(i + n - 1) % n];
        let end = vertices[i];

        let plane = cross(mid, end);
        let n2 = dot(plane, plane);
        if n2 < CROSS_N2MIN {
            return Err(ConvexityFailure::NearDuplicateVertices);
        }
        let d = dot(scale(plane, 1.0 / n2.sqrt()), beg);
        if d > SIN_MIN {
            if cw {
                return Err(ConvexityFailure::InconsistentWinding);
            }
            ccw = true;
        } else if d < -SIN_MIN {
            if ccw {
                return Err(ConvexityFailure::InconsistentWinding);
            }
            cw = true;
        }

        let p2 = cross(center, end);
        if dot(p2, p2) < CROSS_N2MIN {
            return Err(ConvexityFailure::CentroidNearVertex);
        }
        winding += dot(cross(p1, p2), center).atan2(dot(p1, p2));
        p1 = p2;
    }

    if !ccw && !cw {
        return Err(ConvexityFailure::Coplanar);
    }
    let turns = winding / std::f64::consts::TAU;
    if turns.round().abs() != 1.0 {
        return Err(ConvexityFailure::MultipleWindings);
    }
    if (turns > 0.0) != ccw {
        return Err(ConvexityFailure::InconsistentWinding);
    }
    Ok(if ccw {
        Winding::CounterClockwise
    } else {
        Winding::Clockwise
    })
}

/// True if `p` lies strictly left of the great circle through `a` then `b`.
fn left_turn(a: Vec3, b: Vec3, p: Vec3) -> bool {
    let plane = cross(a, b);
    let n2 = dot(plane, plane);
    n2 >= CROSS_N2MIN && dot(plane, p) > SIN_MIN * n2.sqrt()
}

/// Convex hull of a hemispherical point set.
///
/// Returns `Ok(None)` when fewer than 3 hull vertices remain after
/// near-duplicates and collinear points are dropped, and
/// `Err(NotHemispherical)` when the points span more than a hemisphere.
pub fn convex_hull(points: &[Vec3]) -> Result<Option<SphericalConvexPolygon>, GeometryError> {
    if points.len() < 3 {
        return Ok(None);
    }
    if !hemispherical(points) {
        return Err(GeometryError::NotHemispherical);
    }
    let center = centroid(points)?;

    // anchor: the point farthest from the centroid
    let (anchor_idx, anchor) = points
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| dot(a.1, center).total_cmp(&dot(b.1, center)))
        .ok_or(GeometryError::NotHemispherical)?;

    let e1 = sub(anchor, scale(center, dot(anchor, center)));
    if dot(e1, e1) < CROSS_N2MIN {
        return Ok(None);
    }
    let e1 = normalize(e1)?;
    let e2 = cross(center, e1);

    // (angle about the centroid, closeness to the centroid, point)
    let mut ranked: Vec<(f64, f64, Vec3)> = Vec::with_capacity(points.len());
    for (i, &p) in points.iter().enumerate() {
        if i == anchor_idx {
            continue;
        }
        let w = sub(p, scale(center, dot(p, center)));
        if dot(w, w) < CROSS_N2MIN {
            continue;
        }
        let mut angle = dot(p, e2).atan2(dot(p, e1));
        if angle < 0.0 {
            angle += std::f64::consts::TAU;
        }
        // on the anchor's own ray: between the anchor and the centroid
        if angle < SIN_MIN || angle > std::f64::consts::TAU - SIN_MIN {
            continue;
        }
        ranked.push((angle, dot(p, center), p));
    }
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    // equal angles: keep only the farthest
    ranked.dedup_by(|later, earlier| later.0 - earlier.0 < SIN_MIN);

    let mut hull: Vec<Vec3> = vec![anchor];
    for &(_, _, p) in &ranked {
        while hull.len() >= 2 && !left_turn(hull[hull.len() - 2], hull[hull.len() - 1], p) {
            hull.pop();
        }
        if let Some(&last) = hull.last() {
            let c = cross(last, p);
            if dot(c, c) < CROSS_N2MIN {
                continue;
            }
        }
        hull.push(p);
    }
    while hull.len() >= 3 && !left_turn(hull[hull.len() - 2], hull[hull.len() - 1], anchor) {
        hull.pop();
    }
    if hull.len() < 3 {
        return Ok(None);
    }
    Ok(Some(SphericalConvexPolygon::from_ccw_vertices(hull)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::sphere::{cartesian_unit_vector, neg};

    fn v(theta: f64, phi: f64) -> Vec3 {
        cartesian_unit_vector(theta, phi)
    }

    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 as f64) / (u64::MAX as f64)
        }
    }

    #[test]
    fn hemispherical_basic_cases() {
        assert!(hemispherical(&[v(0.0, 0.0), v(90.0, 0.0), v(45.0, 45.0)]));
        // the six axis directions span the whole sphere
        let axes = [
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ];
        assert!(!hemispherical(&axes));
        // a point and its antipode
        let p = v(10.0, 20.0);
        assert!(!hemispherical(&[p, neg(p)]));
        // a single point
        assert!(hemispherical(&[p]));
    }

    #[test]
    fn hemispherical_equatorial_points() {
        // all on the equator, spread over less than 180 degrees
        let pts: Vec<Vec3> = (0..10).map(|i| v(i as f64 * 17.0, 0.0)).collect();
        assert!(hemispherical(&pts));
        // spread all the way around the equator: the only separating planes
        // would have to contain the points
        let ring: Vec<Vec3> = (0..12).map(|i| v(i as f64 * 30.0, 0.0)).collect();
        assert!(!hemispherical(&ring));
    }

    #[test]
    fn hemispherical_random_caps() {
        let mut rng = Rng(0xdead_beef_cafe_f00d);
        for _ in 0..50 {
            let center = v(rng.next() * 360.0, rng.next() * 180.0 - 90.0);
            // points within 80 degrees of the center are hemispherical
            let mut pts = Vec::new();
            while pts.len() < 40 {
                let p = v(rng.next() * 360.0, (rng.next() * 2.0 - 1.0).asin().to_degrees());
                if dot(p, center) > 10f64.to_radians().sin() {
                    pts.push(p);
                }
            }
            assert!(hemispherical(&pts));
            pts.push(neg(center));
            assert!(!hemispherical(&pts));
        }
    }

    #[test]
    fn convex_detects_winding() {
        let ccw = [v(0.0, 0.0), v(10.0, 0.0), v(5.0, 8.0)];
        assert_eq!(convex(&ccw), Ok(Winding::CounterClockwise));
        let cw = [v(0.0, 0.0), v(5.0, 8.0), v(10.0, 0.0)];
        assert_eq!(convex(&cw), Ok(Winding::Clockwise));
    }

    #[test]
    fn convex_rejections() {
        assert_eq!(
            convex(&[v(0.0, 0.0), v(1.0, 0.0)]),
            Err(ConvexityFailure::TooFewVertices)
        );
        // a dart (non-convex quadrilateral)
        let dart = [v(0.0, 0.0), v(10.0, 5.0), v(0.0, 10.0), v(3.0, 5.0)];
        assert_eq!(convex(&dart), Err(ConvexityFailure::InconsistentWinding));
        // repeated vertex
        let dup = [v(0.0, 0.0), v(0.0, 0.0), v(10.0, 0.0), v(5.0, 5.0)];
        assert_eq!(convex(&dup), Err(ConvexityFailure::NearDuplicateVertices));
        // a pentagram winds twice
        let star: Vec<Vec3> = (0..5).map(|i| v(i as f64 * 144.0, 60.0)).collect();
        assert_eq!(convex(&star), Err(ConvexityFailure::MultipleWindings));
        // points on a single great circle
        let line = [v(0.0, 0.0), v(10.0, 0.0), v(20.0, 0.0)];
        assert!(convex(&line).is_err());
    }

    #[test]
    fn hull_of_square_with_interior_points() {
        let corners = [v(0.0, 0.0), v(10.0, 0.0), v(10.0, 10.0), v(0.0, 10.0)];
        let mut pts = corners.to_vec();
        pts.push(v(5.0, 5.0));
        pts.push(v(2.0, 7.0));
        pts.push(v(8.0, 3.0));
        // a point in the middle of the bottom edge is not a vertex
        pts.push(v(5.0, 0.0));
        let hull = convex_hull(&pts).unwrap().unwrap();
        assert_eq!(hull.vertices().len(), 4);
        for c in corners {
            assert!(hull.vertices().iter().any(|h| dot(*h, c) > 1.0 - 1e-12));
        }
        assert_eq!(convex(hull.vertices()), Ok(Winding::CounterClockwise));
    }

    #[test]
    fn hull_degenerate_inputs() {
        assert!(convex_hull(&[v(0.0, 0.0), v(1.0, 1.0)]).unwrap().is_none());
        let same = [v(3.0, 3.0); 5];
        assert!(convex_hull(&same).unwrap().is_none());
        let axes = [
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
        ];
        assert_eq!(convex_hull(&axes), Err(GeometryError::NotHemispherical));
    }

    #[test]
    fn hull_contains_random_points() {
        let mut rng = Rng(42);
        let pts: Vec<Vec3> = (0..200)
            .map(|_| v(100.0 + rng.next() * 30.0, -20.0 + rng.next() * 25.0))
            .collect();
        let hull = convex_hull(&pts).unwrap().unwrap();
        assert!(convex(hull.vertices()).is_ok());
        for p in &pts {
            // allow points within numerical slack of the boundary
            let inside = hull.edges().iter().all(|e| dot(*e, *p) >= -1e-9);
            assert!(inside);
        }
    }
}
