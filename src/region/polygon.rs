use crate::error::GeometryError;
use crate::geom::convex::{Winding, convex};
use crate::geom::sphere::{
    ANGLE_EPSILON, CROSS_N2MIN, SkyPosition, Vec3, add, between, cartesian_angular_sep,
    cartesian_unit_vector, centroid, cross, dot, min_edge_sep, neg, normalize, reduce_theta,
    scale, spherical_coords, sub,
};

use super::{SphericalBox, SphericalCircle, SphericalRegion};

/// A convex polygon on the sphere.
///
/// Vertices are stored in counter-clockwise order (seen from outside the
/// sphere) along with the unit normal of each edge plane. Edge `i` runs from
/// vertex `i` to vertex `i + 1` and the interior lies on the positive side of
/// every edge plane.
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalConvexPolygon {
    vertices: Vec<Vec3>,
    edges: Vec<Vec3>,
    bbox: SphericalBox,
    bcircle: SphericalCircle,
}

impl SphericalConvexPolygon {
    /// Build a polygon from vertices in either winding order.
    pub fn new(mut vertices: Vec<Vec3>) -> Result<Self, GeometryError> {
        for v in vertices.iter_mut() {
            *v = normalize(*v)?;
        }
        if convex(&vertices)? == Winding::Clockwise {
            vertices.reverse();
        }
        Self::from_ccw_vertices(vertices)
    }

    /// Build a polygon from vertices already known to be convex and in
    /// counter-clockwise order.
    pub(crate) fn from_ccw_vertices(vertices: Vec<Vec3>) -> Result<Self, GeometryError> {
        let n = vertices.len();
        let edges = (0..n)
            .map(|i| normalize(cross(vertices[i], vertices[(i + 1) % n])))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_parts(vertices, edges)
    }

    fn from_parts(vertices: Vec<Vec3>, edges: Vec<Vec3>) -> Result<Self, GeometryError> {
        let center = centroid(&vertices)?;
        let radius = vertices
            .iter()
            .map(|&v| cartesian_angular_sep(center, v))
            .fold(0.0, f64::max);
        let bcircle = SphericalCircle::new_unchecked(center, radius + ANGLE_EPSILON);
        let bbox = compute_bounding_box(&vertices, &edges);
        Ok(SphericalConvexPolygon {
            vertices,
            edges,
            bbox,
            bcircle,
        })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Unit normals of the edge planes, pointing into the polygon.
    pub fn edges(&self) -> &[Vec3] {
        &self.edges
    }

    pub fn bounding_box(&self) -> SphericalBox {
        self.bbox
    }

    pub fn bounding_circle(&self) -> SphericalCircle {
        self.bcircle
    }

    /// Iterate over edges as `(plane normal, start vertex, end vertex)`.
    fn edge_arcs(&self) -> impl Iterator<Item = (Vec3, Vec3, Vec3)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.edges[i], self.vertices[i], self.vertices[(i + 1) % n]))
    }

    // -----------------------------------------------------------------------
    // Containment
    // -----------------------------------------------------------------------

    pub fn contains_point(&self, p: impl SkyPosition) -> bool {
        let v = p.unit_vector();
        self.edges.iter().all(|&e| dot(v, e) >= 0.0)
    }

    pub fn contains_box(&self, b: &SphericalBox) -> bool {
        if b.is_empty() {
            return false;
        }
        self.edges.iter().all(|&e| min_dot_over_box(e, b) >= 0.0)
    }

    pub fn contains_circle(&self, c: &SphericalCircle) -> bool {
        if c.is_empty() || c.radius() > 90.0 {
            return false;
        }
        let sin_r = c.radius().to_radians().sin();
        let center = c.center_vec();
        self.edges.iter().all(|&e| dot(center, e) >= sin_r)
    }

    pub fn contains_polygon(&self, other: &SphericalConvexPolygon) -> bool {
        other.vertices.iter().all(|&v| self.contains_point(v))
    }

    pub fn contains(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.contains_box(b),
            SphericalRegion::Circle(c) => self.contains_circle(c),
            SphericalRegion::Ellipse(e) => self.contains_circle(&e.bounding_circle()),
            SphericalRegion::Polygon(p) => self.contains_polygon(p),
        }
    }

    // -----------------------------------------------------------------------
    // Intersection
    // -----------------------------------------------------------------------

    pub fn intersects_box(&self, b: &SphericalBox) -> bool {
        if b.is_empty() || !self.bbox.intersects_box(b) {
            return false;
        }
        if b.is_full() {
            return true;
        }
        if self.vertices.iter().any(|&v| b.contains_point(v)) {
            return true;
        }
        let corners = [
            (b.min_theta(), b.min_phi()),
            (b.min_theta(), b.max_phi()),
            (b.max_theta(), b.min_phi()),
            (b.max_theta(), b.max_phi()),
        ];
        if corners.into_iter().any(|c| self.contains_point(c)) {
            return true;
        }
        for (n, v1, v2) in self.edge_arcs() {
            if arc_crosses_latitude(n, v1, v2, b.min_phi(), b)
                || arc_crosses_latitude(n, v1, v2, b.max_phi(), b)
            {
                return true;
            }
            if !b.has_full_theta()
                && (arc_crosses_meridian(n, v1, v2, b.min_theta(), b)
                    || arc_crosses_meridian(n, v1, v2, b.max_theta(), b))
            {
                return true;
            }
        }
        false
    }

    pub fn intersects_circle(&self, c: &SphericalCircle) -> bool {
        if c.is_empty() {
            return false;
        }
        if c.is_full() || self.contains_point(c.center_vec()) {
            return true;
        }
        let center = c.center_vec();
        self.edge_arcs()
            .any(|(n, v1, v2)| min_edge_sep(center, n, v1, v2) <= c.radius())
    }

    pub fn intersects_polygon(&self, other: &SphericalConvexPolygon) -> bool {
        self.bbox.intersects_box(&other.bbox) && self.intersect(other).is_some()
    }

    pub fn intersects(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.intersects_box(b),
            SphericalRegion::Circle(c) => self.intersects_circle(c),
            SphericalRegion::Ellipse(e) => self.intersects_circle(&e.bounding_circle()),
            SphericalRegion::Polygon(p) => self.intersects_polygon(p),
        }
    }

    // -----------------------------------------------------------------------
    // Clipping
    // -----------------------------------------------------------------------

    /// Clip to the half-space `dot(v, plane) >= 0`.
    ///
    /// Returns `Ok(None)` if nothing with positive area remains.
    pub fn clip(&self, plane: Vec3) -> Result<Option<SphericalConvexPolygon>, GeometryError> {
        let plane = normalize(plane)?;
        Ok(self.clip_unit(plane))
    }

    /// Intersection of two convex polygons, `None` if it is empty.
    pub fn intersect(&self, other: &SphericalConvexPolygon) -> Option<SphericalConvexPolygon> {
        let mut result = self.clone();
        for &e in &other.edges {
            result = result.clip_unit(e)?;
        }
        Some(result)
    }

    fn clip_unit(&self, plane: Vec3) -> Option<SphericalConvexPolygon> {
        let n = self.vertices.len();
        let d: Vec<f64> = self.vertices.iter().map(|&v| dot(v, plane)).collect();
        if d.iter().all(|&x| x >= 0.0) {
            return Some(self.clone());
        }
        if d.iter().all(|&x| x <= 0.0) {
            return None;
        }

        // output vertices, each with the plane of the edge leading into it
        let mut verts: Vec<Vec3> = Vec::with_capacity(n + 1);
        let mut incoming: Vec<Vec3> = Vec::with_capacity(n + 1);
        let mut push = |v: Vec3, e: Vec3| {
            if let Some(&last) = verts.last() {
                let c = cross(last, v);
                if dot(c, c) < CROSS_N2MIN {
                    return;
                }
            }
            verts.push(v);
            incoming.push(e);
        };
        for i in 0..n {
            let j = (i + 1) % n;
            let (vi, vj) = (self.vertices[i], self.vertices[j]);
            let (di, dj) = (d[i], d[j]);
            let crossing = || normalize(add(scale(vi, dj.abs()), scale(vj, di.abs()))).ok();
            if di >= 0.0 && dj >= 0.0 {
                push(vj, self.edges[i]);
            } else if di > 0.0 && dj < 0.0 {
                if let Some(x) = crossing() {
                    push(x, self.edges[i]);
                }
            } else if di < 0.0 && dj > 0.0 {
                if let Some(x) = crossing() {
                    push(x, plane);
                }
                push(vj, self.edges[i]);
            } else if di < 0.0 && dj == 0.0 {
                push(vj, plane);
            }
        }
        // the last vertex may duplicate the first
        while verts.len() > 1 {
            let c = cross(verts[verts.len() - 1], verts[0]);
            if dot(c, c) >= CROSS_N2MIN {
                break;
            }
            verts.pop();
            // the first vertex is now reached through the dropped one's edge
            incoming[0] = incoming.pop()?;
        }
        let m = verts.len();
        if m < 3 {
            return None;
        }
        let edges: Vec<Vec3> = (0..m).map(|k| incoming[(k + 1) % m]).collect();
        Self::from_parts(verts, edges).ok()
    }
}

/// Smallest value of `dot(n, v)` over the boundary of `b`.
fn min_dot_over_box(n: Vec3, b: &SphericalBox) -> f64 {
    let f = |theta: f64, phi: f64| dot(n, cartesian_unit_vector(theta, phi));
    let theta_far = reduce_theta(n[1].atan2(n[0]).to_degrees() + 180.0);
    let mut m = f64::INFINITY;
    for phi in [b.min_phi(), b.max_phi()] {
        if !b.has_full_theta() {
            m = m.min(f(b.min_theta(), phi)).min(f(b.max_theta(), phi));
        }
        // along a latitude circle the minimum is opposite n's longitude
        if b.theta_contains(theta_far) {
            m = m.min(f(theta_far, phi));
        }
    }
    if !b.has_full_theta() {
        for theta in [b.min_theta(), b.max_theta()] {
            let (st, ct) = theta.to_radians().sin_cos();
            let k = n[0] * ct + n[1] * st;
            let phi = (-n[2]).atan2(-k).to_degrees();
            if phi >= b.min_phi() && phi <= b.max_phi() {
                m = m.min(f(theta, phi));
            }
        }
    }
    m
}

/// Does the arc `v1 -> v2` (plane normal `n`) cross latitude `phi` at a
/// longitude inside `b`?
fn arc_crosses_latitude(n: Vec3, v1: Vec3, v2: Vec3, phi: f64, b: &SphericalBox) -> bool {
    let (s, c) = phi.to_radians().sin_cos();
    let rho2 = n[0] * n[0] + n[1] * n[1];
    if rho2 < CROSS_N2MIN {
        return false;
    }
    let rho = rho2.sqrt();
    let d = -n[2] * s / rho;
    if d.abs() > c {
        return false;
    }
    let h = (c * c - d * d).max(0.0).sqrt();
    let (ux, uy) = (n[0] / rho, n[1] / rho);
    for sign in [1.0, -1.0] {
        let v = [ux * d - uy * h * sign, uy * d + ux * h * sign, s];
        if between(v, n, v1, v2) && b.theta_contains(spherical_coords(v).0) {
            return true;
        }
    }
    false
}

/// Does the arc `v1 -> v2` (plane normal `n`) cross the meridian segment of
/// `b` at `theta`?
fn arc_crosses_meridian(n: Vec3, v1: Vec3, v2: Vec3, theta: f64, b: &SphericalBox) -> bool {
    let (st, ct) = theta.to_radians().sin_cos();
    let m = [st, -ct, 0.0];
    let Ok(t) = normalize(cross(n, m)) else {
        return false;
    };
    let south = cartesian_unit_vector(theta, b.min_phi());
    let north = cartesian_unit_vector(theta, b.max_phi());
    [t, neg(t)]
        .into_iter()
        .any(|p| between(p, n, v1, v2) && between(p, m, south, north))
}

/// Signed longitude change along an edge from longitude `a` to `b`; the
/// sign of the edge normal's z component gives the direction.
fn longitude_change(normal_z: f64, a: f64, b: f64) -> f64 {
    const SLACK: f64 = 1e-9;
    if normal_z.abs() < 1e-12 {
        // meridian edge
        return (b - a + 180.0).rem_euclid(360.0) - 180.0;
    }
    if normal_z > 0.0 {
        let fwd = (b - a).rem_euclid(360.0);
        if fwd > 360.0 - SLACK { fwd - 360.0 } else { fwd }
    } else {
        let back = (a - b).rem_euclid(360.0);
        if back > 360.0 - SLACK { 360.0 - back } else { -back }
    }
}

fn compute_bounding_box(vertices: &[Vec3], edges: &[Vec3]) -> SphericalBox {
    let n = vertices.len();
    let has_north = edges.iter().all(|e| e[2] >= 0.0);
    let has_south = edges.iter().all(|e| e[2] <= 0.0);

    let mut min_phi: f64 = 90.0;
    let mut max_phi: f64 = -90.0;
    for &v in vertices {
        let (_, phi) = spherical_coords(v);
        min_phi = min_phi.min(phi);
        max_phi = max_phi.max(phi);
    }
    // latitude extremes inside an edge
    for i in 0..n {
        let (e, v1, v2) = (edges[i], vertices[i], vertices[(i + 1) % n]);
        let Ok(top) = normalize(sub([0.0, 0.0, 1.0], scale(e, e[2]))) else {
            continue;
        };
        if between(top, e, v1, v2) {
            max_phi = max_phi.max(spherical_coords(top).1);
        }
        let bottom = neg(top);
        if between(bottom, e, v1, v2) {
            min_phi = min_phi.min(spherical_coords(bottom).1);
        }
    }
    if has_north {
        max_phi = 90.0;
    }
    if has_south {
        min_phi = -90.0;
    }

    let (min_theta, max_theta) = if has_north || has_south {
        (0.0, 360.0)
    } else {
        // follow longitude continuously around the boundary
        let start = spherical_coords(vertices[0]).0;
        let (mut lifted, mut lo, mut hi) = (start, start, start);
        for i in 0..n {
            let a = spherical_coords(vertices[i]).0;
            let b = spherical_coords(vertices[(i + 1) % n]).0;
            lifted += longitude_change(edges[i][2], a, b);
            lo = lo.min(lifted);
            hi = hi.max(lifted);
        }
        (lo, hi)
    };
    SphericalBox::new(min_theta, min_phi, max_theta, max_phi)
        .map(|b| b.dilated_by(ANGLE_EPSILON))
        .unwrap_or_else(|_| SphericalBox::full())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::sphere::cartesian_unit_vector as v;

    fn square(t0: f64, p0: f64, t1: f64, p1: f64) -> SphericalConvexPolygon {
        SphericalConvexPolygon::new(vec![v(t0, p0), v(t1, p0), v(t1, p1), v(t0, p1)]).unwrap()
    }

    fn bx(t0: f64, p0: f64, t1: f64, p1: f64) -> SphericalBox {
        SphericalBox::new(t0, p0, t1, p1).unwrap()
    }

    #[test]
    fn clockwise_input_is_reversed() {
        let cw = SphericalConvexPolygon::new(vec![v(0.0, 0.0), v(0.0, 10.0), v(10.0, 0.0)]).unwrap();
        assert!(cw.contains_point((3.0, 3.0)));
        assert!(!cw.contains_point((20.0, 3.0)));
    }

    #[test]
    fn rejects_non_convex() {
        let dart = vec![v(0.0, 0.0), v(10.0, 5.0), v(0.0, 10.0), v(3.0, 5.0)];
        assert!(matches!(
            SphericalConvexPolygon::new(dart),
            Err(GeometryError::NotConvex(_))
        ));
        assert!(SphericalConvexPolygon::new(vec![[0.0, 0.0, 0.0], v(1.0, 1.0), v(2.0, 0.0)]).is_err());
    }

    #[test]
    fn bounding_box_bulges_toward_pole() {
        // the top edge is a great circle arc, which rises above latitude 60
        let p = square(0.0, 50.0, 60.0, 60.0);
        let b = p.bounding_box();
        assert!(b.max_phi() > 60.5);
        assert!(b.min_phi() <= 50.0);
        assert!(b.min_theta() < 1e-6 || b.wraps());
        assert!((b.max_theta() - 60.0).abs() < 1e-6);
    }

    #[test]
    fn bounding_box_across_seam_and_pole() {
        let p = square(350.0, -5.0, 10.0, 5.0);
        let b = p.bounding_box();
        assert!(b.wraps());
        assert!(b.theta_extent() < 21.0);

        let cap = SphericalConvexPolygon::new(vec![
            v(0.0, 80.0),
            v(120.0, 80.0),
            v(240.0, 80.0),
        ])
        .unwrap();
        let b = cap.bounding_box();
        assert!(b.has_full_theta());
        assert_eq!(b.max_phi(), 90.0);
        assert!(cap.contains_point((77.0, 89.0)));
    }

    #[test]
    fn box_containment_and_intersection() {
        let p = square(0.0, 0.0, 20.0, 20.0);
        assert!(p.contains_box(&bx(5.0, 5.0, 15.0, 15.0)));
        assert!(!p.contains_box(&bx(5.0, 5.0, 25.0, 15.0)));
        // crossing without any vertex or corner inside the other
        let cross_box = bx(-5.0, 8.0, 25.0, 12.0);
        assert!(p.intersects_box(&cross_box));
        assert!(!p.intersects_box(&bx(30.0, 0.0, 40.0, 10.0)));
        assert!(p.intersects_box(&bx(0.0, 0.0, 360.0, 5.0)));
    }

    #[test]
    fn circle_relations() {
        let p = square(0.0, 0.0, 20.0, 20.0);
        let inner = SphericalCircle::new((10.0, 10.0), 3.0).unwrap();
        let edge = SphericalCircle::new((10.0, -1.0), 2.0).unwrap();
        let away = SphericalCircle::new((10.0, -5.0), 2.0).unwrap();
        assert!(p.contains_circle(&inner));
        assert!(!p.contains_circle(&edge));
        assert!(p.intersects_circle(&edge));
        assert!(!p.intersects_circle(&away));
    }

    #[test]
    fn clip_by_plane() {
        let p = square(0.0, -10.0, 20.0, 10.0);
        // keep the northern half
        let north = p.clip([0.0, 0.0, 1.0]).unwrap().unwrap();
        assert!(north.contains_point((10.0, 5.0)));
        assert!(!north.contains_point((10.0, -5.0)));
        assert!(north.bounding_box().min_phi() < 1e-6);
        assert!(p.clip([0.0, 0.0, -1.0]).unwrap().is_some());
        let far = p.clip(v(190.0, 0.0)).unwrap();
        assert!(far.is_none());
        assert!(p.clip([0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn polygon_intersection() {
        let a = square(0.0, 0.0, 20.0, 20.0);
        let b = square(10.0, 10.0, 30.0, 30.0);
        let c = square(40.0, 0.0, 50.0, 10.0);
        let ab = a.intersect(&b).unwrap();
        assert!(ab.contains_point((15.0, 15.0)));
        assert!(!ab.contains_point((5.0, 5.0)));
        assert!(!ab.contains_point((25.0, 25.0)));
        assert!(crate::geom::convex::convex(ab.vertices()).is_ok());
        assert!(a.intersects_polygon(&b));
        assert!(a.intersect(&c).is_none());
        assert!(!a.intersects_polygon(&c));
        assert!(a.contains_polygon(&square(5.0, 5.0, 10.0, 10.0)));
    }
}
