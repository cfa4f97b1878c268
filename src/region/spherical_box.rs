use crate::error::GeometryError;
use crate::geom::sphere::{
    ANGLE_EPSILON, SkyPosition, cartesian_angular_sep, max_alpha, min_phi_edge_sep,
    min_theta_edge_sep, reduce_theta, spherical_angular_sep,
};

use super::{SphericalCircle, SphericalRegion};

// ---------------------------------------------------------------------------
// Longitude arcs
// ---------------------------------------------------------------------------

/// A longitude arc running east from `.0` to `.1`. Wraps when `.0 > .1`;
/// `(0, 360)` is the full circle.
type Arc = (f64, f64);

const FULL_ARC: Arc = (0.0, 360.0);

fn arc_is_full(a: Arc) -> bool {
    a.1 - a.0 >= 360.0
}

fn arc_extent(a: Arc) -> f64 {
    if a.0 > a.1 { 360.0 - a.0 + a.1 } else { a.1 - a.0 }
}

fn arc_contains_theta(a: Arc, theta: f64) -> bool {
    if a.0 > a.1 {
        theta >= a.0 || theta <= a.1
    } else {
        theta >= a.0 && theta <= a.1
    }
}

fn arc_contains_arc(a: Arc, b: Arc) -> bool {
    if arc_is_full(a) {
        return true;
    }
    if arc_is_full(b) {
        return false;
    }
    let offset = (b.0 - a.0).rem_euclid(360.0);
    offset + arc_extent(b) <= arc_extent(a)
}

fn arc_intersects(a: Arc, b: Arc) -> bool {
    arc_contains_theta(a, b.0) || arc_contains_theta(b, a.0)
}

/// Smallest arc containing both `a` and `b`.
fn arc_union(a: Arc, b: Arc) -> Arc {
    if arc_contains_arc(a, b) {
        return a;
    }
    if arc_contains_arc(b, a) {
        return b;
    }
    let b_starts_in_a = arc_contains_theta(a, b.0);
    let a_starts_in_b = arc_contains_theta(b, a.0);
    match (b_starts_in_a, a_starts_in_b) {
        (true, true) => FULL_ARC,
        (true, false) => (a.0, b.1),
        (false, true) => (b.0, a.1),
        (false, false) => {
            // disjoint: bridge the smaller gap
            let gap_after_a = (b.0 - a.1).rem_euclid(360.0);
            let gap_after_b = (a.0 - b.1).rem_euclid(360.0);
            if gap_after_a <= gap_after_b {
                (a.0, b.1)
            } else {
                (b.0, a.1)
            }
        }
    }
}

/// Smallest arc containing the intersection of `a` and `b`.
fn arc_intersection(a: Arc, b: Arc) -> Option<Arc> {
    if arc_contains_arc(a, b) {
        return Some(b);
    }
    if arc_contains_arc(b, a) {
        return Some(a);
    }
    match (arc_contains_theta(a, b.0), arc_contains_theta(b, a.0)) {
        // the arcs overlap at both ends
        (true, true) => Some(arc_union((b.0, a.1), (a.0, b.1))),
        (true, false) => Some((b.0, a.1)),
        (false, true) => Some((a.0, b.1)),
        (false, false) => None,
    }
}

// ---------------------------------------------------------------------------
// SphericalBox
// ---------------------------------------------------------------------------

/// A longitude/latitude angle box.
///
/// The longitude range may wrap across 0/360, in which case `min_theta`
/// exceeds `max_theta`. A box with `min_phi > max_phi` is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalBox {
    min_theta: f64,
    min_phi: f64,
    max_theta: f64,
    max_phi: f64,
}

impl SphericalBox {
    /// Create a box spanning longitudes `[min_theta, max_theta]` (east from
    /// `min_theta`) and latitudes `[min_phi, max_phi]`.
    ///
    /// A longitude extent of 360 degrees or more yields a box spanning all
    /// longitudes. If `max_theta < min_theta` the box wraps.
    pub fn new(
        min_theta: f64,
        min_phi: f64,
        max_theta: f64,
        max_phi: f64,
    ) -> Result<Self, GeometryError> {
        if !(min_theta.is_finite()
            && max_theta.is_finite()
            && min_phi.is_finite()
            && max_phi.is_finite())
        {
            return Err(GeometryError::InvalidRegion(
                "box bounds must be finite".to_string(),
            ));
        }
        if min_phi > max_phi {
            return Err(GeometryError::InvalidLatitudeRange {
                min: min_phi,
                max: max_phi,
            });
        }
        let min_phi = min_phi.max(-90.0);
        let max_phi = max_phi.min(90.0);
        if min_phi > max_phi {
            // entirely beyond a pole
            return Err(GeometryError::InvalidLatitudeRange {
                min: min_phi,
                max: max_phi,
            });
        }

        let (min_theta, max_theta) = if max_theta - min_theta >= 360.0 {
            FULL_ARC
        } else if max_theta < min_theta {
            (reduce_theta(min_theta), reduce_theta(max_theta))
        } else {
            let lo = reduce_theta(min_theta);
            let hi = lo + (max_theta - min_theta);
            (lo, if hi > 360.0 { hi - 360.0 } else { hi })
        };
        Ok(SphericalBox {
            min_theta,
            min_phi,
            max_theta,
            max_phi,
        })
    }

    /// The box containing nothing.
    pub fn empty() -> Self {
        SphericalBox {
            min_theta: 0.0,
            min_phi: 90.0,
            max_theta: 0.0,
            max_phi: -90.0,
        }
    }

    /// The box containing the whole sphere.
    pub fn full() -> Self {
        SphericalBox {
            min_theta: 0.0,
            min_phi: -90.0,
            max_theta: 360.0,
            max_phi: 90.0,
        }
    }

    /// Degenerate box containing exactly one position.
    pub fn from_point(p: impl SkyPosition) -> Self {
        let (theta, phi) = p.spherical();
        SphericalBox {
            min_theta: theta,
            min_phi: phi,
            max_theta: theta,
            max_phi: phi,
        }
    }

    pub fn min_theta(&self) -> f64 {
        self.min_theta
    }

    pub fn max_theta(&self) -> f64 {
        self.max_theta
    }

    pub fn min_phi(&self) -> f64 {
        self.min_phi
    }

    pub fn max_phi(&self) -> f64 {
        self.max_phi
    }

    pub fn is_empty(&self) -> bool {
        self.min_phi > self.max_phi
    }

    pub fn is_full(&self) -> bool {
        self.has_full_theta() && self.min_phi == -90.0 && self.max_phi == 90.0
    }

    /// True if the box spans every longitude.
    pub fn has_full_theta(&self) -> bool {
        arc_is_full(self.arc())
    }

    /// True if the longitude range crosses 0/360.
    pub fn wraps(&self) -> bool {
        self.min_theta > self.max_theta
    }

    /// Longitude extent in degrees.
    pub fn theta_extent(&self) -> f64 {
        arc_extent(self.arc())
    }

    fn arc(&self) -> Arc {
        (self.min_theta, self.max_theta)
    }

    /// True if `theta` lies in the longitude range of the box.
    pub fn theta_contains(&self, theta: f64) -> bool {
        arc_contains_theta(self.arc(), theta)
    }

    /// Center of the box: the midpoint of its longitude and latitude ranges.
    pub fn center(&self) -> (f64, f64) {
        let theta = reduce_theta(self.min_theta + 0.5 * self.theta_extent());
        (theta, 0.5 * (self.min_phi + self.max_phi))
    }

    /// Split a wrapping box into its two non-wrapping halves.
    pub fn split_wrapping(&self) -> Vec<SphericalBox> {
        if !self.wraps() {
            return vec![*self];
        }
        vec![
            SphericalBox {
                max_theta: 360.0,
                ..*self
            },
            SphericalBox {
                min_theta: 0.0,
                ..*self
            },
        ]
    }

    // -----------------------------------------------------------------------
    // Bounds
    // -----------------------------------------------------------------------

    pub fn bounding_box(&self) -> SphericalBox {
        *self
    }

    /// A circle containing every point of the box.
    pub fn bounding_circle(&self) -> SphericalCircle {
        if self.is_empty() {
            return SphericalCircle::empty();
        }
        if self.theta_extent() > 180.0 {
            // cap centered on the nearer pole
            let (center_phi, radius) = if self.min_phi + self.max_phi >= 0.0 {
                (90.0, 90.0 - self.min_phi)
            } else {
                (-90.0, self.max_phi + 90.0)
            };
            return SphericalCircle::new_unchecked((0.0, center_phi), radius + ANGLE_EPSILON);
        }
        let c = self.center();
        let cv = c.unit_vector();
        let radius = [
            (self.min_theta, self.min_phi),
            (self.min_theta, self.max_phi),
            (self.max_theta, self.min_phi),
            (self.max_theta, self.max_phi),
        ]
        .into_iter()
        .map(|corner| cartesian_angular_sep(cv, corner.unit_vector()))
        .fold(0.0, f64::max);
        SphericalCircle::new_unchecked(c, radius + ANGLE_EPSILON)
    }

    // -----------------------------------------------------------------------
    // Box algebra
    // -----------------------------------------------------------------------

    /// Smallest box containing both this box and `other`.
    pub fn extend(&self, other: &SphericalBox) -> SphericalBox {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let (min_theta, max_theta) = arc_union(self.arc(), other.arc());
        SphericalBox {
            min_theta,
            max_theta,
            min_phi: self.min_phi.min(other.min_phi),
            max_phi: self.max_phi.max(other.max_phi),
        }
    }

    /// Smallest box containing both this box and the point `p`.
    pub fn extend_point(&self, p: impl SkyPosition) -> SphericalBox {
        self.extend(&SphericalBox::from_point(p))
    }

    /// Smallest box containing this box and the bounding box of `region`.
    pub fn extend_region(&self, region: &SphericalRegion) -> SphericalBox {
        self.extend(&region.bounding_box())
    }

    /// Smallest box containing the intersection of this box and `other`.
    pub fn shrink(&self, other: &SphericalBox) -> SphericalBox {
        if self.is_empty() || other.is_empty() {
            return SphericalBox::empty();
        }
        let min_phi = self.min_phi.max(other.min_phi);
        let max_phi = self.max_phi.min(other.max_phi);
        if min_phi > max_phi {
            return SphericalBox::empty();
        }
        match arc_intersection(self.arc(), other.arc()) {
            Some((min_theta, max_theta)) => SphericalBox {
                min_theta,
                max_theta,
                min_phi,
                max_phi,
            },
            None => SphericalBox::empty(),
        }
    }

    /// Expand the box to contain every point within angular distance `r`
    /// of it.
    ///
    /// Latitudes grow by `r` and longitudes by the largest longitude offset
    /// of an `r`-circle centered at the box's most polar latitude; the box
    /// spans all longitudes once that offset reaches a pole.
    pub fn dilated_by(&self, r: f64) -> SphericalBox {
        if self.is_empty() || r <= 0.0 {
            return *self;
        }
        let min_phi = (self.min_phi - r).max(-90.0);
        let max_phi = (self.max_phi + r).min(90.0);
        if self.has_full_theta() {
            return SphericalBox {
                min_phi,
                max_phi,
                ..*self
            };
        }
        let alpha = max_alpha(r, self.min_phi.abs().max(self.max_phi.abs()));
        if alpha >= 180.0 - ANGLE_EPSILON || self.theta_extent() + 2.0 * alpha >= 360.0 {
            return SphericalBox {
                min_theta: 0.0,
                max_theta: 360.0,
                min_phi,
                max_phi,
            };
        }
        let lo = reduce_theta(self.min_theta - alpha);
        let hi = lo + self.theta_extent() + 2.0 * alpha;
        SphericalBox {
            min_theta: lo,
            max_theta: if hi > 360.0 { hi - 360.0 } else { hi },
            min_phi,
            max_phi,
        }
    }

    /// Area of the box in steradians.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let dz = self.max_phi.to_radians().sin() - self.min_phi.to_radians().sin();
        self.theta_extent().to_radians() * dz
    }

    // -----------------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------------

    pub fn contains_point(&self, p: impl SkyPosition) -> bool {
        let (theta, phi) = p.spherical();
        if phi < self.min_phi || phi > self.max_phi {
            return false;
        }
        // longitude is meaningless at the poles
        phi.abs() == 90.0 || self.theta_contains(theta)
    }

    pub fn contains_box(&self, other: &SphericalBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.min_phi >= self.min_phi
            && other.max_phi <= self.max_phi
            && arc_contains_arc(self.arc(), other.arc())
    }

    pub fn intersects_box(&self, other: &SphericalBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.min_phi <= self.max_phi
            && other.max_phi >= self.min_phi
            && arc_intersects(self.arc(), other.arc())
    }

    /// Containment of non-box regions goes through their bounding boxes.
    pub fn contains(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.contains_box(b),
            SphericalRegion::Circle(c) => {
                !c.is_empty() && !c.is_full() && self.contains_box(&c.bounding_box())
            }
            SphericalRegion::Ellipse(e) => self.contains_box(&e.bounding_box()),
            SphericalRegion::Polygon(p) => self.contains_box(&p.bounding_box()),
        }
    }

    pub fn intersects(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.intersects_box(b),
            SphericalRegion::Circle(c) => c.intersects_box(self),
            SphericalRegion::Ellipse(e) => e.bounding_circle().intersects_box(self),
            SphericalRegion::Polygon(p) => p.intersects_box(self),
        }
    }
}

/// Angular distance from `p` to the closest point of `b`.
pub(crate) fn min_sep_to_box(p: (f64, f64), b: &SphericalBox) -> f64 {
    if b.contains_point(p) {
        return 0.0;
    }
    let mut sep = min_phi_edge_sep(p, b.min_phi, b.min_theta, b.max_theta)
        .min(min_phi_edge_sep(p, b.max_phi, b.min_theta, b.max_theta));
    if !b.has_full_theta() {
        sep = sep
            .min(min_theta_edge_sep(p, b.min_theta, b.min_phi, b.max_phi))
            .min(min_theta_edge_sep(p, b.max_theta, b.min_phi, b.max_phi));
    }
    sep
}

/// Angular distance from `p` to the farthest point of `b`.
pub(crate) fn max_sep_to_box(p: (f64, f64), b: &SphericalBox) -> f64 {
    let anti = (reduce_theta(p.0 + 180.0), -p.1);
    if b.contains_point(anti) {
        return 180.0;
    }
    let mut sep: f64 = 0.0;
    for phi in [b.min_phi, b.max_phi] {
        if !b.has_full_theta() {
            sep = sep
                .max(spherical_angular_sep(p, (b.min_theta, phi)))
                .max(spherical_angular_sep(p, (b.max_theta, phi)));
        }
        // along a latitude circle, distance peaks opposite the point
        if b.theta_contains(anti.0) {
            sep = sep.max(spherical_angular_sep(p, (anti.0, phi)));
        }
    }
    if !b.has_full_theta() {
        let (sp, cp) = p.1.to_radians().sin_cos();
        for theta in [b.min_theta, b.max_theta] {
            // along a meridian, cos(distance) = A sin(phi) + B cos(phi)
            let a = sp;
            let bb = cp * (theta - p.0).to_radians().cos();
            let far = (-a).atan2(-bb).to_degrees();
            if far >= b.min_phi && far <= b.max_phi {
                sep = sep.max(spherical_angular_sep(p, (theta, far)));
            }
        }
    }
    sep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(t0: f64, p0: f64, t1: f64, p1: f64) -> SphericalBox {
        SphericalBox::new(t0, p0, t1, p1).unwrap()
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "expected {a} ~= {b}");
    }

    #[test]
    fn construction_normalizes_longitudes() {
        let b = bx(-10.0, 0.0, 10.0, 5.0);
        assert!(b.wraps());
        assert_close(b.min_theta(), 350.0, 1e-12);
        assert_close(b.max_theta(), 10.0, 1e-12);
        assert_close(b.theta_extent(), 20.0, 1e-12);

        let b = bx(10.0, 0.0, 360.0, 5.0);
        assert!(!b.wraps());
        assert_eq!(b.max_theta(), 360.0);

        assert!(bx(5.0, 0.0, 400.0, 1.0).has_full_theta());
        assert!(bx(350.0, 0.0, 10.0, 1.0).wraps());
    }

    #[test]
    fn construction_rejects_bad_latitudes() {
        assert!(matches!(
            SphericalBox::new(0.0, 10.0, 20.0, 5.0),
            Err(GeometryError::InvalidLatitudeRange { .. })
        ));
        assert!(SphericalBox::new(0.0, f64::NAN, 20.0, 5.0).is_err());
    }

    #[test]
    fn empty_and_full() {
        let e = SphericalBox::empty();
        let f = SphericalBox::full();
        assert!(e.is_empty());
        assert!(f.is_full());
        assert!(!e.contains_point((0.0, 0.0)));
        assert!(f.contains_point((123.0, -45.0)));
        assert!(!f.intersects_box(&e));
        assert!(!f.contains_box(&e));
        assert_eq!(e.extend(&f), f);
        assert!(f.shrink(&e).is_empty());
    }

    #[test]
    fn wrapping_containment() {
        let b = bx(350.0, -5.0, 10.0, 5.0);
        assert!(b.contains_point((355.0, 0.0)));
        assert!(b.contains_point((5.0, 0.0)));
        assert!(b.contains_point((0.0, 0.0)));
        assert!(!b.contains_point((180.0, 0.0)));
        assert!(!b.contains_point((5.0, 6.0)));
        assert!(b.contains_box(&bx(355.0, -1.0, 5.0, 1.0)));
        assert!(!b.contains_box(&bx(340.0, -1.0, 5.0, 1.0)));
        assert!(b.intersects_box(&bx(5.0, 0.0, 20.0, 1.0)));
        assert!(!b.intersects_box(&bx(20.0, 0.0, 30.0, 1.0)));
    }

    #[test]
    fn poles_contain_any_longitude() {
        let cap = bx(10.0, 80.0, 20.0, 90.0);
        assert!(cap.contains_point((200.0, 90.0)));
        assert!(!cap.contains_point((200.0, 85.0)));
    }

    #[test]
    fn extend_picks_smaller_union() {
        let a = bx(10.0, 0.0, 20.0, 1.0);
        let b = bx(30.0, 2.0, 40.0, 3.0);
        let u = a.extend(&b);
        assert_close(u.min_theta(), 10.0, 1e-12);
        assert_close(u.max_theta(), 40.0, 1e-12);
        assert_eq!(u.min_phi(), 0.0);
        assert_eq!(u.max_phi(), 3.0);

        // across the seam is shorter
        let c = bx(350.0, 0.0, 355.0, 1.0);
        let u = a.extend(&c);
        assert!(u.wraps());
        assert_close(u.min_theta(), 350.0, 1e-12);
        assert_close(u.max_theta(), 20.0, 1e-12);

        // overlapping at both ends
        let d = bx(15.0, 0.0, 12.0, 1.0);
        assert!(a.extend(&d).has_full_theta());

        let p = a.extend_point((25.0, -3.0));
        assert_close(p.max_theta(), 25.0, 1e-12);
        assert_eq!(p.min_phi(), -3.0);
    }

    #[test]
    fn shrink_bounds_intersection() {
        let a = bx(10.0, 0.0, 50.0, 10.0);
        let b = bx(40.0, 5.0, 80.0, 20.0);
        let s = a.shrink(&b);
        assert_close(s.min_theta(), 40.0, 1e-12);
        assert_close(s.max_theta(), 50.0, 1e-12);
        assert_eq!((s.min_phi(), s.max_phi()), (5.0, 10.0));
        assert!(a.shrink(&bx(60.0, 0.0, 70.0, 1.0)).is_empty());

        // two pieces: bounded by the shorter covering arc
        let w = bx(300.0, 0.0, 60.0, 1.0);
        let v = bx(50.0, 0.0, 310.0, 1.0);
        let s = w.shrink(&v);
        assert!(s.wraps());
        assert_close(s.min_theta(), 300.0, 1e-12);
        assert_close(s.max_theta(), 60.0, 1e-12);
    }

    #[test]
    fn dilation_widens_longitude_with_latitude() {
        let b = bx(10.0, 0.0, 20.0, 60.0);
        let d = b.dilated_by(1.0);
        assert_close(d.min_phi(), -1.0, 1e-12);
        assert_close(d.max_phi(), 61.0, 1e-12);
        let alpha = max_alpha(1.0, 60.0);
        assert!(alpha > 1.9);
        assert_close(d.min_theta(), 10.0 - alpha, 1e-9);
        assert_close(d.max_theta(), 20.0 + alpha, 1e-9);

        // near the pole the dilated box spans all longitudes
        assert!(bx(10.0, 80.0, 20.0, 89.5).dilated_by(1.0).has_full_theta());
        // dilation across the seam
        let s = bx(0.5, 0.0, 1.0, 1.0).dilated_by(1.0);
        assert!(s.wraps());
    }

    #[test]
    fn bounding_circle_covers_corners() {
        for b in [
            bx(10.0, 0.0, 20.0, 10.0),
            bx(350.0, -30.0, 30.0, -10.0),
            bx(0.0, 60.0, 300.0, 70.0),
            bx(0.0, -80.0, 200.0, -70.0),
        ] {
            let c = b.bounding_circle();
            for t in [b.min_theta(), b.max_theta(), b.center().0] {
                for p in [b.min_phi(), b.max_phi()] {
                    assert!(c.contains_point((t, p)), "{b:?} {c:?} ({t}, {p})");
                }
            }
        }
    }

    #[test]
    fn distances_to_box() {
        let b = bx(10.0, -5.0, 20.0, 5.0);
        assert_eq!(min_sep_to_box((15.0, 0.0), &b), 0.0);
        assert_close(min_sep_to_box((15.0, 8.0), &b), 3.0, 1e-9);
        assert_close(min_sep_to_box((25.0, 0.0), &b), 5.0, 1e-9);
        // farthest point from the center is a corner
        let far = max_sep_to_box((15.0, 0.0), &b);
        assert_close(far, spherical_angular_sep((15.0, 0.0), (10.0, 5.0)), 1e-9);
        // a box containing the antipode
        assert_eq!(max_sep_to_box((195.0, 0.0), &b), 180.0);
    }

    #[test]
    fn area_of_full_sphere() {
        assert_close(SphericalBox::full().area(), 4.0 * std::f64::consts::PI, 1e-12);
        assert_eq!(SphericalBox::empty().area(), 0.0);
    }
}
