use crate::error::GeometryError;
use crate::geom::sphere::{
    ANGLE_EPSILON, SkyPosition, Vec3, add, cartesian_angular_sep, max_alpha, scale,
};

use super::spherical_box::{max_sep_to_box, min_sep_to_box};
use super::{SphericalBox, SphericalRegion};

/// A spherical cap: all points within `radius` degrees of a center.
///
/// A negative radius denotes the empty circle; a radius of 180 degrees or
/// more covers the whole sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalCircle {
    center: (f64, f64),
    center_vec: Vec3,
    radius: f64,
}

impl SphericalCircle {
    pub fn new(center: impl SkyPosition, radius: f64) -> Result<Self, GeometryError> {
        let (theta, phi) = center.spherical();
        if !(theta.is_finite() && phi.is_finite() && radius.is_finite()) {
            return Err(GeometryError::InvalidRegion(
                "circle center and radius must be finite".to_string(),
            ));
        }
        Ok(Self::new_unchecked((theta, phi), radius))
    }

    pub(crate) fn new_unchecked(center: impl SkyPosition, radius: f64) -> Self {
        SphericalCircle {
            center: center.spherical(),
            center_vec: center.unit_vector(),
            radius,
        }
    }

    pub fn empty() -> Self {
        Self::new_unchecked((0.0, 0.0), -1.0)
    }

    pub fn center(&self) -> (f64, f64) {
        self.center
    }

    pub fn center_vec(&self) -> Vec3 {
        self.center_vec
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn is_empty(&self) -> bool {
        self.radius < 0.0
    }

    pub fn is_full(&self) -> bool {
        self.radius >= 180.0
    }

    /// The point at distance `radius` from the center along the bearing
    /// `position_angle` (degrees east of north).
    pub fn point_at(&self, position_angle: f64) -> Vec3 {
        let (st, ct) = self.center.0.to_radians().sin_cos();
        let (sp, cp) = self.center.1.to_radians().sin_cos();
        let north = [-sp * ct, -sp * st, cp];
        let east = [-st, ct, 0.0];
        let (sa, ca) = position_angle.to_radians().sin_cos();
        let (sr, cr) = self.radius.to_radians().sin_cos();
        let dir = add(scale(north, ca), scale(east, sa));
        add(scale(self.center_vec, cr), scale(dir, sr))
    }

    pub fn bounding_box(&self) -> SphericalBox {
        if self.is_empty() {
            return SphericalBox::empty();
        }
        if self.is_full() {
            return SphericalBox::full();
        }
        let r = self.radius + ANGLE_EPSILON;
        let (theta, phi) = self.center;
        let min_phi = (phi - r).max(-90.0);
        let max_phi = (phi + r).min(90.0);
        let alpha = max_alpha(r, phi);
        let (min_theta, max_theta) = if alpha >= 180.0 {
            (0.0, 360.0)
        } else {
            (theta - alpha, theta + alpha)
        };
        SphericalBox::new(min_theta, min_phi, max_theta, max_phi)
            .unwrap_or_else(|_| SphericalBox::full())
    }

    pub fn bounding_circle(&self) -> SphericalCircle {
        *self
    }

    pub fn contains_point(&self, p: impl SkyPosition) -> bool {
        if self.is_empty() {
            return false;
        }
        self.is_full() || cartesian_angular_sep(self.center_vec, p.unit_vector()) <= self.radius
    }

    pub fn contains_box(&self, b: &SphericalBox) -> bool {
        if self.is_empty() || b.is_empty() {
            return false;
        }
        self.is_full() || max_sep_to_box(self.center, b) <= self.radius
    }

    pub fn contains_circle(&self, other: &SphericalCircle) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.is_full() {
            return true;
        }
        if other.is_full() {
            return false;
        }
        cartesian_angular_sep(self.center_vec, other.center_vec) + other.radius <= self.radius
    }

    pub fn contains(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.contains_box(b),
            SphericalRegion::Circle(c) => self.contains_circle(c),
            SphericalRegion::Ellipse(e) => self.contains_circle(&e.bounding_circle()),
            SphericalRegion::Polygon(p) => {
                if self.is_empty() {
                    false
                } else if self.radius <= 90.0 {
                    // caps no larger than a hemisphere are convex
                    p.vertices().iter().all(|&v| self.contains_point(v))
                } else {
                    self.contains_circle(&p.bounding_circle())
                }
            }
        }
    }

    pub fn intersects_box(&self, b: &SphericalBox) -> bool {
        if self.is_empty() || b.is_empty() {
            return false;
        }
        self.is_full() || min_sep_to_box(self.center, b) <= self.radius
    }

    pub fn intersects_circle(&self, other: &SphericalCircle) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.is_full() || other.is_full() {
            return true;
        }
        cartesian_angular_sep(self.center_vec, other.center_vec) <= self.radius + other.radius
    }

    pub fn intersects(&self, other: &SphericalRegion) -> bool {
        match other {
            SphericalRegion::Box(b) => self.intersects_box(b),
            SphericalRegion::Circle(c) => self.intersects_circle(c),
            SphericalRegion::Ellipse(e) => self.intersects_circle(&e.bounding_circle()),
            SphericalRegion::Polygon(p) => p.intersects_circle(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(theta: f64, phi: f64, r: f64) -> SphericalCircle {
        SphericalCircle::new((theta, phi), r).unwrap()
    }

    fn bx(t0: f64, p0: f64, t1: f64, p1: f64) -> SphericalBox {
        SphericalBox::new(t0, p0, t1, p1).unwrap()
    }

    #[test]
    fn empty_and_full_circles() {
        let e = circle(0.0, 0.0, -1.0);
        let f = circle(0.0, 0.0, 180.0);
        assert!(e.is_empty() && !e.contains_point((0.0, 0.0)));
        assert!(f.is_full() && f.contains_point((180.0, 0.0)));
        assert!(e.bounding_box().is_empty());
        assert!(f.bounding_box().is_full());
        assert!(f.contains_box(&bx(0.0, 0.0, 10.0, 10.0)));
        assert!(!e.intersects_box(&bx(0.0, 0.0, 10.0, 10.0)));
        assert!(SphericalCircle::new((f64::NAN, 0.0), 1.0).is_err());
    }

    #[test]
    fn point_containment() {
        let c = circle(10.0, 20.0, 5.0);
        assert!(c.contains_point((10.0, 24.9)));
        assert!(!c.contains_point((10.0, 25.1)));
        for pa in [0.0, 45.0, 133.0, 270.0] {
            let p = c.point_at(pa);
            assert!((cartesian_angular_sep(c.center_vec(), p) - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn bounding_box_of_polar_circle() {
        let c = circle(40.0, 88.0, 3.0);
        let b = c.bounding_box();
        assert!(b.has_full_theta());
        assert_eq!(b.max_phi(), 90.0);
        let c = circle(359.0, 0.0, 2.0);
        assert!(c.bounding_box().wraps());
    }

    #[test]
    fn box_containment_is_exact_at_corners() {
        let b = bx(10.0, -5.0, 20.0, 5.0);
        let corner = crate::geom::sphere::spherical_angular_sep((15.0, 0.0), (20.0, 5.0));
        assert!(circle(15.0, 0.0, corner + 1e-9).contains_box(&b));
        assert!(!circle(15.0, 0.0, corner - 1e-6).contains_box(&b));
        // a box on the far side of the sphere
        assert!(!circle(195.0, 0.0, 170.0).contains_box(&b));
        assert!(circle(195.0, 0.0, 179.0).intersects_box(&b));
    }

    #[test]
    fn box_containment_uses_meridian_extremum() {
        // the farthest point of the box lies in the middle of a meridian edge
        let b = bx(80.0, -60.0, 100.0, 60.0);
        let c = circle(0.0, 0.0, 90.0);
        assert!(!c.contains_box(&b));
        let c = circle(0.0, 0.0, 101.0);
        assert!(c.contains_box(&b));
    }

    #[test]
    fn box_intersection_by_distance() {
        let b = bx(10.0, -5.0, 20.0, 5.0);
        assert!(circle(25.0, 0.0, 5.01).intersects_box(&b));
        assert!(!circle(25.0, 0.0, 4.99).intersects_box(&b));
        assert!(circle(15.0, 0.0, 0.1).intersects_box(&b));
    }

    #[test]
    fn circle_relations() {
        let big = circle(0.0, 0.0, 10.0);
        let small = circle(3.0, 0.0, 2.0);
        let far = circle(30.0, 0.0, 5.0);
        assert!(big.contains_circle(&small));
        assert!(!small.contains_circle(&big));
        assert!(big.intersects_circle(&small));
        assert!(!big.intersects_circle(&far));
        assert!(circle(16.0, 0.0, 6.0).intersects_circle(&big));
    }
}
