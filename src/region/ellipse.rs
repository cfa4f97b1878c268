use crate::error::GeometryError;
use crate::geom::sphere::{SkyPosition, Vec3, gnomonic};

use super::{SphericalBox, SphericalCircle, SphericalRegion};

/// An ellipse on the sphere, defined in the gnomonic projection about its
/// center.
///
/// A point belongs to the ellipse when its projection `(u, v)` along the
/// major and minor axes satisfies `(u / tan a)^2 + (v / tan b)^2 <= 1`.
/// Region tests other than point containment go through the inscribed and
/// bounding circles (radii `b` and `a`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalEllipse {
    center: (f64, f64),
    center_vec: Vec3,
    semi_major: f64,
    semi_minor: f64,
    angle: f64,
    tan_major: f64,
    tan_minor: f64,
    sin_angle: f64,
    cos_angle: f64,
}

impl SphericalEllipse {
    /// Create an ellipse with semi-axes in degrees and the major axis at
    /// `major_axis_angle` degrees east of north.
    pub fn new(
        center: impl SkyPosition,
        semi_major: f64,
        semi_minor: f64,
        major_axis_angle: f64,
    ) -> Result<Self, GeometryError> {
        let (theta, phi) = center.spherical();
        if ![theta, phi, semi_major, semi_minor, major_axis_angle]
            .iter()
            .all(|x| x.is_finite())
        {
            return Err(GeometryError::InvalidRegion(
                "ellipse parameters must be finite".to_string(),
            ));
        }
        if semi_minor < 0.0 || semi_minor > semi_major {
            return Err(GeometryError::InvalidRegion(format!(
                "ellipse semi-minor axis {semi_minor} must lie in [0, {semi_major}]"
            )));
        }
        if semi_major >= 90.0 {
            return Err(GeometryError::InvalidRegion(format!(
                "ellipse semi-major axis {semi_major} must be below 90 degrees"
            )));
        }
        let (sin_angle, cos_angle) = major_axis_angle.to_radians().sin_cos();
        Ok(SphericalEllipse {
            center: (theta, phi),
            center_vec: center.unit_vector(),
            semi_major,
            semi_minor,
            angle: major_axis_angle,
            tan_major: semi_major.to_radians().tan(),
            tan_minor: semi_minor.to_radians().tan(),
            sin_angle,
            cos_angle,
        })
    }

    pub fn center(&self) -> (f64, f64) {
        self.center
    }

    pub fn semi_major(&self) -> f64 {
        self.semi_major
    }

    pub fn semi_minor(&self) -> f64 {
        self.semi_minor
    }

    pub fn major_axis_angle(&self) -> f64 {
        self.angle
    }

    pub fn bounding_circle(&self) -> SphericalCircle {
        SphericalCircle::new_unchecked(self.center, self.semi_major)
    }

    /// The largest circle centered on the ellipse that it contains.
    pub fn inscribed_circle(&self) -> SphericalCircle {
        SphericalCircle::new_unchecked(self.center, self.semi_minor)
    }

    pub fn bounding_box(&self) -> SphericalBox {
        self.bounding_circle().bounding_box()
    }

    pub fn contains_point(&self, p: impl SkyPosition) -> bool {
        let Some((x, y)) = gnomonic(p.unit_vector(), self.center_vec) else {
            return false;
        };
        let u = x * self.sin_angle + y * self.cos_angle;
        let v = x * self.cos_angle - y * self.sin_angle;
        let a2 = self.tan_major * self.tan_major;
        let b2 = self.tan_minor * self.tan_minor;
        u * u * b2 + v * v * a2 <= a2 * b2
    }

    pub fn contains(&self, other: &SphericalRegion) -> bool {
        self.inscribed_circle().contains(other)
    }

    pub fn intersects(&self, other: &SphericalRegion) -> bool {
        self.bounding_circle().intersects(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_axes() {
        assert!(SphericalEllipse::new((0.0, 0.0), 1.0, 2.0, 0.0).is_err());
        assert!(SphericalEllipse::new((0.0, 0.0), 90.0, 2.0, 0.0).is_err());
        assert!(SphericalEllipse::new((0.0, 0.0), 1.0, -0.5, 0.0).is_err());
        assert!(SphericalEllipse::new((0.0, 0.0), 2.0, 1.0, 30.0).is_ok());
    }

    #[test]
    fn major_axis_along_north() {
        let e = SphericalEllipse::new((0.0, 0.0), 2.0, 1.0, 0.0).unwrap();
        assert!(e.contains_point((0.0, 1.9)));
        assert!(e.contains_point((0.0, -1.9)));
        assert!(!e.contains_point((0.0, 2.1)));
        assert!(e.contains_point((0.9, 0.0)));
        assert!(!e.contains_point((1.1, 0.0)));
    }

    #[test]
    fn major_axis_along_east() {
        let e = SphericalEllipse::new((100.0, 30.0), 2.0, 1.0, 90.0).unwrap();
        // 1.9 degrees of arc along the parallel at latitude 30
        let dt = 1.9 / 30f64.to_radians().cos();
        assert!(e.contains_point((100.0 + dt * 0.99, 30.0)));
        assert!(!e.contains_point((100.0, 31.1)));
        assert!(e.contains_point((100.0, 30.9)));
    }

    #[test]
    fn circles_bracket_ellipse() {
        let e = SphericalEllipse::new((200.0, -40.0), 3.0, 1.5, 45.0).unwrap();
        let outer = e.bounding_circle();
        let inside = SphericalCircle::new_unchecked(e.center(), 1.49);
        let beyond = SphericalCircle::new_unchecked(e.center(), 3.01);
        for i in 0..360 {
            let pa = i as f64;
            assert!(e.contains_point(inside.point_at(pa)), "pa {pa}");
            assert!(!e.contains_point(beyond.point_at(pa)), "pa {pa}");
            assert!(outer.contains_point(inside.point_at(pa)));
        }
        assert_eq!(e.inscribed_circle().radius(), 1.5);
    }

    #[test]
    fn degenerate_minor_axis() {
        let e = SphericalEllipse::new((0.0, 0.0), 2.0, 0.0, 0.0).unwrap();
        assert!(e.contains_point((0.0, 1.0)));
        assert!(!e.contains_point((0.5, 1.0)));
    }
}
