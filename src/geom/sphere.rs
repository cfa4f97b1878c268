//! Vector algebra and spherical trigonometry on the unit sphere.
//!
//! Angles are in degrees throughout. Longitude (`theta`) lives in `[0, 360)`
//! and latitude (`phi`) in `[-90, 90]`.

use crate::error::GeometryError;

/// A cartesian 3-vector. Positions on the sphere are unit vectors.
pub type Vec3 = [f64; 3];

/// Degrees per arcsecond.
pub const DEG_PER_ARCSEC: f64 = 1.0 / 3600.0;

/// Slack used for angle comparisons near the poles and the 0/360 seam
/// (1 milli-arcsecond).
pub const ANGLE_EPSILON: f64 = 0.001 * DEG_PER_ARCSEC;

/// Circles reaching closer than this to a pole are treated as covering it.
pub const POLE_EPSILON: f64 = DEG_PER_ARCSEC;

/// Squared cross-product magnitudes below this mark two unit vectors as
/// near-duplicates or near-antipodes.
pub const CROSS_N2MIN: f64 = 2e-15;

/// `sqrt(CROSS_N2MIN)`: minimum sine of the angle between a point and a
/// plane for a turn to count as strict.
pub const SIN_MIN: f64 = 4.472_135_954_999_579e-8;

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn neg(a: Vec3) -> Vec3 {
    [-a[0], -a[1], -a[2]]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Scale `v` to unit length.
pub fn normalize(v: Vec3) -> Result<Vec3, GeometryError> {
    let n = norm(v);
    if n == 0.0 || !n.is_finite() {
        return Err(GeometryError::DegenerateVector);
    }
    Ok(scale(v, 1.0 / n))
}

/// Range reduce a longitude angle to `[0, 360)`.
pub fn reduce_theta(theta: f64) -> f64 {
    let t = theta.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if t >= 360.0 { 0.0 } else { t }
}

pub fn clamp_phi(phi: f64) -> f64 {
    phi.clamp(-90.0, 90.0)
}

/// Convert `(theta, phi)` in degrees to a unit vector.
pub fn cartesian_unit_vector(theta: f64, phi: f64) -> Vec3 {
    let (st, ct) = theta.to_radians().sin_cos();
    let (sp, cp) = phi.to_radians().sin_cos();
    [cp * ct, cp * st, sp]
}

/// Convert a cartesian vector (not necessarily of unit length) to
/// `(theta, phi)` in degrees, with theta in `[0, 360)`.
pub fn spherical_coords(v: Vec3) -> (f64, f64) {
    let d2 = v[0] * v[0] + v[1] * v[1];
    let theta = if d2 == 0.0 {
        0.0
    } else {
        reduce_theta(v[1].atan2(v[0]).to_degrees())
    };
    let phi = if v[2] == 0.0 {
        0.0
    } else {
        clamp_phi(v[2].atan2(d2.sqrt()).to_degrees())
    };
    (theta, phi)
}

/// A position on the sphere, given either as `(theta, phi)` in degrees or
/// as a cartesian unit vector.
pub trait SkyPosition: Copy {
    fn unit_vector(self) -> Vec3;
    fn spherical(self) -> (f64, f64);
}

impl SkyPosition for (f64, f64) {
    fn unit_vector(self) -> Vec3 {
        cartesian_unit_vector(self.0, self.1)
    }

    fn spherical(self) -> (f64, f64) {
        (reduce_theta(self.0), clamp_phi(self.1))
    }
}

impl SkyPosition for Vec3 {
    fn unit_vector(self) -> Vec3 {
        self
    }

    fn spherical(self) -> (f64, f64) {
        spherical_coords(self)
    }
}

/// Angular separation in degrees between two spherical positions
/// (haversine form, accurate for small separations).
pub fn spherical_angular_sep(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let sdt = (0.5 * (p1.0 - p2.0)).to_radians().sin();
    let sdp = (0.5 * (p1.1 - p2.1)).to_radians().sin();
    let cpp = p1.1.to_radians().cos() * p2.1.to_radians().cos();
    let s = (sdp * sdp + cpp * sdt * sdt).sqrt();
    if s >= 1.0 {
        return 180.0;
    }
    2.0 * s.asin().to_degrees()
}

/// Angular separation in degrees between two cartesian vectors.
pub fn cartesian_angular_sep(v1: Vec3, v2: Vec3) -> f64 {
    let cs = dot(v1, v2);
    let ss = norm(cross(v1, v2));
    if cs == 0.0 && ss == 0.0 {
        return 0.0;
    }
    ss.atan2(cs).to_degrees()
}

/// Half-width in longitude of the circle of radius `r` centered at
/// latitude `center_phi`; 180 once the circle covers a pole.
pub fn max_alpha(r: f64, center_phi: f64) -> f64 {
    if r <= 0.0 {
        return 0.0;
    }
    let c = clamp_phi(center_phi);
    if c.abs() + r > 90.0 - POLE_EPSILON {
        return 180.0;
    }
    let rr = r.to_radians();
    let cr = c.to_radians();
    let y = rr.sin();
    let x = ((cr - rr).cos() * (cr + rr).cos()).abs().sqrt();
    (y / x).atan().abs().to_degrees()
}

/// Number of equal-width longitude segments to split the latitude band
/// `[phi_min, phi_max]` into so that points in non-adjacent segments are
/// at least `width` degrees apart. Always at least 1.
pub fn segments(phi_min: f64, phi_max: f64, width: f64) -> u32 {
    let p = phi_min.abs().max(phi_max.abs());
    if p > 90.0 - DEG_PER_ARCSEC || width >= 180.0 {
        return 1;
    }
    let width = width.max(DEG_PER_ARCSEC);
    let p = p.to_radians();
    let cw = width.to_radians().cos();
    let (sp, cp) = p.sin_cos();
    let x = cw - sp * sp;
    let u = cp * cp;
    let y = (u * u - x * x).abs().sqrt();
    let n = (std::f64::consts::TAU / y.atan2(x).abs()).floor();
    if n < 1.0 { 1 } else { n as u32 }
}

/// True if the projection of `p` onto the great circle with normal
/// `n = v1 x v2` falls on the arc from `v1` to `v2`.
pub fn between(p: Vec3, n: Vec3, v1: Vec3, v2: Vec3) -> bool {
    let p1 = cross(n, p);
    dot(p1, v1) <= 0.0 && dot(p1, v2) >= 0.0
}

/// Minimum angular separation (degrees) between `p` and the great-circle
/// arc from `v1` to `v2`, whose plane has unit normal `n`.
pub fn min_edge_sep(p: Vec3, n: Vec3, v1: Vec3, v2: Vec3) -> f64 {
    if between(p, n, v1, v2) {
        (90.0 - cartesian_angular_sep(p, n)).abs()
    } else {
        cartesian_angular_sep(p, v1).min(cartesian_angular_sep(p, v2))
    }
}

/// Minimum angular separation between `p` and the latitude arc at `phi`
/// running east from `min_theta` to `max_theta` (which may wrap).
pub fn min_phi_edge_sep(p: (f64, f64), phi: f64, min_theta: f64, max_theta: f64) -> f64 {
    let inside = if min_theta > max_theta {
        p.0 >= min_theta || p.0 <= max_theta
    } else {
        p.0 >= min_theta && p.0 <= max_theta
    };
    if inside {
        return (p.1 - phi).abs();
    }
    spherical_angular_sep(p, (min_theta, phi)).min(spherical_angular_sep(p, (max_theta, phi)))
}

/// Minimum angular separation between `p` and the meridian arc at `theta`
/// running north from `min_phi` to `max_phi`.
pub fn min_theta_edge_sep(p: (f64, f64), theta: f64, min_phi: f64, max_phi: f64) -> f64 {
    let (st, ct) = theta.to_radians().sin_cos();
    let n = [st, -ct, 0.0];
    min_edge_sep(
        p.unit_vector(),
        n,
        cartesian_unit_vector(theta, min_phi),
        cartesian_unit_vector(theta, max_phi),
    )
}

/// Normalized vector sum of `vertices`.
pub fn centroid(vertices: &[Vec3]) -> Result<Vec3, GeometryError> {
    let sum = vertices.iter().fold([0.0; 3], |acc, &v| add(acc, v));
    normalize(sum)
}

/// Gnomonic projection of `point` onto the plane tangent to the sphere at
/// `reference`.
///
/// Returns `Some((x, y))` with x increasing toward increasing longitude and
/// y toward the north pole, or `None` when the point lies in the hemisphere
/// opposite the reference.
pub fn gnomonic(point: Vec3, reference: Vec3) -> Option<(f64, f64)> {
    let s = point;
    let r = reference;

    let sdotr = dot(s, r);
    if sdotr <= 0.0 {
        return None;
    }
    let inv_sdotr = 1.0 / sdotr;

    if r[0] == 0.0 && r[1] == 0.0 {
        // at a pole the north direction is undefined; use the +y axis as
        // north and +x as east, mirrored in the south
        let inv_s2 = 1.0 / s[2].abs();
        return if r[2] > 0.0 {
            Some((s[1] * inv_s2, -s[0] * inv_s2))
        } else {
            Some((s[1] * inv_s2, s[0] * inv_s2))
        };
    }

    // eta: perpendicular to r, toward increasing longitude (eta_z = 0)
    let en = r[0].hypot(r[1]);
    let etax = -r[1] / en;
    let etay = r[0] / en;

    // xi = r x eta: toward the north pole
    let xix = -r[2] * etay;
    let xiy = r[2] * etax;
    let xiz = r[0] * etay - r[1] * etax;

    let x = (s[0] * etax + s[1] * etay) * inv_sdotr;
    let y = (s[0] * xix + s[1] * xiy + s[2] * xiz) * inv_sdotr;
    Some((x, y))
}
