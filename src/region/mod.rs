//! Regions on the unit sphere: boxes, circles, ellipses and convex polygons.
//!
//! Every region reports a bounding box and bounding circle that contain every
//! point the region contains. Containment tests between dissimilar region
//! types are conservative: they may answer `false` for a region that is in
//! fact contained, but never `true` for one that is not. Intersection tests
//! may over-report.

mod circle;
mod ellipse;
mod polygon;
mod spherical_box;

pub use circle::SphericalCircle;
pub use ellipse::SphericalEllipse;
pub use polygon::SphericalConvexPolygon;
pub use spherical_box::SphericalBox;

use crate::geom::sphere::SkyPosition;

/// Any of the supported region types.
#[derive(Debug, Clone, PartialEq)]
pub enum SphericalRegion {
    Box(SphericalBox),
    Circle(SphericalCircle),
    Ellipse(SphericalEllipse),
    Polygon(SphericalConvexPolygon),
}

impl SphericalRegion {
    pub fn bounding_box(&self) -> SphericalBox {
        match self {
            SphericalRegion::Box(b) => *b,
            SphericalRegion::Circle(c) => c.bounding_box(),
            SphericalRegion::Ellipse(e) => e.bounding_box(),
            SphericalRegion::Polygon(p) => p.bounding_box(),
        }
    }

    pub fn bounding_circle(&self) -> SphericalCircle {
        match self {
            SphericalRegion::Box(b) => b.bounding_circle(),
            SphericalRegion::Circle(c) => *c,
            SphericalRegion::Ellipse(e) => e.bounding_circle(),
            SphericalRegion::Polygon(p) => p.bounding_circle(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SphericalRegion::Box(b) => b.is_empty(),
            SphericalRegion::Circle(c) => c.is_empty(),
            SphericalRegion::Ellipse(_) | SphericalRegion::Polygon(_) => false,
        }
    }

    pub fn contains_point(&self, p: impl SkyPosition) -> bool {
        match self {
            SphericalRegion::Box(b) => b.contains_point(p),
            SphericalRegion::Circle(c) => c.contains_point(p),
            SphericalRegion::Ellipse(e) => e.contains_point(p),
            SphericalRegion::Polygon(poly) => poly.contains_point(p),
        }
    }

    pub fn contains(&self, other: &SphericalRegion) -> bool {
        match self {
            SphericalRegion::Box(b) => b.contains(other),
            SphericalRegion::Circle(c) => c.contains(other),
            SphericalRegion::Ellipse(e) => e.contains(other),
            SphericalRegion::Polygon(p) => p.contains(other),
        }
    }

    pub fn contains_box(&self, b: &SphericalBox) -> bool {
        match self {
            SphericalRegion::Box(s) => s.contains_box(b),
            SphericalRegion::Circle(c) => c.contains_box(b),
            SphericalRegion::Ellipse(e) => e.inscribed_circle().contains_box(b),
            SphericalRegion::Polygon(p) => p.contains_box(b),
        }
    }

    pub fn intersects(&self, other: &SphericalRegion) -> bool {
        match self {
            SphericalRegion::Box(b) => b.intersects(other),
            SphericalRegion::Circle(c) => c.intersects(other),
            SphericalRegion::Ellipse(e) => e.intersects(other),
            SphericalRegion::Polygon(p) => p.intersects(other),
        }
    }

    pub fn intersects_box(&self, b: &SphericalBox) -> bool {
        match self {
            SphericalRegion::Box(s) => s.intersects_box(b),
            SphericalRegion::Circle(c) => c.intersects_box(b),
            SphericalRegion::Ellipse(e) => e.bounding_circle().intersects_box(b),
            SphericalRegion::Polygon(p) => p.intersects_box(b),
        }
    }
}

impl From<SphericalBox> for SphericalRegion {
    fn from(b: SphericalBox) -> Self {
        SphericalRegion::Box(b)
    }
}

impl From<SphericalCircle> for SphericalRegion {
    fn from(c: SphericalCircle) -> Self {
        SphericalRegion::Circle(c)
    }
}

impl From<SphericalEllipse> for SphericalRegion {
    fn from(e: SphericalEllipse) -> Self {
        SphericalRegion::Ellipse(e)
    }
}

impl From<SphericalConvexPolygon> for SphericalRegion {
    fn from(p: SphericalConvexPolygon) -> Self {
        SphericalRegion::Polygon(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::sphere::{Vec3, cartesian_unit_vector};

    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 as f64) / (u64::MAX as f64)
        }

        fn range(&mut self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.next()
        }

        /// Uniformly distributed point on the sphere.
        fn point(&mut self) -> (f64, f64) {
            let theta = self.range(0.0, 360.0);
            let phi = self.range(-1.0, 1.0).asin().to_degrees();
            (theta, phi)
        }
    }

    fn random_regions(rng: &mut Rng, n: usize) -> Vec<SphericalRegion> {
        let mut regions = Vec::new();
        for i in 0..n {
            let center = rng.point();
            let region: SphericalRegion = match i % 4 {
                0 => {
                    let t0 = rng.range(0.0, 360.0);
                    let p0 = rng.range(-90.0, 80.0);
                    let b = SphericalBox::new(
                        t0,
                        p0,
                        t0 + rng.range(0.1, 120.0),
                        (p0 + rng.range(0.1, 40.0)).min(90.0),
                    )
                    .unwrap();
                    b.into()
                }
                1 => SphericalCircle::new(center, rng.range(0.1, 30.0)).unwrap().into(),
                2 => {
                    let a = rng.range(0.1, 20.0);
                    SphericalEllipse::new(center, a, a * rng.next(), rng.range(0.0, 360.0))
                        .unwrap()
                        .into()
                }
                _ => {
                    // a jittered regular polygon around the center
                    let r = rng.range(1.0, 30.0);
                    let k = 3 + (rng.next() * 5.0) as usize;
                    let c = SphericalCircle::new(center, r).unwrap();
                    let verts: Vec<Vec3> = (0..k)
                        .map(|j| c.point_at(360.0 * j as f64 / k as f64))
                        .collect();
                    SphericalConvexPolygon::new(verts).unwrap().into()
                }
            };
            regions.push(region);
        }
        regions
    }

    #[test]
    fn bounding_box_contains_region_points() {
        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
        let regions = random_regions(&mut rng, 40);
        for region in &regions {
            let bbox = region.bounding_box();
            let bcirc = region.bounding_circle();
            let mut hits = 0;
            for _ in 0..4000 {
                let p = rng.point();
                if region.contains_point(p) {
                    hits += 1;
                    assert!(bbox.contains_point(p), "{region:?} bbox misses {p:?}");
                    assert!(bcirc.contains_point(p), "{region:?} circle misses {p:?}");
                }
            }
            // points sampled near the region as well
            let c = bcirc.center();
            for _ in 0..2000 {
                let p = (
                    c.0 + rng.range(-40.0, 40.0),
                    (c.1 + rng.range(-40.0, 40.0)).clamp(-90.0, 90.0),
                );
                if region.contains_point(p) {
                    hits += 1;
                    assert!(bbox.contains_point(p), "{region:?} bbox misses {p:?}");
                }
            }
            assert!(hits > 0, "no sample hit {region:?}");
        }
    }

    #[test]
    fn containment_is_never_overreported() {
        let mut rng = Rng(12345);
        let regions = random_regions(&mut rng, 24);
        let boxes: Vec<SphericalBox> = (0..60)
            .map(|_| {
                let (t, p) = rng.point();
                let p = p.clamp(-85.0, 80.0);
                SphericalBox::new(t, p, t + rng.range(0.5, 10.0), p + rng.range(0.5, 10.0)).unwrap()
            })
            .collect();
        for region in &regions {
            for b in &boxes {
                if !region.contains_box(b) {
                    continue;
                }
                assert!(region.intersects_box(b));
                // sample the box, all samples must be inside the region
                for i in 0..=10 {
                    for j in 0..=10 {
                        let t = b.min_theta() + b.theta_extent() * i as f64 / 10.0;
                        let p = b.min_phi() + (b.max_phi() - b.min_phi()) * j as f64 / 10.0;
                        assert!(
                            region.contains_point((t, p)),
                            "{region:?} claims {b:?} but not ({t}, {p})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn intersection_is_never_underreported() {
        let mut rng = Rng(777);
        let regions = random_regions(&mut rng, 24);
        for region in &regions {
            for _ in 0..200 {
                let (t, p) = rng.point();
                let p = p.clamp(-85.0, 80.0);
                let b = SphericalBox::new(t, p, t + rng.range(0.5, 15.0), p + rng.range(0.5, 10.0))
                    .unwrap();
                if region.intersects_box(&b) {
                    continue;
                }
                for i in 0..=8 {
                    for j in 0..=8 {
                        let tt = b.min_theta() + b.theta_extent() * i as f64 / 8.0;
                        let pp = b.min_phi() + (b.max_phi() - b.min_phi()) * j as f64 / 8.0;
                        assert!(
                            !region.contains_point((tt, pp)),
                            "{region:?} says no intersection with {b:?} but contains ({tt}, {pp})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn region_dispatch_between_types() {
        let circle: SphericalRegion = SphericalCircle::new((10.0, 10.0), 5.0).unwrap().into();
        let small: SphericalRegion = SphericalCircle::new((10.0, 10.0), 1.0).unwrap().into();
        let b: SphericalRegion = SphericalBox::new(0.0, 0.0, 20.0, 20.0).unwrap().into();
        let poly: SphericalRegion = SphericalConvexPolygon::new(vec![
            cartesian_unit_vector(8.0, 8.0),
            cartesian_unit_vector(12.0, 8.0),
            cartesian_unit_vector(10.0, 12.0),
        ])
        .unwrap()
        .into();

        assert!(b.contains(&circle));
        assert!(circle.contains(&small));
        assert!(!small.contains(&circle));
        assert!(circle.contains(&poly));
        assert!(b.contains(&poly));
        assert!(poly.contains(&SphericalRegion::from(
            SphericalCircle::new((10.0, 9.5), 0.1).unwrap()
        )));
        assert!(poly.intersects(&circle));
        assert!(circle.intersects(&poly));
        assert!(b.intersects(&poly));

        let far: SphericalRegion = SphericalCircle::new((200.0, -40.0), 3.0).unwrap().into();
        assert!(!far.intersects(&b));
        assert!(!poly.intersects(&far));
        assert!(!far.contains(&poly));
    }
}
