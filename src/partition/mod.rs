//! The stripe / sub-stripe / chunk / sub-chunk partitioning of the sphere.
//!
//! The sphere is cut into `num_stripes` equal-height latitude stripes, each
//! split into `num_sub_stripes_per_stripe` sub-stripes. A stripe is divided
//! in longitude into chunks no narrower than the stripe height; a sub-stripe
//! into sub-chunks no narrower than the sub-stripe height, with a whole
//! number of sub-chunks per chunk.

mod intersect;

pub use intersect::{ChunkIter, Coverage, SubChunkIter};

use std::collections::BTreeSet;

use crate::error::{GeometryError, PartitionError, Result};
use crate::geom::sphere::{ANGLE_EPSILON, clamp_phi, max_alpha, reduce_theta, segments};
use crate::region::{SphericalBox, SphericalRegion};

/// Which overlap files a neighboring sub-chunk receives a row in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OverlapKind {
    /// Full overlap only (neighbor in another stripe).
    Full,
    /// Full and self overlap (neighbor in the same stripe).
    SelfAndFull,
}

/// A sub-chunk, other than the one a point belongs to, whose overlap region
/// contains the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OverlapTarget {
    pub chunk_id: u32,
    pub sub_chunk_id: u32,
    pub kind: OverlapKind,
}

/// An immutable partitioning of the sphere with precomputed per-stripe and
/// per-sub-stripe tables.
#[derive(Debug, Clone)]
pub struct PartitionMap {
    num_stripes: u32,
    num_sub_stripes_per_stripe: u32,
    overlap: f64,
    stripe_height: f64,
    sub_stripe_height: f64,
    /// Chunks in each stripe.
    num_chunks: Vec<u32>,
    /// Sub-chunks per chunk in each sub-stripe.
    num_sub_chunks_per_chunk: Vec<u32>,
    /// Sub-chunk width (degrees of longitude) in each sub-stripe.
    sub_chunk_width: Vec<f64>,
    max_sub_chunks_per_chunk: u32,
}

impl PartitionMap {
    pub fn new(num_stripes: u32, num_sub_stripes_per_stripe: u32, overlap: f64) -> Result<Self> {
        if num_stripes < 1 {
            return Err(PartitionError::Config(
                "number of stripes must be at least 1".to_string(),
            ));
        }
        if num_sub_stripes_per_stripe < 1 {
            return Err(PartitionError::Config(
                "number of sub-stripes per stripe must be at least 1".to_string(),
            ));
        }
        let stripe_height = 180.0 / num_stripes as f64;
        if !(overlap >= 0.0 && overlap < 90.0) {
            return Err(PartitionError::Config(format!(
                "overlap must be in [0, 90) degrees, got {overlap}"
            )));
        }
        if overlap > stripe_height {
            return Err(PartitionError::Config(format!(
                "overlap {overlap} exceeds the stripe height {stripe_height}"
            )));
        }
        let sub_stripe_height = stripe_height / num_sub_stripes_per_stripe as f64;

        let mut num_chunks = Vec::with_capacity(num_stripes as usize);
        for stripe in 0..num_stripes {
            let (lo, hi) = band(stripe, stripe_height, num_stripes);
            num_chunks.push(segments(lo, hi, stripe_height));
        }

        let total_sub_stripes = num_stripes * num_sub_stripes_per_stripe;
        let mut num_sub_chunks_per_chunk = Vec::with_capacity(total_sub_stripes as usize);
        let mut sub_chunk_width = Vec::with_capacity(total_sub_stripes as usize);
        for ss in 0..total_sub_stripes {
            let nc = num_chunks[(ss / num_sub_stripes_per_stripe) as usize];
            let (lo, hi) = band(ss, sub_stripe_height, total_sub_stripes);
            let per_chunk = (segments(lo, hi, sub_stripe_height) / nc).max(1);
            num_sub_chunks_per_chunk.push(per_chunk);
            sub_chunk_width.push(360.0 / (per_chunk * nc) as f64);
        }
        let max_sub_chunks_per_chunk = num_sub_chunks_per_chunk.iter().copied().max().unwrap_or(1);

        Ok(PartitionMap {
            num_stripes,
            num_sub_stripes_per_stripe,
            overlap,
            stripe_height,
            sub_stripe_height,
            num_chunks,
            num_sub_chunks_per_chunk,
            sub_chunk_width,
            max_sub_chunks_per_chunk,
        })
    }

    pub fn num_stripes(&self) -> u32 {
        self.num_stripes
    }

    pub fn num_sub_stripes_per_stripe(&self) -> u32 {
        self.num_sub_stripes_per_stripe
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn stripe_height(&self) -> f64 {
        self.stripe_height
    }

    pub fn sub_stripe_height(&self) -> f64 {
        self.sub_stripe_height
    }

    /// Number of chunks in `stripe`.
    pub fn num_chunks(&self, stripe: u32) -> u32 {
        self.num_chunks[stripe as usize]
    }

    /// Number of sub-chunks per chunk in the global sub-stripe `sub_stripe`.
    pub fn num_sub_chunks_per_chunk(&self, sub_stripe: u32) -> u32 {
        self.num_sub_chunks_per_chunk[sub_stripe as usize]
    }

    pub fn max_sub_chunks_per_chunk(&self) -> u32 {
        self.max_sub_chunks_per_chunk
    }

    fn total_sub_stripes(&self) -> u32 {
        self.num_stripes * self.num_sub_stripes_per_stripe
    }

    // -----------------------------------------------------------------------
    // Id codec
    // -----------------------------------------------------------------------

    pub fn chunk_id(&self, stripe: u32, chunk_in_stripe: u32) -> u32 {
        stripe * 2 * self.num_stripes + chunk_in_stripe
    }

    pub fn sub_chunk_id(&self, sub_stripe_in_stripe: u32, sub_chunk_in_sub_stripe: u32) -> u32 {
        sub_stripe_in_stripe * self.max_sub_chunks_per_chunk + sub_chunk_in_sub_stripe
    }

    pub fn stripe_of(&self, chunk_id: u32) -> u32 {
        chunk_id / (2 * self.num_stripes)
    }

    pub fn chunk_in_stripe(&self, chunk_id: u32) -> u32 {
        chunk_id % (2 * self.num_stripes)
    }

    pub fn sub_stripe_of(&self, sub_chunk_id: u32) -> u32 {
        sub_chunk_id / self.max_sub_chunks_per_chunk
    }

    pub fn sub_chunk_in_sub_stripe(&self, sub_chunk_id: u32) -> u32 {
        sub_chunk_id % self.max_sub_chunks_per_chunk
    }

    /// Decode a chunk id into `(stripe, chunk_in_stripe)`, checking that it
    /// names a chunk of this map.
    fn decode_chunk(&self, chunk_id: u32) -> Result<(u32, u32)> {
        let stripe = self.stripe_of(chunk_id);
        let chunk = self.chunk_in_stripe(chunk_id);
        if stripe >= self.num_stripes || chunk >= self.num_chunks[stripe as usize] {
            return Err(PartitionError::UnknownChunk(chunk_id));
        }
        Ok((stripe, chunk))
    }

    /// Decode a sub-chunk id into `(global sub-stripe, sub_chunk_in_sub_stripe)`.
    fn decode_sub_chunk(&self, stripe: u32, chunk_id: u32, sub_chunk_id: u32) -> Result<(u32, u32)> {
        let ss_in_stripe = self.sub_stripe_of(sub_chunk_id);
        let sc = self.sub_chunk_in_sub_stripe(sub_chunk_id);
        let unknown = PartitionError::UnknownSubChunk {
            chunk_id,
            sub_chunk_id,
        };
        if ss_in_stripe >= self.num_sub_stripes_per_stripe {
            return Err(unknown);
        }
        let ss = stripe * self.num_sub_stripes_per_stripe + ss_in_stripe;
        if sc >= self.num_sub_chunks_per_chunk[ss as usize] {
            return Err(unknown);
        }
        Ok((ss, sc))
    }

    // -----------------------------------------------------------------------
    // Point location
    // -----------------------------------------------------------------------

    /// Global sub-stripe containing latitude `phi`.
    fn sub_stripe_index(&self, phi: f64) -> u32 {
        let p = clamp_phi(phi) + 90.0;
        let stripe = ((p / self.stripe_height).floor().max(0.0) as u32).min(self.num_stripes - 1);
        let rest = p - stripe as f64 * self.stripe_height;
        let ss = ((rest / self.sub_stripe_height).floor().max(0.0) as u32)
            .min(self.num_sub_stripes_per_stripe - 1);
        stripe * self.num_sub_stripes_per_stripe + ss
    }

    /// Map a position to its `(chunk_id, sub_chunk_id)`. Positions on the
    /// upper edge of the ranges fall into the last bucket.
    pub fn locate(&self, theta: f64, phi: f64) -> (u32, u32) {
        let theta = reduce_theta(theta);
        let ss = self.sub_stripe_index(phi);
        let stripe = ss / self.num_sub_stripes_per_stripe;
        let nc = self.num_chunks[stripe as usize];
        let nsc = self.num_sub_chunks_per_chunk[ss as usize];
        let k = (theta / self.sub_chunk_width[ss as usize]).floor();
        let k = (k.max(0.0) as u32).min(nc * nsc - 1);
        (
            self.chunk_id(stripe, k / nsc),
            self.sub_chunk_id(ss % self.num_sub_stripes_per_stripe, k % nsc),
        )
    }

    // -----------------------------------------------------------------------
    // Bounds
    // -----------------------------------------------------------------------

    /// Exact bounds of a chunk.
    pub fn chunk_bounds(&self, chunk_id: u32) -> Result<SphericalBox> {
        let (stripe, chunk) = self.decode_chunk(chunk_id)?;
        let (lo, hi) = band(stripe, self.stripe_height, self.num_stripes);
        let nc = self.num_chunks[stripe as usize];
        Ok(theta_band_box(chunk, nc, lo, hi)?)
    }

    /// Exact bounds of a sub-chunk.
    pub fn sub_chunk_bounds(&self, chunk_id: u32, sub_chunk_id: u32) -> Result<SphericalBox> {
        let (stripe, chunk) = self.decode_chunk(chunk_id)?;
        let (ss, sc) = self.decode_sub_chunk(stripe, chunk_id, sub_chunk_id)?;
        let (lo, hi) = band(ss, self.sub_stripe_height, self.total_sub_stripes());
        let nc = self.num_chunks[stripe as usize];
        let nsc = self.num_sub_chunks_per_chunk[ss as usize];
        Ok(theta_band_box(chunk * nsc + sc, nc * nsc, lo, hi)?)
    }

    /// Bounds of a chunk, expanded by `ANGLE_EPSILON` on all sides.
    pub fn chunk_bounding_box(&self, chunk_id: u32) -> Result<SphericalBox> {
        Ok(expand(&self.chunk_bounds(chunk_id)?))
    }

    /// Bounds of a sub-chunk, expanded by `ANGLE_EPSILON` on all sides.
    pub fn sub_chunk_bounding_box(&self, chunk_id: u32, sub_chunk_id: u32) -> Result<SphericalBox> {
        Ok(expand(&self.sub_chunk_bounds(chunk_id, sub_chunk_id)?))
    }

    /// Longitude half-width of the overlap region around a sub-chunk in the
    /// given bounds.
    pub fn overlap_alpha(&self, bounds: &SphericalBox) -> f64 {
        max_alpha(self.overlap, bounds.min_phi().abs().max(bounds.max_phi().abs()))
    }

    // -----------------------------------------------------------------------
    // Enumeration
    // -----------------------------------------------------------------------

    /// Sub-chunk ids of a chunk, in increasing order.
    pub fn sub_chunk_ids(&self, chunk_id: u32) -> Result<Vec<u32>> {
        let (stripe, _) = self.decode_chunk(chunk_id)?;
        Ok(self.sub_chunk_ids_in_stripe(stripe))
    }

    fn sub_chunk_ids_in_stripe(&self, stripe: u32) -> Vec<u32> {
        let mut ids = Vec::new();
        for ss_in in 0..self.num_sub_stripes_per_stripe {
            let ss = stripe * self.num_sub_stripes_per_stripe + ss_in;
            for sc in 0..self.num_sub_chunks_per_chunk[ss as usize] {
                ids.push(self.sub_chunk_id(ss_in, sc));
            }
        }
        ids
    }

    /// Iterate over every chunk id with its sub-chunk ids.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Vec<u32>)> + '_ {
        (0..self.num_stripes).flat_map(move |stripe| {
            let sub_chunks = self.sub_chunk_ids_in_stripe(stripe);
            (0..self.num_chunks[stripe as usize])
                .map(move |chunk| (self.chunk_id(stripe, chunk), sub_chunks.clone()))
        })
    }

    /// Every chunk id of the map, in increasing order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_stripes).flat_map(move |stripe| {
            (0..self.num_chunks[stripe as usize]).map(move |chunk| self.chunk_id(stripe, chunk))
        })
    }

    // -----------------------------------------------------------------------
    // Overlap
    // -----------------------------------------------------------------------

    /// Sub-chunks other than the point's own whose overlap region (bounds
    /// dilated by the overlap radius) contains the point.
    ///
    /// Neighbors in the point's own stripe are tagged
    /// [`OverlapKind::SelfAndFull`], others [`OverlapKind::Full`]. The
    /// result is sorted by `(chunk_id, sub_chunk_id)`.
    pub fn overlap_neighbors(&self, theta: f64, phi: f64) -> Vec<OverlapTarget> {
        if self.overlap <= 0.0 {
            return Vec::new();
        }
        let theta = reduce_theta(theta);
        let phi = clamp_phi(phi);
        let (own_chunk, own_sub_chunk) = self.locate(theta, phi);
        let own_stripe = self.stripe_of(own_chunk);

        let ss_lo = self.sub_stripe_index(phi - self.overlap);
        let ss_hi = self.sub_stripe_index(phi + self.overlap);
        let mut found = BTreeSet::new();
        for ss in ss_lo..=ss_hi {
            let (lo, hi) = band(ss, self.sub_stripe_height, self.total_sub_stripes());
            if phi < lo - self.overlap || phi > hi + self.overlap {
                continue;
            }
            let stripe = ss / self.num_sub_stripes_per_stripe;
            let nc = self.num_chunks[stripe as usize];
            let nsc = self.num_sub_chunks_per_chunk[ss as usize];
            let total = nc * nsc;
            let width = self.sub_chunk_width[ss as usize];
            let alpha = max_alpha(self.overlap, lo.abs().max(hi.abs()));

            let candidates: Vec<u32> = if alpha >= 180.0 - ANGLE_EPSILON || total == 1 {
                (0..total).collect()
            } else {
                let k_lo = ((theta - alpha) / width).floor() as i64;
                let k_hi = ((theta + alpha) / width).floor() as i64;
                if k_hi - k_lo + 1 >= total as i64 {
                    (0..total).collect()
                } else {
                    (k_lo..=k_hi)
                        .map(|k| k.rem_euclid(total as i64) as u32)
                        .collect()
                }
            };

            let kind = if stripe == own_stripe {
                OverlapKind::SelfAndFull
            } else {
                OverlapKind::Full
            };
            for k in candidates {
                let chunk_id = self.chunk_id(stripe, k / nsc);
                let sub_chunk_id = self.sub_chunk_id(ss % self.num_sub_stripes_per_stripe, k % nsc);
                if chunk_id == own_chunk && sub_chunk_id == own_sub_chunk {
                    continue;
                }
                // the candidate range is slightly generous: check the dilated bounds
                let Ok(bounds) = theta_band_box(k, total, lo, hi) else {
                    continue;
                };
                if !bounds.dilated_by(self.overlap).contains_point((theta, phi)) {
                    continue;
                }
                found.insert(OverlapTarget {
                    chunk_id,
                    sub_chunk_id,
                    kind,
                });
            }
        }
        found.into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Region queries
    // -----------------------------------------------------------------------

    /// Chunks and sub-chunks intersecting any of `regions`.
    ///
    /// Yields each intersecting chunk in increasing stripe order with a lazy
    /// iterator over its intersecting sub-chunks; see [`Coverage`].
    pub fn intersect<'a>(&'a self, regions: &'a [SphericalRegion]) -> ChunkIter<'a> {
        ChunkIter::new(self, regions)
    }
}

/// Latitude range of the `i`-th of `count` equal bands of height `height`.
fn band(i: u32, height: f64, count: u32) -> (f64, f64) {
    let lo = -90.0 + i as f64 * height;
    let hi = if i + 1 == count {
        90.0
    } else {
        -90.0 + (i + 1) as f64 * height
    };
    (lo, hi)
}

/// The `k`-th of `count` equal longitude segments of a latitude band.
fn theta_band_box(
    k: u32,
    count: u32,
    lo: f64,
    hi: f64,
) -> std::result::Result<SphericalBox, GeometryError> {
    if count == 1 {
        return SphericalBox::new(0.0, lo, 360.0, hi);
    }
    let width = 360.0 / count as f64;
    let max_theta = if k + 1 == count { 360.0 } else { (k + 1) as f64 * width };
    SphericalBox::new(k as f64 * width, lo, max_theta, hi)
}

fn expand(b: &SphericalBox) -> SphericalBox {
    let (min_theta, max_theta) = if b.has_full_theta() {
        (0.0, 360.0)
    } else {
        (
            b.min_theta() - ANGLE_EPSILON,
            b.min_theta() + b.theta_extent() + ANGLE_EPSILON,
        )
    };
    SphericalBox::new(
        min_theta,
        b.min_phi() - ANGLE_EPSILON,
        max_theta,
        b.max_phi() + ANGLE_EPSILON,
    )
    .unwrap_or(*b)
}
