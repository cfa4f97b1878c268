//! Sweep of region bounding boxes over the partition.
//!
//! Region bounding boxes (split in two when they wrap the 0/360 seam) are
//! sorted by minimum latitude and swept stripe by stripe. Each stripe keeps
//! an active list: boxes are added once their minimum latitude is reached
//! and removed once the stripe passes their maximum latitude.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::region::{SphericalBox, SphericalRegion};

use super::{PartitionMap, band};

/// How the input regions cover a sub-chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// Some region contains the whole sub-chunk.
    Full,
    /// Indices (into the query's region slice) of the regions that
    /// intersect the sub-chunk without containing it.
    Partial(Vec<usize>),
}

/// A non-wrapping bounding box piece of one input region.
#[derive(Debug, Clone, Copy)]
struct Piece {
    bbox: SphericalBox,
    region: usize,
}

/// Iterator over the chunks intersecting a set of regions.
pub struct ChunkIter<'a> {
    map: &'a PartitionMap,
    regions: &'a [SphericalRegion],
    pieces: Vec<Piece>,
    next_piece: usize,
    active: Vec<Piece>,
    stripe: u32,
    pending: VecDeque<(u32, Vec<Piece>)>,
}

impl<'a> ChunkIter<'a> {
    pub(crate) fn new(map: &'a PartitionMap, regions: &'a [SphericalRegion]) -> Self {
        let mut pieces: Vec<Piece> = regions
            .iter()
            .enumerate()
            .flat_map(|(region, r)| {
                let bbox = r.bounding_box();
                let split = if bbox.is_empty() {
                    Vec::new()
                } else {
                    bbox.split_wrapping()
                };
                split.into_iter().map(move |bbox| Piece { bbox, region })
            })
            .collect();
        pieces.sort_by(|a, b| a.bbox.min_phi().total_cmp(&b.bbox.min_phi()));
        ChunkIter {
            map,
            regions,
            pieces,
            next_piece: 0,
            active: Vec::new(),
            stripe: 0,
            pending: VecDeque::new(),
        }
    }

    /// Sweep the next stripe, queueing the chunks it finds.
    fn sweep_stripe(&mut self) {
        let map = self.map;
        let stripe = self.stripe;
        self.stripe += 1;
        let (lo, hi) = band(stripe, map.stripe_height, map.num_stripes);

        while let Some(piece) = self.pieces.get(self.next_piece) {
            if piece.bbox.min_phi() > hi {
                break;
            }
            self.active.push(*piece);
            self.next_piece += 1;
        }
        self.active.retain(|p| p.bbox.max_phi() >= lo);
        if self.active.is_empty() {
            return;
        }

        let nc = map.num_chunks[stripe as usize];
        let width = 360.0 / nc as f64;
        let mut candidates: BTreeMap<u32, Vec<Piece>> = BTreeMap::new();
        for piece in &self.active {
            for chunk in theta_range(&piece.bbox, width, nc) {
                candidates.entry(chunk).or_default().push(*piece);
            }
        }
        for (chunk, pieces) in candidates {
            let chunk_id = map.chunk_id(stripe, chunk);
            let Ok(chunk_box) = map.chunk_bounding_box(chunk_id) else {
                continue;
            };
            let hits: Vec<Piece> = pieces
                .into_iter()
                .filter(|p| self.regions[p.region].intersects_box(&chunk_box))
                .collect();
            if !hits.is_empty() {
                self.pending.push_back((chunk_id, hits));
            }
        }
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = (u32, SubChunkIter<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((chunk_id, pieces)) = self.pending.pop_front() {
                return Some((
                    chunk_id,
                    SubChunkIter::new(self.map, self.regions, chunk_id, pieces),
                ));
            }
            if self.stripe >= self.map.num_stripes {
                return None;
            }
            self.sweep_stripe();
        }
    }
}

/// Iterator over the sub-chunks of one chunk that intersect the regions,
/// with their [`Coverage`].
pub struct SubChunkIter<'a> {
    map: &'a PartitionMap,
    regions: &'a [SphericalRegion],
    chunk_id: u32,
    stripe: u32,
    chunk: u32,
    pieces: Vec<Piece>,
    sub_stripe: u32,
    pending: VecDeque<(u32, Coverage)>,
}

impl<'a> SubChunkIter<'a> {
    fn new(
        map: &'a PartitionMap,
        regions: &'a [SphericalRegion],
        chunk_id: u32,
        pieces: Vec<Piece>,
    ) -> Self {
        SubChunkIter {
            map,
            regions,
            chunk_id,
            stripe: map.stripe_of(chunk_id),
            chunk: map.chunk_in_stripe(chunk_id),
            pieces,
            sub_stripe: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn chunk_id(&self) -> u32 {
        self.chunk_id
    }

    fn sweep_sub_stripe(&mut self) {
        let map = self.map;
        let ss_in = self.sub_stripe;
        self.sub_stripe += 1;
        let ss = self.stripe * map.num_sub_stripes_per_stripe + ss_in;
        let (lo, hi) = band(ss, map.sub_stripe_height, map.total_sub_stripes());
        let nc = map.num_chunks[self.stripe as usize];
        let nsc = map.num_sub_chunks_per_chunk[ss as usize];
        let width = map.sub_chunk_width[ss as usize];

        let mut candidates: BTreeMap<u32, BTreeSet<usize>> = BTreeMap::new();
        for piece in &self.pieces {
            if piece.bbox.max_phi() < lo || piece.bbox.min_phi() > hi {
                continue;
            }
            for k in theta_range(&piece.bbox, width, nc * nsc) {
                if k / nsc == self.chunk {
                    candidates.entry(k % nsc).or_default().insert(piece.region);
                }
            }
        }
        for (sc, regions) in candidates {
            let sub_chunk_id = map.sub_chunk_id(ss_in, sc);
            let Ok(sub_box) = map.sub_chunk_bounding_box(self.chunk_id, sub_chunk_id) else {
                continue;
            };
            if regions.iter().any(|&r| self.regions[r].contains_box(&sub_box)) {
                self.pending.push_back((sub_chunk_id, Coverage::Full));
                continue;
            }
            let partial: Vec<usize> = regions
                .into_iter()
                .filter(|&r| self.regions[r].intersects_box(&sub_box))
                .collect();
            if !partial.is_empty() {
                self.pending.push_back((sub_chunk_id, Coverage::Partial(partial)));
            }
        }
    }
}

impl Iterator for SubChunkIter<'_> {
    type Item = (u32, Coverage);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.sub_stripe >= self.map.num_sub_stripes_per_stripe {
                return None;
            }
            self.sweep_sub_stripe();
        }
    }
}

/// Indices of the `count` equal longitude segments of width `width` that a
/// non-wrapping box overlaps.
fn theta_range(b: &SphericalBox, width: f64, count: u32) -> std::ops::RangeInclusive<u32> {
    if count == 1 || b.has_full_theta() {
        return 0..=count - 1;
    }
    let lo = ((b.min_theta() / width).floor().max(0.0) as u32).min(count - 1);
    let hi = ((b.max_theta() / width).floor().max(0.0) as u32).min(count - 1);
    lo..=hi
}
