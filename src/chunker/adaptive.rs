//! Row-balanced chunking.
//!
//! Boundaries are derived from the data instead of a fixed grid:
//!
//! 1. a latitude histogram of the input yields stripe boundaries holding
//!    roughly equal numbers of rows (the polar caps are fixed);
//! 2. rows are bucket-sorted into stripe files, with copies for the
//!    overlap of neighboring stripes, while per-stripe longitude
//!    histograms are collected;
//! 3. row-balanced chunk boundaries are derived per stripe and the stripe
//!    files are bucket-sorted into chunk files;
//! 4. every chunk file is memory-mapped and sorted by latitude, then by
//!    longitude, to cut it into row-balanced sub-stripes and sub-chunks.
//!
//! Intermediate rows carry a leading flag column: `0` for a row in its own
//! stripe or chunk, `1` for an overlap copy from another chunk of the same
//! stripe and `2` for an overlap copy from another stripe.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use csv::ByteRecord;
use memmap2::Mmap;
use tracing::{debug, info};

use crate::error::{PartitionError, Result};
use crate::geom::sphere::{max_alpha, reduce_theta};
use crate::region::SphericalBox;

use super::dialect::{CsvDialect, parse_position, with_ids};
use super::histogram::{CumulativeHistogram, Histogram};
use super::mapreduce::{Executor, Mapper, Reducer, run_job};
use super::split::{InputSplit, expand_inputs, input_splits};
use super::writer::{ChunkWriter, FileKind, chunk_file_path};
use super::{ChunkerConfig, ChunkingSummary, Mode, PartitionRow, prepare_output_dir, write_partitions};

/// Height of the polar cap stripes, in degrees.
pub const POLE_RADIUS: f64 = 1.0;

const TMP_DIR: &str = "adaptive_tmp";
const TMP_PREFIX: &str = "rows";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Own,
    SameStripe,
    OtherStripe,
}

impl RowKind {
    fn flag(self) -> &'static [u8] {
        match self {
            RowKind::Own => b"0",
            RowKind::SameStripe => b"1",
            RowKind::OtherStripe => b"2",
        }
    }

    fn parse(flag: &[u8]) -> Option<Self> {
        match flag {
            b"0" => Some(RowKind::Own),
            b"1" => Some(RowKind::SameStripe),
            b"2" => Some(RowKind::OtherStripe),
            _ => None,
        }
    }
}

fn flagged(kind: RowKind, row: &ByteRecord) -> ByteRecord {
    let mut out = ByteRecord::with_capacity(row.as_slice().len() + 1, row.len() + 1);
    out.push_field(kind.flag());
    out.extend(row.iter());
    out
}

/// Split an intermediate row into its flag and the original row.
fn unflagged(row: &ByteRecord) -> Result<(RowKind, ByteRecord)> {
    let kind = row
        .get(0)
        .and_then(RowKind::parse)
        .ok_or_else(|| PartitionError::Internal("intermediate row without a flag".to_string()))?;
    let mut out = ByteRecord::with_capacity(row.as_slice().len(), row.len().saturating_sub(1));
    out.extend(row.iter().skip(1));
    Ok((kind, out))
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Stripe and chunk boundaries of an adaptive partitioning.
#[derive(Debug, Clone)]
pub struct AdaptiveLayout {
    /// Stripe `s` covers latitudes `[phi_edges[s], phi_edges[s + 1]]`.
    phi_edges: Vec<f64>,
    /// Chunk `c` of stripe `s` covers longitudes
    /// `[theta_edges[s][c], theta_edges[s][c + 1]]`.
    theta_edges: Vec<Vec<f64>>,
    /// Chunk id multiplier for the stripe index.
    stride: u32,
    /// Chunk bounds dilated by the overlap radius.
    overlap_boxes: Vec<Vec<SphericalBox>>,
}

impl AdaptiveLayout {
    /// Polar caps plus `round(sqrt(num_chunks / 2))` stripes between them,
    /// cut at quantiles of the latitude histogram.
    pub fn stripe_edges(latitudes: &CumulativeHistogram, num_chunks: u32) -> Vec<f64> {
        let n = ((num_chunks as f64 / 2.0).sqrt().round() as usize).max(1);
        let lo = -90.0 + POLE_RADIUS;
        let hi = 90.0 - POLE_RADIUS;
        let below = latitudes.rows_below(lo);
        let rows = latitudes.rows_between(lo, hi);
        let mut edges = vec![-90.0, lo];
        for i in 1..n {
            let prev = edges[edges.len() - 1];
            let edge = if rows > 0.0 {
                latitudes.find_split(below + rows * i as f64 / n as f64)
            } else {
                lo + (hi - lo) * i as f64 / n as f64
            };
            edges.push(edge.clamp(prev, hi));
        }
        edges.push(hi);
        edges.push(90.0);
        edges
    }

    /// Complete a layout from stripe edges and per-stripe longitude
    /// histograms. Polar stripes get one chunk; the remaining
    /// `num_chunks - 2` are shared among the other stripes by row count.
    pub fn new(
        phi_edges: Vec<f64>,
        longitudes: &BTreeMap<usize, Histogram>,
        num_chunks: u32,
        overlap: f64,
    ) -> Result<Self> {
        let num_stripes = phi_edges.len() - 1;
        let inner = num_stripes.saturating_sub(2).max(1);
        let rows: Vec<u64> = (0..num_stripes)
            .map(|s| longitudes.get(&s).map_or(0, Histogram::total))
            .collect();
        let inner_rows: u64 = rows[1..num_stripes - 1].iter().sum();
        let budget = num_chunks.saturating_sub(2).max(1) as f64;

        let mut theta_edges = Vec::with_capacity(num_stripes);
        for s in 0..num_stripes {
            if s == 0 || s == num_stripes - 1 {
                theta_edges.push(vec![0.0, 360.0]);
                continue;
            }
            let n = if inner_rows > 0 {
                (budget * rows[s] as f64 / inner_rows as f64).round()
            } else {
                (budget / inner as f64).round()
            };
            let n = (n as usize).max(1);
            let cum = longitudes.get(&s).map(Histogram::cumulative);
            let mut edges = vec![0.0];
            for i in 1..n {
                let prev = edges[edges.len() - 1];
                let edge = match &cum {
                    Some(cum) if rows[s] > 0 => cum.find_split(rows[s] as f64 * i as f64 / n as f64),
                    _ => 360.0 * i as f64 / n as f64,
                };
                edges.push(edge.clamp(prev, 360.0));
            }
            edges.push(360.0);
            theta_edges.push(edges);
        }
        let stride = theta_edges.iter().map(|e| e.len() - 1).max().unwrap_or(1) as u32;

        let mut layout = AdaptiveLayout {
            phi_edges,
            theta_edges,
            stride,
            overlap_boxes: Vec::new(),
        };
        let mut overlap_boxes = Vec::with_capacity(num_stripes);
        for s in 0..num_stripes {
            let boxes = (0..layout.num_chunks(s))
                .map(|c| Ok(layout.chunk_bounds(s, c)?.dilated_by(overlap)))
                .collect::<Result<Vec<_>>>()?;
            overlap_boxes.push(boxes);
        }
        layout.overlap_boxes = overlap_boxes;
        Ok(layout)
    }

    pub fn num_stripes(&self) -> usize {
        self.phi_edges.len() - 1
    }

    pub fn num_chunks(&self, stripe: usize) -> usize {
        self.theta_edges[stripe].len() - 1
    }

    pub fn stripe_bounds(&self, stripe: usize) -> (f64, f64) {
        (self.phi_edges[stripe], self.phi_edges[stripe + 1])
    }

    pub fn stripe_of(&self, phi: f64) -> usize {
        let inner = &self.phi_edges[1..self.phi_edges.len() - 1];
        inner.partition_point(|&e| e <= phi)
    }

    pub fn chunk_of(&self, stripe: usize, theta: f64) -> usize {
        let edges = &self.theta_edges[stripe];
        edges[1..edges.len() - 1].partition_point(|&e| e <= theta)
    }

    pub fn chunk_id(&self, stripe: usize, chunk: usize) -> u32 {
        stripe as u32 * self.stride + chunk as u32
    }

    pub fn stripe_of_chunk(&self, chunk_id: u32) -> usize {
        (chunk_id / self.stride) as usize
    }

    pub fn chunk_bounds(&self, stripe: usize, chunk: usize) -> Result<SphericalBox> {
        let (lo, hi) = self.stripe_bounds(stripe);
        let edges = &self.theta_edges[stripe];
        Ok(SphericalBox::new(edges[chunk], lo, edges[chunk + 1], hi)?)
    }

    /// Stripes other than `stripe` whose band, widened by `overlap`,
    /// contains latitude `phi`.
    fn neighbor_stripes(&self, stripe: usize, phi: f64, overlap: f64) -> Vec<usize> {
        let mut out = Vec::new();
        if overlap <= 0.0 {
            return out;
        }
        for s in (0..stripe).rev() {
            if self.phi_edges[s + 1] + overlap < phi {
                break;
            }
            out.push(s);
        }
        for s in stripe + 1..self.num_stripes() {
            if self.phi_edges[s] - overlap > phi {
                break;
            }
            out.push(s);
        }
        out
    }

    /// Chunks of `stripe` whose overlap region contains the point.
    fn overlapping_chunks(&self, stripe: usize, theta: f64, phi: f64) -> impl Iterator<Item = usize> + '_ {
        self.overlap_boxes[stripe]
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.contains_point((theta, phi)))
            .map(|(c, _)| c)
    }
}

// ---------------------------------------------------------------------------
// Pass 1: latitude histogram
// ---------------------------------------------------------------------------

/// Checks a row the way every later pass reads it.
#[derive(Clone, Copy)]
struct RowFormat {
    theta_column: usize,
    phi_column: usize,
    chunk_column: Option<usize>,
}

impl RowFormat {
    fn position(&self, row: &ByteRecord) -> Result<(f64, f64)> {
        let (theta, phi) = parse_position(row, self.theta_column, self.phi_column)?;
        with_ids(row, 0, 0, self.chunk_column)?;
        Ok((reduce_theta(theta), phi))
    }
}

struct LatitudeMapper {
    format: RowFormat,
    histogram: Histogram,
}

impl Mapper for LatitudeMapper {
    type Key = ();
    type Value = Histogram;

    fn map(&mut self, row: &ByteRecord) -> Result<()> {
        let (_, phi) = self.format.position(row)?;
        self.histogram.add(phi);
        Ok(())
    }

    fn finish(self) -> Result<Vec<((), Histogram)>> {
        Ok(vec![((), self.histogram)])
    }
}

/// Merges histograms per key.
struct HistogramMerger<K>(BTreeMap<K, Histogram>);

impl<K: Ord> Reducer<K, Histogram> for HistogramMerger<K> {
    type Output = BTreeMap<K, Histogram>;

    fn reduce(&mut self, key: K, values: Vec<Histogram>) -> Result<()> {
        let mut values = values.into_iter();
        if let Some(mut merged) = values.next() {
            for h in values {
                merged.merge(&h);
            }
            self.0.insert(key, merged);
        }
        Ok(())
    }

    fn finish(self) -> Result<Self::Output> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Pass 2: stripe files and longitude histograms
// ---------------------------------------------------------------------------

struct StripeMapper<'a> {
    layout: &'a AdaptiveLayout,
    format: RowFormat,
    overlap: f64,
    bin_size: f64,
    writer: ChunkWriter,
    histograms: BTreeMap<usize, Histogram>,
}

impl Mapper for StripeMapper<'_> {
    type Key = usize;
    type Value = Histogram;

    fn map(&mut self, row: &ByteRecord) -> Result<()> {
        let (theta, phi) = self.format.position(row)?;
        let stripe = self.layout.stripe_of(phi);
        self.writer
            .write(FileKind::Chunk, stripe as u32, stripe as u32, &flagged(RowKind::Own, row))?;
        let bin_size = self.bin_size;
        self.histograms
            .entry(stripe)
            .or_insert_with(|| Histogram::new(0.0, 360.0, bin_size))
            .add(theta);
        for s in self.layout.neighbor_stripes(stripe, phi, self.overlap) {
            self.writer
                .write(FileKind::Chunk, s as u32, s as u32, &flagged(RowKind::OtherStripe, row))?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<(usize, Histogram)>> {
        self.writer.close_all()?;
        Ok(self.histograms.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Pass 3: chunk files
// ---------------------------------------------------------------------------

struct ChunkMapper<'a> {
    layout: &'a AdaptiveLayout,
    stripe: usize,
    format: RowFormat,
    writer: ChunkWriter,
    counts: BTreeMap<u32, u64>,
}

impl Mapper for ChunkMapper<'_> {
    type Key = u32;
    type Value = u64;

    fn map(&mut self, row: &ByteRecord) -> Result<()> {
        let (kind, original) = unflagged(row)?;
        let (theta, phi) = self.format.position(&original)?;
        let stripe = self.stripe;
        match kind {
            RowKind::Own => {
                let own = self.layout.chunk_of(stripe, theta);
                let own_id = self.layout.chunk_id(stripe, own);
                self.writer.write(FileKind::Chunk, stripe as u32, own_id, row)?;
                *self.counts.entry(own_id).or_default() += 1;
                let copy = flagged(RowKind::SameStripe, &original);
                for c in self.layout.overlapping_chunks(stripe, theta, phi) {
                    if c != own {
                        let id = self.layout.chunk_id(stripe, c);
                        self.writer.write(FileKind::Chunk, stripe as u32, id, &copy)?;
                    }
                }
            }
            RowKind::OtherStripe => {
                for c in self.layout.overlapping_chunks(stripe, theta, phi) {
                    let id = self.layout.chunk_id(stripe, c);
                    self.writer.write(FileKind::Chunk, stripe as u32, id, row)?;
                }
            }
            RowKind::SameStripe => {
                return Err(PartitionError::Internal(
                    "same-stripe overlap row in a stripe file".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<(u32, u64)>> {
        self.writer.close_all()?;
        Ok(self.counts.into_iter().collect())
    }
}

struct CountSummer(BTreeMap<u32, u64>);

impl Reducer<u32, u64> for CountSummer {
    type Output = BTreeMap<u32, u64>;

    fn reduce(&mut self, key: u32, values: Vec<u64>) -> Result<()> {
        self.0.insert(key, values.into_iter().sum());
        Ok(())
    }

    fn finish(self) -> Result<Self::Output> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Pass 4: sub-chunks
// ---------------------------------------------------------------------------

struct Entry {
    theta: f64,
    phi: f64,
    kind: RowKind,
    row: ByteRecord,
}

/// Number of roughly equal groups of about `target` rows each for `n` rows.
fn groups(n: usize, target: f64) -> usize {
    ((n as f64 / target).round() as usize).clamp(1, n.max(1))
}

/// Cut positions splitting `n` sorted items into `k` near-equal runs.
fn cuts(n: usize, k: usize) -> Vec<usize> {
    (0..=k).map(|i| i * n / k).collect()
}

/// Boundaries halfway between the last and first values of adjacent runs,
/// bracketed by `lo` and `hi`.
fn edges_between(values: &[f64], cuts: &[usize], lo: f64, hi: f64) -> Vec<f64> {
    let mut edges = vec![lo];
    for &c in &cuts[1..cuts.len() - 1] {
        let mid = if c == 0 || c >= values.len() {
            lo
        } else {
            0.5 * (values[c - 1] + values[c])
        };
        let prev = edges[edges.len() - 1];
        edges.push(mid.clamp(prev, hi));
    }
    edges.push(hi);
    edges
}

struct SubChunkContext<'a> {
    layout: &'a AdaptiveLayout,
    config: &'a ChunkerConfig,
    chunk_dir: &'a Path,
    rows_per_sub_chunk: f64,
}

impl SubChunkContext<'_> {
    fn read_chunk(&self, stripe: usize, chunk_id: u32) -> Result<(Vec<Entry>, Vec<Entry>)> {
        let path = chunk_file_path(self.chunk_dir, TMP_PREFIX, FileKind::Chunk, stripe as u32, chunk_id);
        let file = File::open(&path)?;
        let mut own = Vec::new();
        let mut others = Vec::new();
        if file.metadata()?.len() == 0 {
            return Ok((own, others));
        }
        // SAFETY: chunk files are complete and no longer written once pass 3 returns
        let mmap = unsafe { Mmap::map(&file)? };
        let mut reader = CsvDialect::default().reader(&mmap[..]);
        let format = RowFormat {
            theta_column: self.config.theta_column,
            phi_column: self.config.phi_column,
            chunk_column: self.config.chunk_column,
        };
        for record in reader.byte_records() {
            let (kind, row) = unflagged(&record?)?;
            let (theta, phi) = format.position(&row)?;
            let entry = Entry {
                theta,
                phi,
                kind,
                row,
            };
            if kind == RowKind::Own {
                own.push(entry);
            } else {
                others.push(entry);
            }
        }
        Ok((own, others))
    }

    /// Cut one chunk into sub-chunks, write its output files and return its
    /// partition metadata.
    fn process(&self, chunk_id: u32) -> Result<Vec<PartitionRow>> {
        let layout = self.layout;
        let stripe = layout.stripe_of_chunk(chunk_id);
        let chunk = chunk_id as usize - stripe * layout.stride as usize;
        let bounds = layout.chunk_bounds(stripe, chunk)?;
        let (t_lo, p_lo) = (bounds.min_theta(), bounds.min_phi());
        let (t_hi, p_hi) = (t_lo + bounds.theta_extent(), bounds.max_phi());
        let overlap = self.config.overlap;

        let (mut own, others) = self.read_chunk(stripe, chunk_id)?;
        if own.is_empty() {
            return Ok(Vec::new());
        }
        let n = own.len();
        let total_groups = groups(n, self.rows_per_sub_chunk);
        let num_sub_stripes = ((total_groups as f64).sqrt().round() as usize).clamp(1, n);

        own.sort_by(|a, b| a.phi.total_cmp(&b.phi));
        let phis: Vec<f64> = own.iter().map(|e| e.phi).collect();
        let ss_cuts = cuts(n, num_sub_stripes);
        let phi_edges = edges_between(&phis, &ss_cuts, p_lo, p_hi);

        // per sub-stripe: sub-chunk cuts (in the theta-sorted slice) and edges
        let mut sub_cuts = Vec::with_capacity(num_sub_stripes);
        let mut theta_edges = Vec::with_capacity(num_sub_stripes);
        for j in 0..num_sub_stripes {
            let slice = &mut own[ss_cuts[j]..ss_cuts[j + 1]];
            slice.sort_by(|a, b| a.theta.total_cmp(&b.theta));
            let thetas: Vec<f64> = slice.iter().map(|e| e.theta).collect();
            let k = groups(slice.len(), self.rows_per_sub_chunk);
            let c = cuts(slice.len(), k);
            theta_edges.push(edges_between(&thetas, &c, t_lo, t_hi));
            sub_cuts.push(c);
        }
        let sub_stride = sub_cuts.iter().map(|c| c.len() - 1).max().unwrap_or(1);
        let sub_chunk_id = |j: usize, i: usize| (j * sub_stride + i) as u32;

        let mut boxes = Vec::with_capacity(num_sub_stripes);
        for j in 0..num_sub_stripes {
            let row: Vec<SphericalBox> = (0..theta_edges[j].len() - 1)
                .map(|i| {
                    SphericalBox::new(theta_edges[j][i], phi_edges[j], theta_edges[j][i + 1], phi_edges[j + 1])
                })
                .collect::<std::result::Result<_, _>>()?;
            boxes.push(row);
        }
        let dilated: Vec<Vec<SphericalBox>> = boxes
            .iter()
            .map(|row| row.iter().map(|b| b.dilated_by(overlap)).collect())
            .collect();

        let mut writer = ChunkWriter::new(
            &self.config.output_dir,
            &self.config.chunk_prefix,
            self.config.output_dialect,
            self.config.output_buffer_size,
            self.config.max_open_writers.max(3),
        );
        let chunk_column = self.config.chunk_column;
        let stripe_u32 = stripe as u32;

        let mut partitions = Vec::new();
        for j in 0..num_sub_stripes {
            let base = ss_cuts[j];
            for i in 0..sub_cuts[j].len() - 1 {
                let id = sub_chunk_id(j, i);
                let members = &own[base + sub_cuts[j][i]..base + sub_cuts[j][i + 1]];
                for e in members {
                    writer.write(FileKind::Chunk, stripe_u32, chunk_id, &with_ids(&e.row, chunk_id, id, chunk_column)?)?;
                }
                let b = &boxes[j][i];
                partitions.push(PartitionRow {
                    chunk_id,
                    sub_chunk_id: id,
                    row_count: members.len() as u64,
                    theta_min: theta_edges[j][i],
                    theta_max: theta_edges[j][i + 1],
                    phi_min: phi_edges[j],
                    phi_max: phi_edges[j + 1],
                    overlap,
                    alpha: max_alpha(overlap, b.min_phi().abs().max(b.max_phi().abs())),
                });
            }
        }

        if overlap > 0.0 {
            let mut own_ids = Vec::with_capacity(n);
            for j in 0..num_sub_stripes {
                for i in 0..sub_cuts[j].len() - 1 {
                    let len = sub_cuts[j][i + 1] - sub_cuts[j][i];
                    own_ids.extend(std::iter::repeat_n((j, i), len));
                }
            }
            let everyone = own
                .iter()
                .zip(own_ids.iter().map(|&ji| Some(ji)))
                .chain(others.iter().zip(std::iter::repeat(None)));
            for (e, home) in everyone {
                for j in 0..num_sub_stripes {
                    if e.phi < phi_edges[j] - overlap || e.phi > phi_edges[j + 1] + overlap {
                        continue;
                    }
                    for (i, d) in dilated[j].iter().enumerate() {
                        if home == Some((j, i)) || !d.contains_point((e.theta, e.phi)) {
                            continue;
                        }
                        let copy = with_ids(&e.row, chunk_id, sub_chunk_id(j, i), chunk_column)?;
                        writer.write(FileKind::FullOverlap, stripe_u32, chunk_id, &copy)?;
                        if e.kind != RowKind::OtherStripe {
                            writer.write(FileKind::SelfOverlap, stripe_u32, chunk_id, &copy)?;
                        }
                    }
                }
            }
        }
        writer.close_all()?;
        debug!(chunk_id, rows = n, sub_chunks = partitions.len(), "sub-partitioned chunk");
        Ok(partitions)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run adaptive-mode chunking.
pub fn run(config: &ChunkerConfig) -> Result<ChunkingSummary> {
    let Mode::Adaptive {
        num_chunks,
        rows_per_sub_chunk,
        bin_size,
    } = config.mode
    else {
        return Err(PartitionError::Config(
            "adaptive chunking needs an adaptive-mode configuration".to_string(),
        ));
    };
    let inputs = expand_inputs(&config.inputs)?;
    prepare_output_dir(&config.output_dir)?;
    let tmp = config.output_dir.join(TMP_DIR);
    let stripe_dir = tmp.join("stripes");
    let chunk_dir = tmp.join("chunks");
    std::fs::create_dir_all(&stripe_dir)?;
    std::fs::create_dir_all(&chunk_dir)?;
    let splits = input_splits(&inputs, config.input_split_size, config.skip_lines)?;
    let executor = Executor::new(config.num_workers)?;
    let format = RowFormat {
        theta_column: config.theta_column,
        phi_column: config.phi_column,
        chunk_column: config.chunk_column,
    };
    let internal = CsvDialect::default();
    info!(files = inputs.len(), splits = splits.len(), num_chunks, "adaptive chunking");

    // pass 1
    let (latitudes, counts) = run_job(
        &executor,
        &splits,
        &config.input_dialect,
        |_| {
            Ok(LatitudeMapper {
                format,
                histogram: Histogram::new(-90.0, 90.0, bin_size),
            })
        },
        HistogramMerger(BTreeMap::new()),
    )?;
    let latitudes = latitudes
        .get(&())
        .map(Histogram::cumulative)
        .unwrap_or_else(|| Histogram::new(-90.0, 90.0, bin_size).cumulative());
    let phi_edges = AdaptiveLayout::stripe_edges(&latitudes, num_chunks);
    info!(stripes = phi_edges.len() - 1, rows = counts.read - counts.skipped, "stripe boundaries");

    // pass 2: the layout is provisional (one chunk per stripe) until the
    // longitude histograms are known
    let stripes_only = AdaptiveLayout::new(phi_edges.clone(), &BTreeMap::new(), 3, config.overlap)?;
    let (longitudes, _) = run_job(
        &executor,
        &splits,
        &config.input_dialect,
        |_| {
            Ok(StripeMapper {
                layout: &stripes_only,
                format,
                overlap: config.overlap,
                bin_size,
                writer: ChunkWriter::new(&stripe_dir, TMP_PREFIX, internal, config.output_buffer_size, config.max_open_writers),
                histograms: BTreeMap::new(),
            })
        },
        HistogramMerger(BTreeMap::new()),
    )?;
    let layout = AdaptiveLayout::new(phi_edges, &longitudes, num_chunks, config.overlap)?;

    // pass 3
    let mut stripe_splits = Vec::new();
    let mut split_stripes = Vec::new();
    for s in 0..layout.num_stripes() {
        let path = chunk_file_path(&stripe_dir, TMP_PREFIX, FileKind::Chunk, s as u32, s as u32);
        if path.exists() {
            stripe_splits.push(InputSplit::whole(&path)?);
            split_stripes.push(s);
        }
    }
    let (chunk_rows, _) = run_job(
        &executor,
        &stripe_splits,
        &internal,
        |i| {
            Ok(ChunkMapper {
                layout: &layout,
                stripe: split_stripes[i],
                format: RowFormat {
                    theta_column: format.theta_column + 1,
                    phi_column: format.phi_column + 1,
                    chunk_column: None,
                },
                writer: ChunkWriter::new(&chunk_dir, TMP_PREFIX, internal, config.output_buffer_size, config.max_open_writers),
                counts: BTreeMap::new(),
            })
        },
        CountSummer(BTreeMap::new()),
    )?;
    std::fs::remove_dir_all(&stripe_dir)?;
    info!(chunks = chunk_rows.len(), "chunk files written");

    // pass 4
    let context = SubChunkContext {
        layout: &layout,
        config,
        chunk_dir: &chunk_dir,
        rows_per_sub_chunk: rows_per_sub_chunk as f64,
    };
    let chunk_ids: Vec<u32> = chunk_rows.keys().copied().collect();
    let partitions: Vec<PartitionRow> = executor
        .map(&chunk_ids, |&id| context.process(id))?
        .into_iter()
        .flatten()
        .collect();
    write_partitions(&config.output_dir, &config.chunk_prefix, &partitions)?;
    std::fs::remove_dir_all(&tmp)?;

    Ok(ChunkingSummary {
        rows_read: counts.read,
        rows_skipped: counts.skipped,
        chunks: chunk_ids.len() as u64,
        sub_chunks: partitions.len() as u64,
    })
}
