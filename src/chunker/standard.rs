//! Chunking on the fixed stripe/chunk grid.
//!
//! Mappers route every row to its chunk file and to the overlap files of
//! neighboring sub-chunks, counting rows per sub-chunk. The reducer merges
//! the counts and writes the partition metadata and the list of chunks that
//! received no rows.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use csv::ByteRecord;
use tracing::info;

use crate::error::{PartitionError, Result};
use crate::partition::{OverlapKind, PartitionMap};

use super::dialect::{parse_position, with_ids};
use super::mapreduce::{Executor, Mapper, Reducer, run_job};
use super::split::{expand_inputs, input_splits};
use super::writer::{ChunkWriter, FileKind};
use super::{ChunkerConfig, ChunkingSummary, Mode, PartitionRow, prepare_output_dir, write_partitions};

/// Rows per sub-chunk of one chunk.
pub type SubChunkCounts = BTreeMap<u32, u64>;

pub struct StandardMapper<'a> {
    map: &'a PartitionMap,
    theta_column: usize,
    phi_column: usize,
    chunk_column: Option<usize>,
    writer: ChunkWriter,
    counts: BTreeMap<u32, SubChunkCounts>,
}

impl<'a> StandardMapper<'a> {
    pub fn new(map: &'a PartitionMap, config: &ChunkerConfig) -> Self {
        StandardMapper {
            map,
            theta_column: config.theta_column,
            phi_column: config.phi_column,
            chunk_column: config.chunk_column,
            writer: ChunkWriter::new(
                &config.output_dir,
                &config.chunk_prefix,
                config.output_dialect,
                config.output_buffer_size,
                config.max_open_writers,
            ),
            counts: BTreeMap::new(),
        }
    }

    fn write(&mut self, kind: FileKind, chunk_id: u32, row: &ByteRecord) -> Result<()> {
        let stripe = self.map.stripe_of(chunk_id);
        self.writer.write(kind, stripe, chunk_id, row)
    }
}

impl Mapper for StandardMapper<'_> {
    type Key = u32;
    type Value = SubChunkCounts;

    fn map(&mut self, row: &ByteRecord) -> Result<()> {
        let (theta, phi) = parse_position(row, self.theta_column, self.phi_column)?;
        let (chunk_id, sub_chunk_id) = self.map.locate(theta, phi);
        let neighbors = self.map.overlap_neighbors(theta, phi);
        // build every output row first so a bad chunk column skips the row
        // before anything is written
        let own = with_ids(row, chunk_id, sub_chunk_id, self.chunk_column)?;
        let copies = neighbors
            .iter()
            .map(|n| with_ids(row, n.chunk_id, n.sub_chunk_id, self.chunk_column))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.write(FileKind::Chunk, chunk_id, &own)?;
        *self
            .counts
            .entry(chunk_id)
            .or_default()
            .entry(sub_chunk_id)
            .or_default() += 1;
        for (n, copy) in neighbors.iter().zip(&copies) {
            self.write(FileKind::FullOverlap, n.chunk_id, copy)?;
            if n.kind == OverlapKind::SelfAndFull {
                self.write(FileKind::SelfOverlap, n.chunk_id, copy)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<(u32, SubChunkCounts)>> {
        self.writer.close_all()?;
        Ok(self.counts.into_iter().collect())
    }
}

pub struct StandardReducer<'a> {
    map: &'a PartitionMap,
    output_dir: PathBuf,
    prefix: String,
    rows: Vec<PartitionRow>,
    populated: BTreeSet<u32>,
}

impl<'a> StandardReducer<'a> {
    pub fn new(map: &'a PartitionMap, config: &ChunkerConfig) -> Self {
        StandardReducer {
            map,
            output_dir: config.output_dir.clone(),
            prefix: config.chunk_prefix.clone(),
            rows: Vec::new(),
            populated: BTreeSet::new(),
        }
    }
}

impl Reducer<u32, SubChunkCounts> for StandardReducer<'_> {
    /// `(chunks, sub_chunks)` holding rows.
    type Output = (u64, u64);

    fn reduce(&mut self, chunk_id: u32, values: Vec<SubChunkCounts>) -> Result<()> {
        let mut merged = SubChunkCounts::new();
        for counts in values {
            for (sub_chunk_id, n) in counts {
                *merged.entry(sub_chunk_id).or_default() += n;
            }
        }
        for (sub_chunk_id, row_count) in merged {
            let bounds = self.map.sub_chunk_bounds(chunk_id, sub_chunk_id)?;
            self.rows.push(PartitionRow {
                chunk_id,
                sub_chunk_id,
                row_count,
                theta_min: bounds.min_theta(),
                theta_max: bounds.min_theta() + bounds.theta_extent(),
                phi_min: bounds.min_phi(),
                phi_max: bounds.max_phi(),
                overlap: self.map.overlap(),
                alpha: self.map.overlap_alpha(&bounds),
            });
        }
        self.populated.insert(chunk_id);
        Ok(())
    }

    fn finish(self) -> Result<(u64, u64)> {
        write_partitions(&self.output_dir, &self.prefix, &self.rows)?;
        let path = self.output_dir.join(format!("{}EmptyChunks.txt", self.prefix));
        let mut w = BufWriter::new(File::create(path)?);
        let mut empty = 0;
        for chunk_id in self.map.chunk_ids() {
            if !self.populated.contains(&chunk_id) {
                writeln!(w, "{chunk_id}")?;
                empty += 1;
            }
        }
        w.flush()?;
        info!(
            populated = self.populated.len(),
            empty, "wrote partition metadata"
        );
        Ok((self.populated.len() as u64, self.rows.len() as u64))
    }
}

/// Run standard-mode chunking.
pub fn run(config: &ChunkerConfig) -> Result<ChunkingSummary> {
    let Mode::Standard {
        num_stripes,
        num_sub_stripes,
    } = config.mode
    else {
        return Err(PartitionError::Config(
            "standard chunking needs a standard-mode configuration".to_string(),
        ));
    };
    let map = PartitionMap::new(num_stripes, num_sub_stripes, config.overlap)?;
    let inputs = expand_inputs(&config.inputs)?;
    prepare_output_dir(&config.output_dir)?;
    let splits = input_splits(&inputs, config.input_split_size, config.skip_lines)?;
    info!(
        files = inputs.len(),
        splits = splits.len(),
        workers = config.num_workers,
        num_stripes,
        num_sub_stripes,
        "standard chunking"
    );

    let executor = Executor::new(config.num_workers)?;
    let ((chunks, sub_chunks), counts) = run_job(
        &executor,
        &splits,
        &config.input_dialect,
        |_| Ok(StandardMapper::new(&map, config)),
        StandardReducer::new(&map, config),
    )?;
    Ok(ChunkingSummary {
        rows_read: counts.read,
        rows_skipped: counts.skipped,
        chunks,
        sub_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::read_partitions;
    use crate::chunker::writer::chunk_file_path;
    use std::path::Path;

    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 as f64) / (u64::MAX as f64)
        }
    }

    fn run_on(input: &str, config: ChunkerConfig) -> (tempfile::TempDir, ChunkerConfig, ChunkingSummary) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, input).unwrap();
        let config = ChunkerConfig {
            inputs: vec![path.to_string_lossy().into_owned()],
            output_dir: dir.path().join("out"),
            ..config
        };
        let summary = crate::chunker::run(&config).unwrap();
        (dir, config, summary)
    }

    fn standard(num_stripes: u32, num_sub_stripes: u32, overlap: f64) -> ChunkerConfig {
        ChunkerConfig {
            overlap,
            mode: Mode::Standard {
                num_stripes,
                num_sub_stripes,
            },
            ..ChunkerConfig::default()
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        match std::fs::read_to_string(path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Every output line of every file under `dir`, keyed by file name.
    fn all_files(dir: &Path) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for stripe in std::fs::read_dir(dir).unwrap() {
            let stripe = stripe.unwrap().path();
            if !stripe.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(&stripe).unwrap() {
                let file = file.unwrap().path();
                let mut l = lines(&file);
                l.sort();
                out.insert(file.file_name().unwrap().to_string_lossy().into_owned(), l);
            }
        }
        out
    }

    #[test]
    fn three_point_catalog() {
        let (_dir, config, summary) = run_on("0,0\n10,0\n10,89.999\n", standard(18, 100, 0.0));
        let map = PartitionMap::new(18, 100, 0.0).unwrap();
        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_skipped, 0);

        let parts = read_partitions(&config.output_dir, "chunk").unwrap();
        assert_eq!(parts.iter().map(|p| p.row_count).sum::<u64>(), 3);
        assert_eq!(parts.len(), 3);
        let chunks: BTreeSet<u32> = parts.iter().map(|p| p.chunk_id).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.sub_chunks, 3);

        let (c0, s0) = map.locate(0.0, 0.0);
        let (polar, _) = map.locate(10.0, 89.999);
        assert_eq!(map.stripe_of(polar), 17);
        let equator = lines(&chunk_file_path(&config.output_dir, "chunk", FileKind::Chunk, 9, c0));
        assert_eq!(equator[0], format!("0,0,{c0},{s0}"));
        assert_eq!(equator.len(), 2);
        let polar_rows = lines(&chunk_file_path(&config.output_dir, "chunk", FileKind::Chunk, 17, polar));
        assert_eq!(polar_rows.len(), 1);

        // bounds in the metadata contain the rows they count
        for p in &parts {
            assert!(p.phi_min <= p.phi_max && p.theta_min < p.theta_max);
            assert_eq!(p.overlap, 0.0);
            assert_eq!(p.alpha, 0.0);
        }
        let empty = lines(&config.output_dir.join("chunkEmptyChunks.txt"));
        assert_eq!(empty.len(), map.chunk_ids().count() - 2);
        assert!(!empty.contains(&c0.to_string()));
    }

    #[test]
    fn overlap_rows_go_to_the_neighbor_only() {
        let map = PartitionMap::new(18, 1, 0.02).unwrap();
        let width = 360.0 / map.num_chunks(9) as f64;
        let input = format!("{},5.0\n{},5.0\n", width - 0.005, width + 0.005);
        let (_dir, config, summary) = run_on(&input, standard(18, 1, 0.02));
        assert_eq!(summary.rows_read, 2);

        let (a, _) = map.locate(width - 0.005, 5.0);
        let (b, _) = map.locate(width + 0.005, 5.0);
        assert_ne!(a, b);
        let files = all_files(&config.output_dir);
        let name = |prefix: &str, id: u32| format!("chunk{prefix}_{id}.csv");
        assert_eq!(files[&name("", a)].len(), 1);
        assert_eq!(files[&name("", b)].len(), 1);
        for (owner, other) in [(a, b), (b, a)] {
            let own_row = &files[&name("", owner)][0];
            let coords: Vec<&str> = own_row.split(',').take(2).collect();
            let full = &files[&name("FullOverlap", other)];
            let self_overlap = &files[&name("SelfOverlap", other)];
            for f in [full, self_overlap] {
                assert_eq!(f.len(), 1);
                assert!(f[0].starts_with(&coords.join(",")));
                assert!(f[0].ends_with(&format!(",{other},0")));
            }
        }
        // nothing else was written
        assert_eq!(files.len(), 6);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let input = "ra,dec,x,y\n1,2,,\nfoo,2,,\n3\n4,95,,\n5,6,,\n";
        let config = ChunkerConfig {
            skip_lines: 1,
            chunk_column: Some(2),
            ..standard(18, 10, 0.0)
        };
        let (_dir, config, summary) = run_on(input, config);
        assert_eq!(summary.rows_read, 5);
        assert_eq!(summary.rows_skipped, 3);
        let files = all_files(&config.output_dir);
        let rows: Vec<&String> = files.values().flatten().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.split(',').count() == 4));
    }

    #[test]
    fn parallel_run_matches_inline() {
        let mut rng = Rng(0xfeed_beef);
        let mut input = String::new();
        for i in 0..3000 {
            let theta = rng.next() * 360.0;
            let phi = (rng.next() * 2.0 - 1.0).asin().to_degrees();
            input.push_str(&format!("{theta},{phi},{i}\n"));
        }
        let base = ChunkerConfig {
            input_split_size: 4096,
            max_open_writers: 4,
            output_buffer_size: 256,
            ..standard(12, 4, 0.5)
        };
        let (_d1, c1, s1) = run_on(&input, base.clone());
        let (_d2, c2, s2) = run_on(
            &input,
            ChunkerConfig {
                num_workers: 4,
                ..base
            },
        );
        assert_eq!(s1, s2);
        assert_eq!(s1.rows_read, 3000);
        assert_eq!(
            read_partitions(&c1.output_dir, "chunk").unwrap(),
            read_partitions(&c2.output_dir, "chunk").unwrap()
        );
        assert_eq!(all_files(&c1.output_dir), all_files(&c2.output_dir));
        let parts = read_partitions(&c1.output_dir, "chunk").unwrap();
        assert_eq!(parts.iter().map(|p| p.row_count).sum::<u64>(), 3000);
    }
}
