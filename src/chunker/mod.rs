//! Partitioning of CSV catalogs into chunk and overlap files.
//!
//! Two drivers share the output layout: [`standard`] uses the fixed
//! stripe/chunk grid of a [`PartitionMap`](crate::partition::PartitionMap),
//! [`adaptive`] derives row-balanced boundaries from the data.

pub mod adaptive;
pub mod cache;
pub mod dialect;
pub mod histogram;
pub mod mapreduce;
pub mod split;
pub mod standard;
pub mod writer;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PartitionError, Result};

use self::dialect::CsvDialect;

/// Smallest histogram bin width accepted in adaptive mode, in degrees.
pub const MIN_BIN_SIZE: f64 = 1e-4;

/// Grid selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Fixed partitioning into equal-height stripes.
    Standard {
        num_stripes: u32,
        num_sub_stripes: u32,
    },
    /// Row-balanced partitioning derived from latitude and longitude
    /// histograms with bins `bin_size` degrees wide.
    Adaptive {
        num_chunks: u32,
        rows_per_sub_chunk: u64,
        bin_size: f64,
    },
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Standard {
            num_stripes: 18,
            num_sub_stripes: 100,
        }
    }
}

/// Settings for a chunking run.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Input files or glob patterns.
    pub inputs: Vec<String>,
    pub output_dir: PathBuf,
    pub chunk_prefix: String,
    pub theta_column: usize,
    pub phi_column: usize,
    /// First of two placeholder columns receiving the chunk and sub-chunk
    /// ids; `None` appends them to each row.
    pub chunk_column: Option<usize>,
    /// Header lines to skip at the start of each input file.
    pub skip_lines: usize,
    pub num_workers: usize,
    /// Overlap radius in degrees.
    pub overlap: f64,
    pub input_dialect: CsvDialect,
    pub output_dialect: CsvDialect,
    /// Bytes buffered per output file before it is appended to.
    pub output_buffer_size: usize,
    pub max_open_writers: usize,
    /// Target input split size in bytes.
    pub input_split_size: u64,
    pub mode: Mode,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            inputs: Vec::new(),
            output_dir: PathBuf::from("chunks"),
            chunk_prefix: "chunk".to_string(),
            theta_column: 0,
            phi_column: 1,
            chunk_column: None,
            skip_lines: 0,
            num_workers: 1,
            overlap: 1.0 / 60.0,
            input_dialect: CsvDialect::default(),
            output_dialect: CsvDialect::default(),
            output_buffer_size: 1 << 20,
            max_open_writers: 32,
            input_split_size: 64 << 20,
            mode: Mode::default(),
        }
    }
}

impl ChunkerConfig {
    /// Check every setting that can be checked without touching the
    /// filesystem.
    pub fn validate(&self) -> Result<()> {
        let config = |msg: String| Err(PartitionError::Config(msg));
        if self.inputs.is_empty() {
            return config("no input files given".to_string());
        }
        if self.theta_column == self.phi_column {
            return config("longitude and latitude columns must differ".to_string());
        }
        if let Some(c) = self.chunk_column {
            if [self.theta_column, self.phi_column].iter().any(|&p| p == c || p == c + 1) {
                return config(format!(
                    "chunk id columns {c} and {} overlap the position columns",
                    c + 1
                ));
            }
        }
        if self.chunk_prefix.is_empty() || self.chunk_prefix.contains(['/', '\\']) {
            return config(format!("invalid chunk prefix {:?}", self.chunk_prefix));
        }
        if self.num_workers < 1 {
            return config("number of workers must be at least 1".to_string());
        }
        if self.output_buffer_size < 1 || self.max_open_writers < 1 || self.input_split_size < 1 {
            return config(
                "output buffer size, max open writers and input split size must be positive"
                    .to_string(),
            );
        }
        self.input_dialect.validate()?;
        self.output_dialect.validate()?;
        match self.mode {
            Mode::Standard {
                num_stripes,
                num_sub_stripes,
            } => {
                crate::partition::PartitionMap::new(num_stripes, num_sub_stripes, self.overlap)?;
            }
            Mode::Adaptive {
                num_chunks,
                rows_per_sub_chunk,
                bin_size,
            } => {
                if num_chunks < 3 {
                    return config("adaptive mode needs at least 3 chunks".to_string());
                }
                if rows_per_sub_chunk < 1 {
                    return config("rows per sub-chunk must be at least 1".to_string());
                }
                if !(MIN_BIN_SIZE..=10.0).contains(&bin_size) {
                    return config(format!(
                        "bin size must be in [{MIN_BIN_SIZE}, 10] degrees, got {bin_size}"
                    ));
                }
                if !(self.overlap >= 0.0 && self.overlap < 90.0) {
                    return config(format!("overlap must be in [0, 90) degrees, got {}", self.overlap));
                }
            }
        }
        Ok(())
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkingSummary {
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub chunks: u64,
    pub sub_chunks: u64,
}

/// Validate the configuration and run the selected driver.
pub fn run(config: &ChunkerConfig) -> Result<ChunkingSummary> {
    config.validate()?;
    let summary = match config.mode {
        Mode::Standard { .. } => standard::run(config)?,
        Mode::Adaptive { .. } => adaptive::run(config)?,
    };
    info!(
        rows = summary.rows_read,
        skipped = summary.rows_skipped,
        chunks = summary.chunks,
        sub_chunks = summary.sub_chunks,
        "chunking finished"
    );
    Ok(summary)
}

/// Create the output directory, which must not exist or be empty.
pub(crate) fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(PartitionError::Config(format!(
                "output path {} is not a directory",
                dir.display()
            )));
        }
        if std::fs::read_dir(dir)?.next().is_some() {
            return Err(PartitionError::Config(format!(
                "output directory {} is not empty",
                dir.display()
            )));
        }
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Write `<dir>/<prefix>Partitions.csv` from rows sorted by
/// `(chunk_id, sub_chunk_id)`.
pub(crate) fn write_partitions(dir: &Path, prefix: &str, rows: &[PartitionRow]) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join(format!("{prefix}Partitions.csv")))?;
    for r in rows {
        w.write_record([
            r.chunk_id.to_string(),
            r.sub_chunk_id.to_string(),
            r.row_count.to_string(),
            r.theta_min.to_string(),
            r.theta_max.to_string(),
            r.phi_min.to_string(),
            r.phi_max.to_string(),
            r.overlap.to_string(),
            r.alpha.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// One row of the partition metadata file.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRow {
    pub chunk_id: u32,
    pub sub_chunk_id: u32,
    pub row_count: u64,
    pub theta_min: f64,
    pub theta_max: f64,
    pub phi_min: f64,
    pub phi_max: f64,
    pub overlap: f64,
    /// Longitude half-width of the overlap region.
    pub alpha: f64,
}

impl PartitionRow {
    /// Parse a metadata row as written by [`write_partitions`].
    pub fn from_record(record: &csv::StringRecord) -> Option<Self> {
        let f = |i: usize| record.get(i)?.parse::<f64>().ok();
        let u = |i: usize| record.get(i)?.parse::<u64>().ok();
        Some(PartitionRow {
            chunk_id: u32::try_from(u(0)?).ok()?,
            sub_chunk_id: u32::try_from(u(1)?).ok()?,
            row_count: u(2)?,
            theta_min: f(3)?,
            theta_max: f(4)?,
            phi_min: f(5)?,
            phi_max: f(6)?,
            overlap: f(7)?,
            alpha: f(8)?,
        })
    }
}

/// Read back `<dir>/<prefix>Partitions.csv`.
pub fn read_partitions(dir: &Path, prefix: &str) -> Result<Vec<PartitionRow>> {
    let path = dir.join(format!("{prefix}Partitions.csv"));
    let mut r = csv::ReaderBuilder::new().has_headers(false).from_path(&path)?;
    let mut rows = Vec::new();
    for record in r.records() {
        let record = record?;
        let row = PartitionRow::from_record(&record).ok_or_else(|| {
            PartitionError::Internal(format!("malformed partition row in {}", path.display()))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig {
            inputs: vec!["in.csv".to_string()],
            ..ChunkerConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_bad_settings() {
        let bad = [
            ChunkerConfig::default(),
            ChunkerConfig { phi_column: 0, ..config() },
            ChunkerConfig { chunk_column: Some(0), ..config() },
            ChunkerConfig { chunk_column: Some(1), ..config() },
            ChunkerConfig { chunk_prefix: "a/b".to_string(), ..config() },
            ChunkerConfig { num_workers: 0, ..config() },
            ChunkerConfig { max_open_writers: 0, ..config() },
            ChunkerConfig { overlap: 20.0, ..config() },
            ChunkerConfig {
                mode: Mode::Standard { num_stripes: 0, num_sub_stripes: 1 },
                ..config()
            },
            ChunkerConfig {
                mode: Mode::Adaptive { num_chunks: 2, rows_per_sub_chunk: 10, bin_size: 1.0 },
                ..config()
            },
            ChunkerConfig {
                mode: Mode::Adaptive { num_chunks: 20, rows_per_sub_chunk: 10, bin_size: 0.0 },
                ..config()
            },
            ChunkerConfig {
                mode: Mode::Adaptive { num_chunks: 20, rows_per_sub_chunk: 10, bin_size: 1e-9 },
                ..config()
            },
            ChunkerConfig {
                input_dialect: CsvDialect::default().with_delimiter(b'"'),
                ..config()
            },
        ];
        for (i, c) in bad.iter().enumerate() {
            assert!(
                matches!(c.validate(), Err(PartitionError::Config(_))),
                "case {i} accepted"
            );
        }
        assert!(ChunkerConfig { chunk_column: Some(2), ..config() }.validate().is_ok());
        let finest = Mode::Adaptive { num_chunks: 20, rows_per_sub_chunk: 10, bin_size: MIN_BIN_SIZE };
        assert!(ChunkerConfig { mode: finest, ..config() }.validate().is_ok());
    }

    #[test]
    fn output_dir_must_be_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        prepare_output_dir(&out).unwrap();
        prepare_output_dir(&out).unwrap();
        std::fs::write(out.join("x"), "").unwrap();
        assert!(matches!(prepare_output_dir(&out), Err(PartitionError::Config(_))));
    }
}
