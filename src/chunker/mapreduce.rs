//! A small map/reduce driver over input splits.
//!
//! Each split is processed by its own [`Mapper`], on the calling thread or
//! on a rayon pool. Mappers share no state: they hand their key/value
//! output back by value. Reduction starts only after every split has been
//! mapped, and visits keys in increasing order.

use std::collections::BTreeMap;

use csv::ByteRecord;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{PartitionError, Result};

use super::dialect::CsvDialect;
use super::split::InputSplit;

/// Per-row processing of one input split.
pub trait Mapper {
    type Key: Ord + Send;
    type Value: Send;

    /// Process one row. [`PartitionError::Row`] skips the row, any other
    /// error aborts the job.
    fn map(&mut self, row: &ByteRecord) -> Result<()>;

    /// Flush outputs and return the accumulated key/value pairs.
    fn finish(self) -> Result<Vec<(Self::Key, Self::Value)>>;
}

/// Combines the values emitted for each key by all mappers.
pub trait Reducer<K, V> {
    type Output;

    fn reduce(&mut self, key: K, values: Vec<V>) -> Result<()>;

    fn finish(self) -> Result<Self::Output>;
}

/// Where map tasks run.
pub enum Executor {
    /// On the calling thread, one after another.
    Inline,
    Pool(rayon::ThreadPool),
}

impl Executor {
    /// An inline executor for a single worker, a pool otherwise.
    pub fn new(num_workers: usize) -> Result<Self> {
        if num_workers <= 1 {
            return Ok(Executor::Inline);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("chunker-{i}"))
            .build()
            .map_err(|e| PartitionError::WorkerPool(e.to_string()))?;
        Ok(Executor::Pool(pool))
    }

    /// Apply `f` to every item, returning results in item order. The first
    /// error aborts the batch.
    pub fn map<T, U, F>(&self, items: &[T], f: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> Result<U> + Sync + Send,
    {
        match self {
            Executor::Pool(pool) if items.len() > 1 => {
                pool.install(|| items.par_iter().map(&f).collect())
            }
            _ => items.iter().map(f).collect(),
        }
    }
}

/// Rows seen by a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub read: u64,
    pub skipped: u64,
}

impl std::ops::AddAssign for RowCounts {
    fn add_assign(&mut self, other: RowCounts) {
        self.read += other.read;
        self.skipped += other.skipped;
    }
}

/// Map every split, then reduce the grouped output. `make_mapper` receives
/// the index of the split the mapper will process.
pub fn run_job<M, R, F>(
    executor: &Executor,
    splits: &[InputSplit],
    dialect: &CsvDialect,
    make_mapper: F,
    mut reducer: R,
) -> Result<(R::Output, RowCounts)>
where
    M: Mapper,
    R: Reducer<M::Key, M::Value>,
    F: Fn(usize) -> Result<M> + Sync + Send,
{
    let indexed: Vec<(usize, &InputSplit)> = splits.iter().enumerate().collect();
    let mapped = executor.map(&indexed, |&(i, split)| map_split(split, dialect, make_mapper(i)?))?;

    let mut counts = RowCounts::default();
    let mut grouped: BTreeMap<M::Key, Vec<M::Value>> = BTreeMap::new();
    for (pairs, split_counts) in mapped {
        counts += split_counts;
        for (key, value) in pairs {
            grouped.entry(key).or_default().push(value);
        }
    }
    for (key, values) in grouped {
        reducer.reduce(key, values)?;
    }
    Ok((reducer.finish()?, counts))
}

#[allow(clippy::type_complexity)]
fn map_split<M: Mapper>(
    split: &InputSplit,
    dialect: &CsvDialect,
    mut mapper: M,
) -> Result<(Vec<(M::Key, M::Value)>, RowCounts)> {
    let mut counts = RowCounts::default();
    let mut reader = split.reader(dialect)?;
    let mut row = ByteRecord::new();
    let mut line = 0usize;
    while reader.read_byte_record(&mut row)? {
        line += 1;
        if line <= split.lines_to_skip {
            continue;
        }
        counts.read += 1;
        match mapper.map(&row) {
            Ok(()) => {}
            Err(PartitionError::Row(e)) => {
                counts.skipped += 1;
                let position = row.position().map(|p| p.line()).unwrap_or(0);
                warn!(
                    path = %split.path.display(),
                    offset = split.offset,
                    line = position,
                    "skipping row: {e}"
                );
            }
            Err(e) => return Err(e),
        }
    }
    debug!(
        path = %split.path.display(),
        offset = split.offset,
        rows = counts.read,
        "mapped split"
    );
    Ok((mapper.finish()?, counts))
}
