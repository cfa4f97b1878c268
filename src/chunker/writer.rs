//! Output files: buffered CSV writers over append-mode, lock-protected files.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::ByteRecord;
use fs2::FileExt;

use crate::error::Result;

use super::cache::{PooledWriter, WriterCache};
use super::dialect::CsvDialect;

/// Append-mode file sink. Writes collect in memory; `flush` appends them
/// to the file (opened on first use) under an exclusive advisory lock, so
/// several processes may append whole rows to the same file.
struct LockedAppend {
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
}

impl Write for LockedAppend {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let file = match &mut self.file {
            Some(file) => file,
            None => self.file.insert(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            ),
        };
        file.lock_exclusive()?;
        let written = file.write_all(&self.buf);
        let unlocked = FileExt::unlock(&*file);
        written?;
        unlocked?;
        self.buf.clear();
        Ok(())
    }
}

/// A CSV writer appending to one file. Rows are buffered and appended once
/// at least `buffer_size` bytes are pending.
pub struct CsvFileWriter {
    inner: csv::Writer<LockedAppend>,
    buffer_size: usize,
}

impl CsvFileWriter {
    /// Prepare a writer for `path`, creating its parent directory. The file
    /// itself is created on the first flush.
    pub fn open(path: &Path, dialect: &CsvDialect, buffer_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sink = LockedAppend {
            path: path.to_path_buf(),
            file: None,
            buf: Vec::new(),
        };
        Ok(CsvFileWriter {
            inner: dialect.writer(sink),
            buffer_size,
        })
    }

    pub fn write(&mut self, row: &ByteRecord) -> Result<()> {
        self.inner.write_byte_record(row)?;
        // the csv writer keeps its own small buffer; flushing it here, at
        // a row boundary, hands only whole rows to the file
        if self.inner.get_ref().buf.len() >= self.buffer_size {
            self.inner.flush()?;
        }
        Ok(())
    }
}

impl PooledWriter for CsvFileWriter {
    fn close(mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// The three files each chunk may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Chunk,
    SelfOverlap,
    FullOverlap,
}

/// `<dir>/stripe_<stripe>/<prefix>[SelfOverlap|FullOverlap]_<chunk_id>.csv`.
pub fn chunk_file_path(dir: &Path, prefix: &str, kind: FileKind, stripe: u32, chunk_id: u32) -> PathBuf {
    let infix = match kind {
        FileKind::Chunk => "",
        FileKind::SelfOverlap => "SelfOverlap",
        FileKind::FullOverlap => "FullOverlap",
    };
    dir.join(format!("stripe_{stripe}"))
        .join(format!("{prefix}{infix}_{chunk_id}.csv"))
}

/// Routes rows to per-chunk files through a bounded [`WriterCache`].
///
/// The cache holds one entry per file, so a chunk's own, self-overlap and
/// full-overlap files are opened and evicted independently.
pub struct ChunkWriter {
    dir: PathBuf,
    prefix: String,
    dialect: CsvDialect,
    buffer_size: usize,
    cache: WriterCache<(FileKind, u32), CsvFileWriter>,
}

impl ChunkWriter {
    pub fn new(
        dir: &Path,
        prefix: &str,
        dialect: CsvDialect,
        buffer_size: usize,
        max_open_writers: usize,
    ) -> Self {
        ChunkWriter {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            dialect,
            buffer_size,
            cache: WriterCache::new(max_open_writers),
        }
    }

    pub fn write(&mut self, kind: FileKind, stripe: u32, chunk_id: u32, row: &ByteRecord) -> Result<()> {
        let path = || chunk_file_path(&self.dir, &self.prefix, kind, stripe, chunk_id);
        let (dialect, buffer_size) = (self.dialect, self.buffer_size);
        self.cache
            .get_or_open(&(kind, chunk_id), || {
                CsvFileWriter::open(&path(), &dialect, buffer_size)
            })?
            .write(row)
    }

    pub fn close_all(&mut self) -> Result<()> {
        self.cache.close_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> ByteRecord {
        ByteRecord::from(fields.to_vec())
    }

    #[test]
    fn file_layout() {
        let p = chunk_file_path(Path::new("/out"), "Object", FileKind::FullOverlap, 3, 217);
        assert_eq!(p, Path::new("/out/stripe_3/ObjectFullOverlap_217.csv"));
        let p = chunk_file_path(Path::new("/out"), "Object", FileKind::Chunk, 0, 5);
        assert_eq!(p, Path::new("/out/stripe_0/Object_5.csv"));
    }

    #[test]
    fn writers_append_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ChunkWriter::new(dir.path(), "chunk", CsvDialect::default(), 8, 1);
        w.write(FileKind::Chunk, 0, 1, &row(&["a", "1"])).unwrap();
        // evicts chunk 1
        w.write(FileKind::Chunk, 0, 2, &row(&["b", "2"])).unwrap();
        w.write(FileKind::Chunk, 0, 1, &row(&["c", "3"])).unwrap();
        w.write(FileKind::SelfOverlap, 0, 1, &row(&["d", "4"])).unwrap();
        w.close_all().unwrap();

        let read = |kind, id| {
            std::fs::read_to_string(chunk_file_path(dir.path(), "chunk", kind, 0, id)).unwrap()
        };
        assert_eq!(read(FileKind::Chunk, 1), "a,1\nc,3\n");
        assert_eq!(read(FileKind::Chunk, 2), "b,2\n");
        assert_eq!(read(FileKind::SelfOverlap, 1), "d,4\n");
        assert!(!chunk_file_path(dir.path(), "chunk", FileKind::FullOverlap, 0, 1).exists());
    }

    #[test]
    fn concurrent_appends_keep_rows_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.csv");
        std::thread::scope(|s| {
            for t in 0..4 {
                let path = &path;
                s.spawn(move || {
                    let mut w = CsvFileWriter::open(path, &CsvDialect::default(), 64).unwrap();
                    for i in 0..500 {
                        let (t, i) = (t.to_string(), i.to_string());
                        w.write(&row(&[t.as_str(), i.as_str(), "payload"])).unwrap();
                    }
                    w.close().unwrap();
                });
            }
        });
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2000);
        assert!(lines.iter().all(|l| l.ends_with(",payload") && l.split(',').count() == 3));
    }
}
