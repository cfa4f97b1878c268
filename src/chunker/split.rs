//! Line-aligned input splits.
//!
//! Each input file is cut at evenly spaced byte offsets, and every cut is
//! moved back to just after the preceding line terminator so that no row
//! straddles two splits.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PartitionError, Result};

use super::dialect::CsvDialect;

const SCAN_BLOCK: u64 = 4096;

/// A byte range of an input file holding whole rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSplit {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
    /// Leading rows to ignore (header lines of the file's first split,
    /// which always holds the whole header).
    pub lines_to_skip: usize,
}

impl InputSplit {
    /// The whole of `path` as a single split.
    pub fn whole(path: &Path) -> Result<Self> {
        let length = std::fs::metadata(path)?.len();
        Ok(InputSplit {
            path: path.to_path_buf(),
            offset: 0,
            length,
            lines_to_skip: 0,
        })
    }

    /// A reader over the rows of this split.
    pub fn reader(&self, dialect: &CsvDialect) -> Result<csv::Reader<std::io::Take<BufReader<File>>>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        Ok(dialect.reader(BufReader::new(file).take(self.length)))
    }
}

/// Expand glob patterns into a sorted, de-duplicated list of files.
///
/// A pattern that matches nothing is an error.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let entries = glob::glob(pattern).map_err(|e| {
            PartitionError::Config(format!("invalid input pattern {pattern:?}: {e}"))
        })?;
        let mut matched = false;
        for entry in entries {
            let path = entry.map_err(|e| PartitionError::Io(e.into_error()))?;
            if path.is_file() {
                paths.push(path);
                matched = true;
            }
        }
        if !matched {
            return Err(PartitionError::Config(format!(
                "input pattern {pattern:?} matches no files"
            )));
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Cut every file into line-aligned splits of roughly `split_size` bytes.
/// The first `skip_lines` lines of a file stay in its first split.
pub fn input_splits(paths: &[PathBuf], split_size: u64, skip_lines: usize) -> Result<Vec<InputSplit>> {
    let split_size = split_size.max(1);
    let mut splits = Vec::new();
    for path in paths {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let header = header_end(&mut file, skip_lines)?;
        let mut start = 0u64;
        let mut cut = split_size;
        while cut <= header {
            cut += split_size;
        }
        while cut < len {
            let aligned = align_to_line(&mut file, start, cut)?;
            if aligned > start {
                splits.push(InputSplit {
                    path: path.clone(),
                    offset: start,
                    length: aligned - start,
                    lines_to_skip: if start == 0 { skip_lines } else { 0 },
                });
                start = aligned;
            }
            cut += split_size;
        }
        if len > start || len == 0 {
            splits.push(InputSplit {
                path: path.clone(),
                offset: start,
                length: len - start,
                lines_to_skip: if start == 0 { skip_lines } else { 0 },
            });
        }
        debug!(path = %path.display(), bytes = len, "split input file");
    }
    Ok(splits)
}

/// Byte offset just past the first `lines` lines of the file.
fn header_end(file: &mut File, lines: usize) -> Result<u64> {
    if lines == 0 {
        return Ok(0);
    }
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut line = Vec::new();
    let mut end = 0u64;
    for _ in 0..lines {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        end += n as u64;
    }
    Ok(end)
}

/// Position just after the last `\n` in `[floor, offset)`, or `floor` if
/// there is none.
fn align_to_line(file: &mut File, floor: u64, offset: u64) -> Result<u64> {
    let mut end = offset;
    let mut buf = vec![0u8; SCAN_BLOCK as usize];
    while end > floor {
        let begin = end.saturating_sub(SCAN_BLOCK).max(floor);
        let n = (end - begin) as usize;
        file.seek(SeekFrom::Start(begin))?;
        file.read_exact(&mut buf[..n])?;
        if let Some(i) = buf[..n].iter().rposition(|&b| b == b'\n') {
            return Ok(begin + i as u64 + 1);
        }
        end = begin;
    }
    Ok(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rows_of(splits: &[InputSplit]) -> Vec<String> {
        let mut rows = Vec::new();
        for split in splits {
            let mut r = split.reader(&CsvDialect::default()).unwrap();
            for (i, rec) in r.byte_records().enumerate() {
                if i < split.lines_to_skip {
                    continue;
                }
                let rec = rec.unwrap();
                rows.push(String::from_utf8(rec[0].to_vec()).unwrap());
            }
        }
        rows
    }

    #[test]
    fn splits_are_line_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "header,row").unwrap();
        let expected: Vec<String> = (0..500).map(|i| format!("row{i}")).collect();
        for (i, name) in expected.iter().enumerate() {
            writeln!(f, "{name},{}", "x".repeat(i % 37)).unwrap();
        }
        drop(f);

        let splits = input_splits(&[path.clone()], 700, 1).unwrap();
        assert!(splits.len() > 5);
        let mut pos = 0;
        for s in &splits {
            assert_eq!(s.offset, pos);
            pos += s.length;
        }
        assert_eq!(pos, std::fs::metadata(&path).unwrap().len());
        assert_eq!(rows_of(&splits), expected);
    }

    #[test]
    fn long_rows_and_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        std::fs::write(&path, format!("{}\n{}", "a".repeat(100), "short\n".repeat(30))).unwrap();
        // cuts inside the long row collapse onto a row boundary
        let splits = input_splits(&[path.clone()], 10, 0).unwrap();
        assert!(splits.len() > 1);
        assert!(splits[0].length > 100);
        assert!(splits.iter().all(|s| s.length > 0));
        assert_eq!(rows_of(&splits).len(), 31);

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        let splits = input_splits(&[empty], 10, 0).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].length, 0);
    }

    #[test]
    fn header_longer_than_a_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "h1,h1\nh2,h2\nh3,h3\n10,10\n20,20\n").unwrap();
        let splits = input_splits(&[path], 6, 3).unwrap();
        assert_eq!(splits[0].offset, 0);
        assert_eq!(splits[0].lines_to_skip, 3);
        assert!(splits[0].length >= 18);
        assert!(splits[1..].iter().all(|s| s.lines_to_skip == 0));
        assert_eq!(rows_of(&splits), ["10", "20"]);

        // fewer lines than the header
        let short = dir.path().join("short.csv");
        std::fs::write(&short, "h1\nh2\n").unwrap();
        let splits = input_splits(&[short], 2, 5).unwrap();
        assert_eq!(splits.len(), 1);
        assert!(rows_of(&splits).is_empty());
    }

    #[test]
    fn glob_expansion() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.csv", "c.txt"] {
            std::fs::write(dir.path().join(name), "1,2\n").unwrap();
        }
        let pattern = dir.path().join("*.csv").to_string_lossy().into_owned();
        let paths = expand_inputs(&[pattern.clone(), pattern]).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.csv", "b.csv"]);
        let none = dir.path().join("*.fits").to_string_lossy().into_owned();
        assert!(matches!(expand_inputs(&[none]), Err(PartitionError::Config(_))));
    }
}
