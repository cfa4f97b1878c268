//! CSV dialects for input and output rows.

use std::io::{Read, Write};
use std::str::FromStr;

use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Trim, WriterBuilder};

use crate::error::{PartitionError, Result, RowError};

/// When output fields are quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quoting {
    /// Only fields containing the delimiter, quote character or a line break.
    #[default]
    Minimal,
    All,
    /// Every field that does not parse as a number.
    NonNumeric,
    /// Never; quote characters in the input are ordinary characters too.
    None,
}

impl FromStr for Quoting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Quoting::Minimal),
            "all" => Ok(Quoting::All),
            "nonnumeric" => Ok(Quoting::NonNumeric),
            "none" => Ok(Quoting::None),
            other => Err(format!(
                "unknown quoting style {other:?} (expected minimal, all, nonnumeric or none)"
            )),
        }
    }
}

impl Quoting {
    /// The style to read with when writing with `self`: readers only tell
    /// unquoted input apart from input that may be quoted.
    pub fn for_reading(self) -> Quoting {
        match self {
            Quoting::None => Quoting::None,
            _ => Quoting::Minimal,
        }
    }
}

/// Delimiter, quoting and whitespace rules for a CSV-like file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvDialect {
    pub delimiter: u8,
    pub quoting: Quoting,
    pub quote_char: u8,
    /// Ignore whitespace around fields when reading.
    pub skip_initial_space: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        CsvDialect {
            delimiter: b',',
            quoting: Quoting::Minimal,
            quote_char: b'"',
            skip_initial_space: false,
        }
    }
}

impl CsvDialect {
    pub fn validate(&self) -> Result<()> {
        for (name, c) in [("delimiter", self.delimiter), ("quote character", self.quote_char)] {
            if !c.is_ascii() || c == b'\n' || c == b'\r' {
                return Err(PartitionError::Config(format!(
                    "{name} must be a single ASCII character other than a line break"
                )));
            }
        }
        if self.quoting != Quoting::None && self.delimiter == self.quote_char {
            return Err(PartitionError::Config(
                "delimiter and quote character must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Same dialect with another delimiter.
    pub fn with_delimiter(self, delimiter: u8) -> Self {
        CsvDialect { delimiter, ..self }
    }

    /// A header-less reader that accepts rows of varying length.
    pub fn reader<R: Read>(&self, rdr: R) -> csv::Reader<R> {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote_char)
            .quoting(self.quoting != Quoting::None)
            .trim(if self.skip_initial_space {
                Trim::Fields
            } else {
                Trim::None
            })
            .from_reader(rdr)
    }

    pub fn writer<W: Write>(&self, wtr: W) -> csv::Writer<W> {
        let style = match self.quoting {
            Quoting::Minimal => QuoteStyle::Necessary,
            Quoting::All => QuoteStyle::Always,
            Quoting::NonNumeric => QuoteStyle::NonNumeric,
            Quoting::None => QuoteStyle::Never,
        };
        WriterBuilder::new()
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote_char)
            .quote_style(style)
            .from_writer(wtr)
    }
}

/// Parse a single-character command line argument, accepting `\t` for tab.
pub fn parse_char(s: &str) -> std::result::Result<u8, String> {
    match s {
        "\\t" | "tab" => Ok(b'\t'),
        _ => {
            let bytes = s.as_bytes();
            if bytes.len() == 1 && bytes[0].is_ascii() {
                Ok(bytes[0])
            } else {
                Err(format!("expected a single ASCII character, got {s:?}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn parse_coordinate(row: &ByteRecord, column: usize) -> std::result::Result<f64, RowError> {
    let raw = row.get(column).unwrap_or_default();
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowError::BadCoordinate {
            column,
            value: String::from_utf8_lossy(raw).into_owned(),
        })
}

/// Read `(theta, phi)` from the given columns of a row.
pub fn parse_position(
    row: &ByteRecord,
    theta_column: usize,
    phi_column: usize,
) -> std::result::Result<(f64, f64), RowError> {
    let needed = theta_column.max(phi_column) + 1;
    if row.len() < needed {
        return Err(RowError::TooFewColumns {
            needed,
            found: row.len(),
        });
    }
    let theta = parse_coordinate(row, theta_column)?;
    let phi = parse_coordinate(row, phi_column)?;
    if !(-90.0..=90.0).contains(&phi) {
        return Err(RowError::LatitudeOutOfRange(phi));
    }
    Ok((theta, phi))
}

/// Copy of `row` carrying chunk and sub-chunk ids: appended at the end
/// when `chunk_column` is `None`, otherwise written over the two
/// placeholder columns starting at `chunk_column`.
pub fn with_ids(
    row: &ByteRecord,
    chunk_id: u32,
    sub_chunk_id: u32,
    chunk_column: Option<usize>,
) -> std::result::Result<ByteRecord, RowError> {
    let chunk = chunk_id.to_string();
    let sub_chunk = sub_chunk_id.to_string();
    let mut out = ByteRecord::with_capacity(row.as_slice().len() + 16, row.len() + 2);
    match chunk_column {
        None => {
            out.extend(row.iter());
            out.push_field(chunk.as_bytes());
            out.push_field(sub_chunk.as_bytes());
        }
        Some(column) => {
            if row.len() < column + 2 {
                return Err(RowError::ChunkColumnOutOfRange {
                    column,
                    found: row.len(),
                });
            }
            for (i, field) in row.iter().enumerate() {
                if i == column {
                    out.push_field(chunk.as_bytes());
                } else if i == column + 1 {
                    out.push_field(sub_chunk.as_bytes());
                } else {
                    out.push_field(field);
                }
            }
        }
    }
    Ok(out)
}
