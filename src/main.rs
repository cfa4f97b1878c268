use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skychunk::chunker::dialect::{CsvDialect, Quoting, parse_char};
use skychunk::chunker::{self, ChunkerConfig, Mode};
use skychunk::geom::sphere::cartesian_unit_vector;
use skychunk::partition::{Coverage, PartitionMap};
use skychunk::region::{
    SphericalBox, SphericalCircle, SphericalConvexPolygon, SphericalEllipse, SphericalRegion,
};

#[derive(Parser)]
#[command(name = "skychunk", about = "Spherical partitioning of sky catalogs")]
struct Cli {
    /// Log pass boundaries and progress (honours RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all log output.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition CSV catalogs into chunk and overlap files.
    Partition {
        /// Input files or glob patterns.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Directory receiving the chunk files; must be absent or empty.
        #[arg(short = 'o', long, default_value = "chunks")]
        output_dir: PathBuf,

        /// Overlap radius in degrees.
        #[arg(long, default_value = "0.016666666666666666")]
        overlap: f64,

        /// Zero-based index of the longitude column.
        #[arg(long, default_value = "0")]
        theta_column: usize,

        /// Zero-based index of the latitude column.
        #[arg(long, default_value = "1")]
        phi_column: usize,

        /// Prefix of output file names.
        #[arg(long, default_value = "chunk")]
        chunk_prefix: String,

        /// First of two placeholder columns receiving the chunk and
        /// sub-chunk ids (appended to each row if omitted).
        #[arg(long)]
        chunk_column: Option<usize>,

        /// Header lines to skip at the start of each input file.
        #[arg(long, default_value = "0")]
        skip_lines: usize,

        /// Number of worker threads.
        #[arg(short = 'j', long, default_value = "1")]
        num_workers: usize,

        /// Number of latitude stripes (standard mode).
        #[arg(long)]
        num_stripes: Option<u32>,

        /// Number of sub-stripes per stripe (standard mode).
        #[arg(long)]
        num_sub_stripes: Option<u32>,

        /// Target number of chunks; selects adaptive mode.
        #[arg(long, conflicts_with_all = ["num_stripes", "num_sub_stripes"])]
        num_chunks: Option<u32>,

        /// Target rows per sub-chunk (adaptive mode, default 10000).
        #[arg(long, requires = "num_chunks")]
        rows_per_subchunk: Option<u64>,

        /// Histogram bin width in degrees (adaptive mode, default 0.5).
        #[arg(long, requires = "num_chunks")]
        bin_size: Option<f64>,

        /// Input field delimiter; `\t` or `tab` for tabs.
        #[arg(short = 'd', long, default_value = ",", value_parser = parse_char)]
        delimiter: u8,

        /// Output field delimiter (defaults to the input delimiter).
        #[arg(long, value_parser = parse_char)]
        delimiter_out: Option<u8>,

        /// Output quoting: minimal, all, nonnumeric or none; `none` also
        /// reads quote characters in the input as ordinary characters.
        #[arg(long, default_value = "minimal")]
        quoting: Quoting,

        /// Quote character.
        #[arg(long, default_value = "\"", value_parser = parse_char)]
        quotechar: u8,

        /// Ignore whitespace around input fields.
        #[arg(long)]
        skipinitialspace: bool,

        /// Bytes buffered per output file between appends.
        #[arg(long, default_value = "1048576")]
        output_buffer_size: usize,

        /// Maximum output files held open per worker.
        #[arg(long, default_value = "32")]
        max_open_writers: usize,

        /// Target size in bytes of the pieces inputs are split into.
        #[arg(long, default_value = "67108864")]
        input_split_size: u64,
    },

    /// List the chunks and sub-chunks of a standard map touching a region.
    Intersect {
        /// Number of latitude stripes.
        #[arg(long, default_value = "18")]
        num_stripes: u32,

        /// Number of sub-stripes per stripe.
        #[arg(long, default_value = "100")]
        num_sub_stripes: u32,

        /// Box as "theta_min,phi_min,theta_max,phi_max". Can be repeated.
        #[arg(long = "box")]
        boxes: Vec<String>,

        /// Circle as "theta,phi,radius". Can be repeated.
        #[arg(long = "circle")]
        circles: Vec<String>,

        /// Ellipse as "theta,phi,semi_major,semi_minor,angle". Can be repeated.
        #[arg(long = "ellipse")]
        ellipses: Vec<String>,

        /// Convex polygon as "theta,phi,theta,phi,...". Can be repeated.
        #[arg(long = "polygon")]
        polygons: Vec<String>,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_numbers(s: &str, what: &str) -> Vec<f64> {
    s.split(',')
        .map(|p| {
            p.trim().parse::<f64>().unwrap_or_else(|_| {
                eprintln!("Invalid {what} coordinate: {p:?}");
                process::exit(2);
            })
        })
        .collect()
}

fn fail(what: &str, s: &str, e: &dyn std::fmt::Display) -> ! {
    eprintln!("Invalid {what} {s:?}: {e}");
    process::exit(2);
}

fn parse_regions(
    boxes: &[String],
    circles: &[String],
    ellipses: &[String],
    polygons: &[String],
) -> Vec<SphericalRegion> {
    let mut regions: Vec<SphericalRegion> = Vec::new();
    for s in boxes {
        let v = parse_numbers(s, "box");
        if v.len() != 4 {
            fail("box", s, &"expected 4 values");
        }
        match SphericalBox::new(v[0], v[1], v[2], v[3]) {
            Ok(b) => regions.push(b.into()),
            Err(e) => fail("box", s, &e),
        }
    }
    for s in circles {
        let v = parse_numbers(s, "circle");
        if v.len() != 3 {
            fail("circle", s, &"expected 3 values");
        }
        match SphericalCircle::new((v[0], v[1]), v[2]) {
            Ok(c) => regions.push(c.into()),
            Err(e) => fail("circle", s, &e),
        }
    }
    for s in ellipses {
        let v = parse_numbers(s, "ellipse");
        if v.len() != 5 {
            fail("ellipse", s, &"expected 5 values");
        }
        match SphericalEllipse::new((v[0], v[1]), v[2], v[3], v[4]) {
            Ok(e) => regions.push(e.into()),
            Err(e) => fail("ellipse", s, &e),
        }
    }
    for s in polygons {
        let v = parse_numbers(s, "polygon");
        if v.len() < 6 || v.len() % 2 != 0 {
            fail("polygon", s, &"expected at least 3 theta,phi pairs");
        }
        let vertices = v.chunks(2).map(|p| cartesian_unit_vector(p[0], p[1])).collect();
        match SphericalConvexPolygon::new(vertices) {
            Ok(p) => regions.push(p.into()),
            Err(e) => fail("polygon", s, &e),
        }
    }
    regions
}

fn cmd_intersect(map: &PartitionMap, regions: &[SphericalRegion]) {
    let mut chunks = 0usize;
    let mut sub_chunks = 0usize;
    for (chunk_id, subs) in map.intersect(regions) {
        chunks += 1;
        let mut line = format!("{chunk_id}:");
        for (sub_chunk_id, coverage) in subs {
            sub_chunks += 1;
            let kind = match coverage {
                Coverage::Full => "full",
                Coverage::Partial(_) => "partial",
            };
            line.push_str(&format!(" {sub_chunk_id}/{kind}"));
        }
        println!("{line}");
    }
    eprintln!("{chunks} chunks, {sub_chunks} sub-chunks");
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Partition {
            inputs,
            output_dir,
            overlap,
            theta_column,
            phi_column,
            chunk_prefix,
            chunk_column,
            skip_lines,
            num_workers,
            num_stripes,
            num_sub_stripes,
            num_chunks,
            rows_per_subchunk,
            bin_size,
            delimiter,
            delimiter_out,
            quoting,
            quotechar,
            skipinitialspace,
            output_buffer_size,
            max_open_writers,
            input_split_size,
        } => {
            let mode = match num_chunks {
                Some(num_chunks) => Mode::Adaptive {
                    num_chunks,
                    rows_per_sub_chunk: rows_per_subchunk.unwrap_or(10_000),
                    bin_size: bin_size.unwrap_or(0.5),
                },
                None => Mode::Standard {
                    num_stripes: num_stripes.unwrap_or(18),
                    num_sub_stripes: num_sub_stripes.unwrap_or(100),
                },
            };
            let input_dialect = CsvDialect {
                delimiter,
                quoting: quoting.for_reading(),
                quote_char: quotechar,
                skip_initial_space: skipinitialspace,
            };
            let output_dialect = CsvDialect {
                delimiter: delimiter_out.unwrap_or(delimiter),
                quoting,
                quote_char: quotechar,
                skip_initial_space: false,
            };
            let config = ChunkerConfig {
                inputs,
                output_dir,
                chunk_prefix,
                theta_column,
                phi_column,
                chunk_column,
                skip_lines,
                num_workers,
                overlap,
                input_dialect,
                output_dialect,
                output_buffer_size,
                max_open_writers,
                input_split_size,
                mode,
            };
            if let Err(e) = config.validate() {
                eprintln!("{e}");
                process::exit(2);
            }
            match chunker::run(&config) {
                Ok(summary) => {
                    println!(
                        "{} rows read, {} skipped, {} chunks, {} sub-chunks",
                        summary.rows_read, summary.rows_skipped, summary.chunks, summary.sub_chunks
                    );
                }
                Err(e) => {
                    eprintln!("Partitioning failed: {e}");
                    process::exit(1);
                }
            }
        }
        Commands::Intersect {
            num_stripes,
            num_sub_stripes,
            boxes,
            circles,
            ellipses,
            polygons,
        } => {
            let map = PartitionMap::new(num_stripes, num_sub_stripes, 0.0).unwrap_or_else(|e| {
                eprintln!("{e}");
                process::exit(2);
            });
            let regions = parse_regions(&boxes, &circles, &ellipses, &polygons);
            if regions.is_empty() {
                eprintln!("No region given; use --box, --circle, --ellipse or --polygon");
                process::exit(2);
            }
            cmd_intersect(&map, &regions);
        }
    }
}
