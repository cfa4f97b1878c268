//! Error types for geometry, partitioning and chunking.

use thiserror::Error;

/// Why a vertex list failed the convexity test.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvexityFailure {
    #[error("3 or more vertices must be specified")]
    TooFewVertices,

    #[error("vertices are not hemispherical")]
    NotHemispherical,

    #[error("vertex list contains near-duplicate or near-antipodal vertices")]
    NearDuplicateVertices,

    #[error("centroid of vertices is too close to a vertex")]
    CentroidNearVertex,

    #[error("vertex list is not convex")]
    InconsistentWinding,

    #[error("vertices do not wind around their centroid exactly once")]
    MultipleWindings,

    #[error("vertices are coplanar")]
    Coplanar,
}

/// Errors raised by the geometry kernel and region constructors.
///
/// These are distinct from a `false` predicate result: they mean the
/// answer could not be computed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// A vector of zero (or non-finite) magnitude was normalized.
    #[error("cannot normalize a vector of zero magnitude")]
    DegenerateVector,

    /// Box construction with min latitude above max latitude.
    #[error("invalid latitude range: min {min} > max {max}")]
    InvalidLatitudeRange { min: f64, max: f64 },

    /// Region parameters out of their valid domain.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Points admit no plane with all of them strictly on one side.
    #[error("points are not hemispherical")]
    NotHemispherical,

    /// Vertices do not describe a spherical convex polygon.
    #[error("not a convex polygon: {0}")]
    NotConvex(#[from] ConvexityFailure),
}

/// A problem with a single input row. Rows with data errors are logged and
/// skipped; they never abort a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("row has {found} columns, need at least {needed}")]
    TooFewColumns { needed: usize, found: usize },

    #[error("column {column} is not a valid coordinate: {value:?}")]
    BadCoordinate { column: usize, value: String },

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("chunk column {column} needs 2 placeholder columns, row has {found}")]
    ChunkColumnOutOfRange { column: usize, found: usize },
}

/// Crate-level errors for partitioning and chunking.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// Invalid configuration, reported before any I/O is performed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A bad input row; drivers log and skip it.
    #[error("bad row: {0}")]
    Row(#[from] RowError),

    #[error("chunk {0} does not exist in this partitioning")]
    UnknownChunk(u32),

    #[error("sub-chunk {sub_chunk_id} does not exist in chunk {chunk_id}")]
    UnknownSubChunk { chunk_id: u32, sub_chunk_id: u32 },

    /// The worker pool could not be created.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for partitioning operations.
pub type Result<T> = std::result::Result<T, PartitionError>;
