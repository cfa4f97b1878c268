//! Spherical partitioning of sky catalogs.
//!
//! Skychunk divides the celestial sphere into latitude stripes, longitude
//! chunks and finer sub-chunks, and distributes the rows of large CSV
//! catalogs into per-chunk files together with copies of the rows lying
//! within an overlap radius of each chunk.

pub mod chunker;
pub mod error;
pub mod geom;
pub mod partition;
pub mod region;

pub use chunker::{ChunkerConfig, ChunkingSummary, Mode};
pub use error::{GeometryError, PartitionError, Result};
pub use partition::PartitionMap;
pub use region::SphericalRegion;
