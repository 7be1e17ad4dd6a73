//! Chunk unpack optimization
//!
//! Deserializing a chunk's R-tree costs CPU and transient memory; an
//! optimizer decides whether a chunk is worth unpacking given the current
//! index-usable range.

use crate::read::TimeRanges;

/// Decides whether an index chunk should be unpacked and queried
pub trait UnpackOptimizer {
    fn need_unpack(&self, usable_range: &TimeRanges, chunk_start: i64, chunk_end: i64) -> bool;
}

/// Unpack a chunk iff its span reaches outside the already-usable range
#[derive(Debug, Default)]
pub struct NaiveOptimizer;

impl UnpackOptimizer for NaiveOptimizer {
    fn need_unpack(&self, usable_range: &TimeRanges, chunk_start: i64, chunk_end: i64) -> bool {
        !usable_range.fully_contains(chunk_start, chunk_end)
    }
}
