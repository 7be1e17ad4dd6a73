//! Index construction
//!
//! [`MbrIndex`] is the per-series index instance: it wires the sliding-window
//! preprocessor, the ELB feature extractor and the in-memory R-tree into the
//! build/flush/query lifecycle driven by the host storage engine.

mod mbr;
mod range;

pub use mbr::{MbrIndex, MbrIndexConfig};
pub use range::RangeStrategy;

use crate::error::{IndexError, IndexResult};

/// Identifies the index algorithm a chunk was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Equal-Length Block feature index over an R-tree
    Elb,
}

impl IndexType {
    pub fn tag(&self) -> u8 {
        match self {
            IndexType::Elb => 1,
        }
    }

    pub fn from_tag(tag: u8) -> IndexResult<Self> {
        match tag {
            1 => Ok(IndexType::Elb),
            other => Err(IndexError::CorruptChunk(format!(
                "unknown index type tag: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexType::Elb => write!(f, "elb"),
        }
    }
}
