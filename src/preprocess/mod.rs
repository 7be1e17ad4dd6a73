//! Sliding-window preprocessing
//!
//! Turns an append-only `<time, value>` stream into aligned fixed-length
//! subsequences:
//!
//! - **L1 identifier**: `(start_time, end_time, count)` locating a window
//! - **L2 aligned sequence**: the window resampled onto a uniform grid
//! - **L3 feature**: a compact lower-bounding summary (see [`crate::feature`])
//!
//! [`CountFixedPreprocessor`] implements the count-fixed variant (a window is
//! N consecutive points); [`ElbPreprocessor`] composes it with the ELB
//! feature extractor, which observes every emitted window.

mod count_fixed;
mod elb;

pub use count_fixed::CountFixedPreprocessor;
pub use elb::ElbPreprocessor;

use crate::error::IndexResult;
use crate::io::ByteReader;

/// Locates one window in the source series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub start_time: i64,
    pub end_time: i64,
    pub count: u32,
}

/// Wire size of a serialized identifier
pub const IDENTIFIER_BYTES: usize = 8 + 8 + 4;

impl Identifier {
    pub fn new(start_time: i64, end_time: i64, count: u32) -> Self {
        Self {
            start_time,
            end_time,
            count,
        }
    }

    /// Append the 20-byte little-endian wire form
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.start_time.to_le_bytes());
        out.extend_from_slice(&self.end_time.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
    }

    /// Read the wire form back
    pub fn read_from(reader: &mut ByteReader<'_>) -> IndexResult<Self> {
        let start_time = reader.read_i64()?;
        let end_time = reader.read_i64()?;
        let count = reader.read_u32()?;
        Ok(Self {
            start_time,
            end_time,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_roundtrip() {
        let id = Identifier::new(1000, 1900, 10);
        let mut buf = Vec::new();
        id.write_to(&mut buf);
        assert_eq!(buf.len(), IDENTIFIER_BYTES);

        let mut reader = ByteReader::new(&buf);
        let back = Identifier::read_from(&mut reader).unwrap();
        assert_eq!(back, id);
        assert!(reader.is_exhausted());
    }
}
