//! Index range strategies
//!
//! A strategy decides whether a buffered slice of source data is eligible
//! for indexing at all, relative to the start time configured when the
//! index was registered. Data older than that epoch can be skipped without
//! building windows for it.

use crate::buffer::TvBuffer;
use crate::error::{IndexError, IndexResult};

/// Predicate selecting which buffered slices get indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStrategy {
    /// Index once the newest buffered point reaches the configured start time
    Default,
    /// Index everything unconditionally
    All,
    /// Index only slices that lie wholly past the configured start time
    Within,
}

impl RangeStrategy {
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(RangeStrategy::Default),
            "all" => Ok(RangeStrategy::All),
            "within" => Ok(RangeStrategy::Within),
            other => Err(IndexError::Config(format!(
                "unknown index_range_strategy: {}",
                other
            ))),
        }
    }

    /// Should the slice `[offset, end)` of `buffer` be indexed?
    pub fn need_build_index(
        &self,
        buffer: &TvBuffer,
        offset: usize,
        index_start_time: i64,
    ) -> bool {
        if buffer.is_empty() || offset >= buffer.len() {
            return false;
        }
        match self {
            RangeStrategy::All => true,
            RangeStrategy::Default => buffer
                .last_time()
                .map(|t| t >= index_start_time)
                .unwrap_or(false),
            RangeStrategy::Within => buffer.time(offset) >= index_start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TsDataType;

    fn buffer(times: &[i64]) -> TvBuffer {
        let mut buf = TvBuffer::new(TsDataType::F64);
        for &t in times {
            buf.push(t, 0.0);
        }
        buf
    }

    #[test]
    fn test_all_is_unconditional() {
        let buf = buffer(&[10, 20, 30]);
        assert!(RangeStrategy::All.need_build_index(&buf, 0, 1_000_000));
    }

    #[test]
    fn test_default_waits_for_epoch() {
        let buf = buffer(&[10, 20, 30]);
        assert!(!RangeStrategy::Default.need_build_index(&buf, 0, 100));
        assert!(RangeStrategy::Default.need_build_index(&buf, 0, 25));
    }

    #[test]
    fn test_within_checks_slice_start() {
        let buf = buffer(&[10, 20, 30]);
        assert!(!RangeStrategy::Within.need_build_index(&buf, 0, 15));
        assert!(RangeStrategy::Within.need_build_index(&buf, 1, 15));
    }

    #[test]
    fn test_empty_buffer_never_indexes() {
        let buf = buffer(&[]);
        assert!(!RangeStrategy::All.need_build_index(&buf, 0, 0));
    }

    #[test]
    fn test_parse() {
        assert_eq!(RangeStrategy::parse("default").unwrap(), RangeStrategy::Default);
        assert_eq!(RangeStrategy::parse("ALL").unwrap(), RangeStrategy::All);
        assert!(RangeStrategy::parse("sometimes").is_err());
    }
}
