//! Query-time pruning reader
//!
//! For one query over one series, the reader consumes that series'
//! index-chunk metadata in start-time order and maintains the running
//! `allowed_range`: the set of timestamps the outer scan must still visit.
//! Ranges an index chunk proves free of candidates are subtracted, but only
//! where the index has been declared usable by the scan. Unsequenced
//! chunks are accepted and tracked, but treated as always-modified: they
//! never shrink the allowed range.
//!
//! The reader is a strict state machine:
//! `Created -> Initialized -> Scanning -> Released`; only `release()`
//! leaves the scanning state.

use crate::error::{IndexError, IndexResult};
use crate::index::MbrIndex;
use crate::io::IndexChunkMeta;
use crate::preprocess::Identifier;
use crate::read::{IndexFuncResult, NaiveOptimizer, TimeRanges, UnpackOptimizer};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Lifecycle of a query against one series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Created,
    Initialized,
    Scanning,
    Released,
}

/// Heap adapter ordering chunk metadata by start time
struct ByStartTime(IndexChunkMeta);

impl PartialEq for ByStartTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.start_time == other.0.start_time && self.0.end_time == other.0.end_time
    }
}
impl Eq for ByStartTime {}
impl PartialOrd for ByStartTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ByStartTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0.start_time, self.0.end_time).cmp(&(other.0.start_time, other.0.end_time))
    }
}

/// Per-query reader combining chunk R-tree lookups with the running
/// allowed-time filter
pub struct IndexQueryReader {
    series_path: String,
    seq_chunks: BinaryHeap<Reverse<ByStartTime>>,
    /// Accepted but excluded from pruning
    unseq_chunks: Vec<IndexChunkMeta>,
    usable_range: TimeRanges,
    allowed_range: TimeRanges,
    index: MbrIndex,
    optimizer: Box<dyn UnpackOptimizer>,
    state: QueryState,
}

impl IndexQueryReader {
    /// Create a reader over the series' chunk metadata
    ///
    /// `time_filter` is the user's time predicate; without one the initial
    /// allowed range is the universe.
    pub fn new(
        series_path: impl Into<String>,
        index: MbrIndex,
        time_filter: Option<(i64, i64)>,
        seq_chunks: Vec<IndexChunkMeta>,
        unseq_chunks: Vec<IndexChunkMeta>,
    ) -> Self {
        let allowed_range = match time_filter {
            Some((start, end)) => TimeRanges::from_range(start, end),
            None => TimeRanges::universe(),
        };
        Self {
            series_path: series_path.into(),
            seq_chunks: seq_chunks.into_iter().map(|m| Reverse(ByStartTime(m))).collect(),
            unseq_chunks,
            usable_range: TimeRanges::empty(),
            allowed_range,
            index,
            optimizer: Box::new(NaiveOptimizer),
            state: QueryState::Created,
        }
    }

    pub fn series_path(&self) -> &str {
        &self.series_path
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn allowed_range(&self) -> &TimeRanges {
        &self.allowed_range
    }

    pub fn unseq_chunk_count(&self) -> usize {
        self.unseq_chunks.len()
    }

    /// Pass query parameters through to the index
    pub fn init_query_condition(&mut self, query_props: &crate::config::IndexProps) -> IndexResult<()> {
        match self.state {
            QueryState::Created => {
                self.index.init_query(query_props)?;
                self.state = QueryState::Initialized;
                Ok(())
            }
            QueryState::Released => Err(IndexError::Closed),
            _ => Err(IndexError::Fatal("query already initialized".into())),
        }
    }

    fn ensure_scanning(&mut self) -> IndexResult<()> {
        match self.state {
            QueryState::Created => Err(IndexError::Fatal(
                "query condition has not been initialized".into(),
            )),
            QueryState::Released => Err(IndexError::Closed),
            QueryState::Initialized | QueryState::Scanning => {
                self.state = QueryState::Scanning;
                Ok(())
            }
        }
    }

    /// Declare `[start, end]` index-usable for this scan
    ///
    /// A range of any length other than two is a caller bug; an inverted
    /// range is silently ignored.
    pub fn update_usable_range(&mut self, usable_range: &[i64]) -> IndexResult<()> {
        self.ensure_scanning()?;
        if usable_range.len() != 2 {
            return Err(IndexError::Fatal(format!(
                "usable range must have length 2, got {}",
                usable_range.len()
            )));
        }
        let (start, end) = (usable_range[0], usable_range[1]);
        if start > end {
            return Ok(());
        }
        self.usable_range.add_range(start, end);
        Ok(())
    }

    /// Drain chunks relevant to `[data_start, data_end]` from the heap
    /// and fold their pruning information into the allowed range
    pub fn update_index_chunks(&mut self, data_start: i64, data_end: i64) -> IndexResult<()> {
        self.ensure_scanning()?;
        while let Some(Reverse(head)) = self.seq_chunks.peek() {
            if head.0.start_time > data_end {
                break;
            }
            if head.0.end_time < data_start {
                self.seq_chunks.pop();
                continue;
            }
            let meta = self.seq_chunks.pop().expect("peeked entry exists").0 .0;
            if !self
                .optimizer
                .need_unpack(&self.usable_range, meta.start_time, meta.end_time)
            {
                continue;
            }
            match self.query_chunk(&meta) {
                Ok(candidates) => self.update_pruned_range(&meta, &candidates),
                Err(e) if matches!(e, IndexError::ChunkUnpack(_) | IndexError::CorruptChunk(_)) => {
                    tracing::error!(
                        "Failed to query index chunk [{}, {}] on {}: {}, skipping it",
                        meta.start_time,
                        meta.end_time,
                        self.series_path,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn query_chunk(&mut self, meta: &IndexChunkMeta) -> IndexResult<Vec<Identifier>> {
        let body = meta.unpack()?;
        self.index.query_by_index(&body)
    }

    /// `chunk_pruned = chunk \ union(candidates)`;
    /// `allowed -= chunk_pruned intersect usable`
    fn update_pruned_range(&mut self, meta: &IndexChunkMeta, candidates: &[Identifier]) {
        let mut chunk_pruned = TimeRanges::from_range(meta.start_time, meta.end_time);
        for candidate in candidates {
            chunk_pruned.subtract_range(candidate.start_time, candidate.end_time);
        }
        let valid_pruned = chunk_pruned.intersect(&self.usable_range);
        self.allowed_range.subtract(&valid_pruned);
    }

    /// After folding in all chunks relevant to `[start, end]`, may the
    /// outer scan skip that data range entirely?
    pub fn can_skip_data_range(&mut self, data_start: i64, data_end: i64) -> IndexResult<bool> {
        self.update_index_chunks(data_start, data_end)?;
        Ok(!self.allowed_range.intersects(data_start, data_end))
    }

    /// Feed a batch of raw data through the index's preprocessor and
    /// post-process every window still inside the allowed range
    ///
    /// Returns the remaining function budget.
    pub fn append_data_and_post_process(
        &mut self,
        batch: &[(i64, f64)],
        funcs: &mut [IndexFuncResult],
    ) -> IndexResult<usize> {
        self.ensure_scanning()?;
        let mut remaining = usize::MAX;
        self.index.start_flush_task(batch)?;
        while remaining > 0 && self.index.has_next_window(Some(&self.allowed_range))? {
            self.index.process_next_window()?;
            remaining = self.index.post_process_next(funcs)?;
        }
        self.index.end_flush_task();
        Ok(remaining)
    }

    /// Release all resources; the reader becomes unusable
    pub fn release(&mut self) {
        self.seq_chunks.clear();
        self.unseq_chunks.clear();
        self.index.close_and_release();
        self.state = QueryState::Released;
    }
}
