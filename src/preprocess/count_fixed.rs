//! Count-fixed sliding-window preprocessor
//!
//! A window is `window_range` consecutive points; consecutive windows start
//! `slide_step` points apart. The preprocessor is strictly sequential and
//! single-threaded: `has_next` locates the next admissible window,
//! `process_next` materializes it. No partial windows are ever emitted.
//!
//! A sub-flush (`clear`) freezes the emitted-window count into
//! `flushed_offset` and drops per-window storage for the flushed prefix;
//! window start indices stay monotonic relative to the source stream across
//! arbitrarily many sub-flushes.

use crate::buffer::{align_uniform, BufferPool, TsDataType, TvBuffer};
use crate::error::{IndexError, IndexResult};
use crate::preprocess::Identifier;
use crate::read::TimeRanges;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot of the unconsumed source tail, kept across an index-file close
/// so windows spanning the boundary are not lost
#[derive(Debug, Serialize, Deserialize)]
struct TailState {
    times: Vec<i64>,
    values: Vec<f64>,
}

/// Count-fixed sliding-window preprocessor
#[derive(Debug)]
pub struct CountFixedPreprocessor {
    data_type: TsDataType,
    window_range: usize,
    slide_step: usize,
    aligned_size: usize,
    store_identifier: bool,
    store_aligned: bool,
    in_query_mode: bool,
    closed: bool,

    /// Long-lived pooled source buffer
    src: TvBuffer,
    /// Stream index of `src[0]` (points dropped from the front so far)
    src_offset: usize,
    /// Stream index of the next window's first point
    current_start: usize,
    /// Stream index of the most recently emitted window's first point
    current_window: Option<usize>,

    /// Windows emitted this chunk, monotonic across sub-flushes
    slice_num: usize,
    /// `slice_num` frozen at the last sub-flush
    flushed_offset: usize,
    /// Identifiers for windows since the last sub-flush
    identifiers: Vec<Identifier>,
    /// Aligned sequences since the last sub-flush, when stored
    aligned: Vec<TvBuffer>,

    chunk_start_time: i64,
    chunk_end_time: i64,
}

impl CountFixedPreprocessor {
    pub fn new(
        data_type: TsDataType,
        window_range: usize,
        slide_step: usize,
        store_identifier: bool,
        store_aligned: bool,
        pool: &Arc<BufferPool>,
    ) -> IndexResult<Self> {
        if window_range == 0 {
            return Err(IndexError::Config("window_range must be positive".into()));
        }
        if slide_step == 0 {
            return Err(IndexError::Config("slide_step must be positive".into()));
        }
        Ok(Self {
            data_type,
            window_range,
            slide_step,
            aligned_size: window_range,
            store_identifier,
            store_aligned,
            in_query_mode: false,
            closed: false,
            src: pool.allocate(data_type),
            src_offset: 0,
            current_start: 0,
            current_window: None,
            slice_num: 0,
            flushed_offset: 0,
            identifiers: Vec::new(),
            aligned: Vec::new(),
            chunk_start_time: i64::MAX,
            chunk_end_time: i64::MIN,
        })
    }

    /// In query mode no features are derived; windows are only iterated
    pub fn set_query_mode(&mut self, in_query_mode: bool) {
        self.in_query_mode = in_query_mode;
    }

    pub fn in_query_mode(&self) -> bool {
        self.in_query_mode
    }

    pub fn data_type(&self) -> TsDataType {
        self.data_type
    }

    pub fn window_range(&self) -> usize {
        self.window_range
    }

    pub fn slide_step(&self) -> usize {
        self.slide_step
    }

    fn check_open(&self) -> IndexResult<()> {
        if self.closed {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }

    /// Enqueue a batch of points
    pub fn append_batch(&mut self, points: &[(i64, f64)]) -> IndexResult<()> {
        self.check_open()?;
        for &(time, value) in points {
            self.src.push(time, value);
        }
        Ok(())
    }

    /// Enqueue every point of a time/value buffer
    pub fn append_tv(&mut self, batch: &TvBuffer) -> IndexResult<()> {
        self.check_open()?;
        for i in 0..batch.len() {
            self.src.push(batch.time(i), batch.value_f64(i));
        }
        Ok(())
    }

    /// Source points currently buffered
    pub fn buffered_len(&self) -> usize {
        self.src.len()
    }

    /// Is another full window available whose start time passes `filter`?
    ///
    /// Windows rejected by the filter advance the cursor by `slide_step`
    /// without emitting; the accepted window is stable across repeated
    /// calls until `process_next` consumes it.
    pub fn has_next(&mut self, filter: Option<&TimeRanges>) -> IndexResult<bool> {
        self.check_open()?;
        loop {
            let rel = self.current_start - self.src_offset;
            if rel + self.window_range > self.src.len() {
                return Ok(false);
            }
            let start_time = self.src.time(rel);
            match filter {
                Some(ranges) if !ranges.contains_point(start_time) => {
                    self.current_start += self.slide_step;
                }
                _ => return Ok(true),
            }
        }
    }

    /// Materialize the current window; must follow a successful `has_next`
    pub fn process_next(&mut self) -> IndexResult<()> {
        self.check_open()?;
        let rel = self.current_start - self.src_offset;
        if rel + self.window_range > self.src.len() {
            self.closed = true;
            return Err(IndexError::Fatal(
                "process_next called without a successful has_next".into(),
            ));
        }

        let start_time = self.src.time(rel);
        let end_time = self.src.time(rel + self.window_range - 1);
        let identifier = Identifier::new(start_time, end_time, self.window_range as u32);

        self.slice_num += 1;
        if self.store_identifier {
            self.identifiers.push(identifier);
        }
        if self.store_aligned {
            let mut out = TvBuffer::new(self.data_type);
            align_uniform(&self.src, rel, self.window_range, self.aligned_size, &mut out);
            self.aligned.push(out);
        }
        self.chunk_start_time = self.chunk_start_time.min(start_time);
        self.chunk_end_time = self.chunk_end_time.max(end_time);

        self.current_window = Some(self.current_start);
        self.current_start += self.slide_step;
        Ok(())
    }

    /// Identifier of the most recently emitted window
    pub fn current_identifier(&self) -> IndexResult<Identifier> {
        let start = self
            .current_window
            .ok_or_else(|| IndexError::Fatal("no window has been processed".into()))?;
        let rel = start - self.src_offset;
        Ok(Identifier::new(
            self.src.time(rel),
            self.src.time(rel + self.window_range - 1),
            self.window_range as u32,
        ))
    }

    /// Aligned (L2) form of the most recently emitted window, drawn from
    /// the pool; the caller must release it
    pub fn current_aligned(&self, pool: &Arc<BufferPool>) -> IndexResult<TvBuffer> {
        let start = self
            .current_window
            .ok_or_else(|| IndexError::Fatal("no window has been processed".into()))?;
        let rel = start - self.src_offset;
        let mut out = pool.allocate(self.data_type);
        align_uniform(&self.src, rel, self.window_range, self.aligned_size, &mut out);
        Ok(out)
    }

    /// Source-buffer position `(relative_index, length)` of the most
    /// recently emitted window
    pub fn current_window_slice(&self) -> Option<(usize, usize)> {
        self.current_window
            .map(|start| (start - self.src_offset, self.window_range))
    }

    pub fn src(&self) -> &TvBuffer {
        &self.src
    }

    /// Windows emitted this chunk, including earlier sub-flushes
    pub fn slice_num(&self) -> usize {
        self.slice_num
    }

    pub fn flushed_offset(&self) -> usize {
        self.flushed_offset
    }

    /// Windows emitted since the last sub-flush
    pub fn current_chunk_size(&self) -> usize {
        self.slice_num - self.flushed_offset
    }

    pub fn chunk_start_time(&self) -> i64 {
        self.chunk_start_time
    }

    pub fn chunk_end_time(&self) -> i64 {
        self.chunk_end_time
    }

    /// Identifier for slice `slice_idx` of this chunk
    ///
    /// Requires identifier storage; indices below `flushed_offset` were
    /// dropped by an earlier sub-flush.
    pub fn identifier_at(&self, slice_idx: usize) -> IndexResult<Identifier> {
        if !self.store_identifier {
            return Err(IndexError::Fatal(
                "identifier storage is disabled for this preprocessor".into(),
            ));
        }
        if slice_idx < self.flushed_offset {
            return Err(IndexError::Fatal(format!(
                "slice {} was flushed (offset {})",
                slice_idx, self.flushed_offset
            )));
        }
        self.identifiers
            .get(slice_idx - self.flushed_offset)
            .copied()
            .ok_or_else(|| {
                IndexError::Fatal(format!(
                    "slice {} out of range ({} stored)",
                    slice_idx,
                    self.identifiers.len()
                ))
            })
    }

    /// Stored aligned sequences since the last sub-flush
    pub fn stored_aligned(&self) -> &[TvBuffer] {
        &self.aligned
    }

    /// Sub-flush: freeze emitted windows and drop per-window storage.
    /// Returns an estimate of the bytes released.
    pub fn clear(&mut self) -> usize {
        let mut released = self.identifiers.len() * IDENTIFIER_COST;
        released += self
            .aligned
            .iter()
            .map(|buf| buf.memory_bytes())
            .sum::<usize>();

        self.flushed_offset = self.slice_num;
        self.identifiers.clear();
        self.aligned.clear();
        self.chunk_start_time = i64::MAX;
        self.chunk_end_time = i64::MIN;
        released
    }

    /// Discard source points no future window can reach
    pub fn clear_processed_src_data(&mut self) {
        let keep_from = self.current_start - self.src_offset;
        self.src.drain_front(keep_from);
        self.src_offset = self.current_start;
        // the emitted-window cursor would dangle after compaction
        self.current_window = None;
    }

    /// Snapshot the unconsumed tail for the next file's preprocessor
    pub fn serialize_tail(&self) -> IndexResult<Vec<u8>> {
        self.check_open()?;
        let rel = self.current_start - self.src_offset;
        let len = self.src.len().saturating_sub(rel);
        let state = TailState {
            times: (0..len).map(|i| self.src.time(rel + i)).collect(),
            values: (0..len).map(|i| self.src.value_f64(rel + i)).collect(),
        };
        Ok(bincode::serialize(&state)?)
    }

    /// Restore a tail snapshot produced by `serialize_tail`
    pub fn restore_tail(&mut self, previous: Option<&[u8]>) -> IndexResult<()> {
        self.check_open()?;
        let Some(bytes) = previous else {
            return Ok(());
        };
        if bytes.is_empty() {
            return Ok(());
        }
        let state: TailState = bincode::deserialize(bytes)?;
        for (time, value) in state.times.into_iter().zip(state.values) {
            self.src.push(time, value);
        }
        Ok(())
    }

    /// Return the source buffer to the pool and enter the terminal state
    pub fn close_and_release(&mut self, pool: &Arc<BufferPool>) {
        if self.closed {
            return;
        }
        let buf = std::mem::replace(&mut self.src, TvBuffer::new(self.data_type));
        pool.release(buf);
        self.identifiers.clear();
        self.aligned.clear();
        self.closed = true;
    }

    /// Amortized per-window memory cost reported to the flush scheduler
    pub fn amortized_size(&self) -> usize {
        let mut cost = 0;
        if self.store_identifier {
            cost += IDENTIFIER_COST;
        }
        if self.store_aligned {
            cost += self.aligned_size * (8 + self.data_type.size_of());
        }
        cost
    }
}

/// In-memory cost of one stored identifier (three i64 slots)
const IDENTIFIER_COST: usize = 3 * 8;

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new())
    }

    fn preprocessor(window: usize, step: usize) -> CountFixedPreprocessor {
        CountFixedPreprocessor::new(TsDataType::F64, window, step, true, false, &pool()).unwrap()
    }

    fn feed(p: &mut CountFixedPreprocessor, n: usize) {
        let points: Vec<(i64, f64)> = (0..n).map(|i| (i as i64 * 100, i as f64)).collect();
        p.append_batch(&points).unwrap();
    }

    fn drain(p: &mut CountFixedPreprocessor) -> Vec<Identifier> {
        let mut out = Vec::new();
        while p.has_next(None).unwrap() {
            p.process_next().unwrap();
            out.push(p.current_identifier().unwrap());
        }
        out
    }

    #[test]
    fn test_window_count_formula() {
        // emitted windows = max(0, floor((len - W)/S) + 1)
        for (len, w, s) in [(10, 3, 1), (10, 3, 3), (10, 10, 1), (9, 10, 1), (7, 2, 3)] {
            let mut p = preprocessor(w, s);
            feed(&mut p, len);
            let expected = if len < w { 0 } else { (len - w) / s + 1 };
            assert_eq!(drain(&mut p).len(), expected, "len={} w={} s={}", len, w, s);
        }
    }

    #[test]
    fn test_windows_are_monotone() {
        let mut p = preprocessor(4, 2);
        feed(&mut p, 12);
        let ids = drain(&mut p);
        for pair in ids.windows(2) {
            assert_eq!(pair[1].start_time - pair[0].start_time, 200);
            assert_eq!(pair[0].count, 4);
        }
    }

    #[test]
    fn test_filter_rejects_advance_without_emitting() {
        let mut p = preprocessor(2, 1);
        feed(&mut p, 8); // start times 0..700
        let filter = TimeRanges::from_range(300, 500);

        let mut ids = Vec::new();
        while p.has_next(Some(&filter)).unwrap() {
            p.process_next().unwrap();
            ids.push(p.current_identifier().unwrap());
        }
        let starts: Vec<i64> = ids.iter().map(|i| i.start_time).collect();
        assert_eq!(starts, vec![300, 400, 500]);
        assert_eq!(p.slice_num(), 3);
    }

    #[test]
    fn test_sub_flush_restarts_identifiers() {
        let mut p = preprocessor(3, 1);
        feed(&mut p, 5);
        let first = drain(&mut p);
        assert_eq!(first.len(), 3);

        // sub-flush
        p.clear();
        assert_eq!(p.flushed_offset(), 3);
        assert_eq!(p.current_chunk_size(), 0);
        p.clear_processed_src_data();

        feed2(&mut p, 5, 10);
        let second = drain(&mut p);
        assert_eq!(second.len(), 5);

        // concatenation covers the 8-window sequence, strictly monotonic
        let all: Vec<i64> = first
            .iter()
            .chain(second.iter())
            .map(|i| i.start_time)
            .collect();
        assert_eq!(all, vec![0, 100, 200, 300, 400, 500, 600, 700]);

        // chunk-local identifier lookup restarts at the flushed offset
        assert_eq!(p.identifier_at(3).unwrap(), second[0]);
        assert!(p.identifier_at(2).is_err());
    }

    fn feed2(p: &mut CountFixedPreprocessor, from: usize, to: usize) {
        let points: Vec<(i64, f64)> = (from..to).map(|i| (i as i64 * 100, i as f64)).collect();
        p.append_batch(&points).unwrap();
    }

    #[test]
    fn test_aligned_window_length() {
        let pool = pool();
        let mut p =
            CountFixedPreprocessor::new(TsDataType::F64, 4, 4, true, false, &pool).unwrap();
        feed(&mut p, 4);
        assert!(p.has_next(None).unwrap());
        p.process_next().unwrap();

        let aligned = p.current_aligned(&pool).unwrap();
        assert_eq!(aligned.len(), 4);
        assert_eq!(aligned.value_f64(0), 0.0);
        assert_eq!(aligned.value_f64(3), 3.0);
        pool.release(aligned);
    }

    #[test]
    fn test_store_aligned_keeps_sequences() {
        let pool = pool();
        let mut p =
            CountFixedPreprocessor::new(TsDataType::F64, 3, 2, true, true, &pool).unwrap();
        feed(&mut p, 7);
        drain(&mut p);

        let stored = p.stored_aligned();
        assert_eq!(stored.len(), 3);
        for buf in stored {
            assert_eq!(buf.len(), 3);
        }
        assert_eq!(stored[1].value_f64(0), 2.0);

        // aligned storage is dropped by a sub-flush
        let released = p.clear();
        assert!(released > 3 * IDENTIFIER_COST);
        assert!(p.stored_aligned().is_empty());
    }

    #[test]
    fn test_process_next_without_has_next_is_fatal() {
        let mut p = preprocessor(5, 5);
        feed(&mut p, 3);
        assert!(!p.has_next(None).unwrap());
        let err = p.process_next().unwrap_err();
        assert!(matches!(err, IndexError::Fatal(_)));
        // terminal closed state afterwards
        assert!(matches!(p.has_next(None), Err(IndexError::Closed)));
    }

    #[test]
    fn test_close_and_release_is_terminal() {
        let pool = pool();
        let mut p =
            CountFixedPreprocessor::new(TsDataType::F64, 2, 1, true, false, &pool).unwrap();
        feed(&mut p, 4);
        p.close_and_release(&pool);
        assert!(matches!(p.append_batch(&[(0, 0.0)]), Err(IndexError::Closed)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_tail_snapshot_roundtrip() {
        let pool = pool();
        let mut p =
            CountFixedPreprocessor::new(TsDataType::F64, 3, 1, true, false, &pool).unwrap();
        feed(&mut p, 5);
        drain(&mut p);

        // tail = points the next window would need (starts at index 3)
        let tail = p.serialize_tail().unwrap();

        let mut q =
            CountFixedPreprocessor::new(TsDataType::F64, 3, 1, true, false, &pool).unwrap();
        q.restore_tail(Some(&tail)).unwrap();
        assert_eq!(q.buffered_len(), 2);
        q.append_batch(&[(500, 5.0)]).unwrap();
        assert!(q.has_next(None).unwrap());
        q.process_next().unwrap();
        assert_eq!(q.current_identifier().unwrap().start_time, 300);
    }
}
