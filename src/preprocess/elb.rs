//! ELB specialization of the count-fixed preprocessor
//!
//! Composition, not inheritance: [`CountFixedPreprocessor`] owns the window
//! iteration contract and [`ElbFeatureExtractor`] observes each emitted
//! window, deriving the per-window MBR. In query mode the observer is
//! bypassed entirely.

use crate::buffer::{BufferPool, TsDataType, TvBuffer};
use crate::error::{IndexError, IndexResult};
use crate::feature::{CalcParam, ElbFeatureExtractor, ElbType};
use crate::preprocess::{CountFixedPreprocessor, Identifier};
use crate::read::TimeRanges;
use std::sync::Arc;

/// Count-fixed preprocessor that derives an ELB MBR for every window
#[derive(Debug)]
pub struct ElbPreprocessor {
    inner: CountFixedPreprocessor,
    extractor: ElbFeatureExtractor,
    store_feature: bool,
    /// MBR of the most recent window: `[u_0, l_0, …, u_{b-1}, l_{b-1}]`
    current_mbr: Vec<f64>,
    /// Flattened MBRs since the last sub-flush, when stored
    mbrs: Vec<f64>,
}

impl ElbPreprocessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_type: TsDataType,
        window_range: usize,
        slide_step: usize,
        block_num: usize,
        calc_param: CalcParam,
        elb_type: ElbType,
        store_identifier: bool,
        store_aligned: bool,
        store_feature: bool,
        pool: &Arc<BufferPool>,
    ) -> IndexResult<Self> {
        let inner = CountFixedPreprocessor::new(
            data_type,
            window_range,
            slide_step,
            store_identifier,
            store_aligned,
            pool,
        )?;
        let extractor = ElbFeatureExtractor::new(window_range, block_num, calc_param, elb_type)?;
        Ok(Self {
            inner,
            extractor,
            store_feature,
            current_mbr: Vec::with_capacity(2 * block_num),
            mbrs: Vec::new(),
        })
    }

    pub fn block_num(&self) -> usize {
        self.extractor.block_num()
    }

    pub fn set_query_mode(&mut self, in_query_mode: bool) {
        self.inner.set_query_mode(in_query_mode);
    }

    pub fn append_batch(&mut self, points: &[(i64, f64)]) -> IndexResult<()> {
        self.inner.append_batch(points)
    }

    pub fn append_tv(&mut self, batch: &TvBuffer) -> IndexResult<()> {
        self.inner.append_tv(batch)
    }

    pub fn has_next(&mut self, filter: Option<&TimeRanges>) -> IndexResult<bool> {
        self.inner.has_next(filter)
    }

    /// Materialize the next window and, outside query mode, its MBR
    pub fn process_next(&mut self) -> IndexResult<()> {
        self.inner.process_next()?;
        if !self.inner.in_query_mode() {
            let (offset, _) = self
                .inner
                .current_window_slice()
                .ok_or_else(|| IndexError::Fatal("window cursor lost after process".into()))?;
            self.current_mbr.clear();
            self.extractor
                .extract(self.inner.src(), offset, &mut self.current_mbr);
            if self.store_feature {
                self.mbrs.extend_from_slice(&self.current_mbr);
            }
        }
        Ok(())
    }

    /// Copy the latest MBR into R-tree corner/range form:
    /// `corner[i] = lower_i`, `range[i] = upper_i - lower_i`
    pub fn copy_feature(&self, corners: &mut [f32], ranges: &mut [f32]) -> IndexResult<()> {
        let b = self.extractor.block_num();
        if corners.len() != b || ranges.len() != b {
            return Err(IndexError::Fatal(format!(
                "feature buffers sized {}/{}, expected {}",
                corners.len(),
                ranges.len(),
                b
            )));
        }
        if self.current_mbr.len() != 2 * b {
            return Err(IndexError::Fatal("no feature computed yet".into()));
        }
        for i in 0..b {
            let upper = self.current_mbr[2 * i];
            let lower = self.current_mbr[2 * i + 1];
            corners[i] = lower as f32;
            ranges[i] = (upper - lower) as f32;
        }
        Ok(())
    }

    /// Up to `latest_n` most recent features as `(upper, lower)` pairs
    ///
    /// If features are not stored, only the most recent one is accessible.
    pub fn latest_features(&self, latest_n: usize) -> Vec<Vec<(f64, f64)>> {
        let b = self.extractor.block_num();
        let chunk_size = self.inner.current_chunk_size();
        let latest_n = latest_n.min(chunk_size);
        if latest_n == 0 {
            return Vec::new();
        }
        if !self.store_feature {
            if self.current_mbr.len() == 2 * b {
                return vec![format_feature(&self.current_mbr, 0, b)];
            }
            return Vec::new();
        }
        let stored = self.mbrs.len() / (2 * b);
        let start = stored.saturating_sub(latest_n);
        (start..stored)
            .map(|idx| format_feature(&self.mbrs, idx, b))
            .collect()
    }

    pub fn current_identifier(&self) -> IndexResult<Identifier> {
        self.inner.current_identifier()
    }

    pub fn identifier_at(&self, slice_idx: usize) -> IndexResult<Identifier> {
        self.inner.identifier_at(slice_idx)
    }

    pub fn current_aligned(&self, pool: &Arc<BufferPool>) -> IndexResult<TvBuffer> {
        self.inner.current_aligned(pool)
    }

    pub fn slice_num(&self) -> usize {
        self.inner.slice_num()
    }

    pub fn flushed_offset(&self) -> usize {
        self.inner.flushed_offset()
    }

    pub fn current_chunk_size(&self) -> usize {
        self.inner.current_chunk_size()
    }

    pub fn chunk_start_time(&self) -> i64 {
        self.inner.chunk_start_time()
    }

    pub fn chunk_end_time(&self) -> i64 {
        self.inner.chunk_end_time()
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.buffered_len()
    }

    pub fn src(&self) -> &TvBuffer {
        self.inner.src()
    }

    /// Sub-flush; returns an estimate of the bytes released
    pub fn clear(&mut self) -> usize {
        let mut released = 0;
        if self.store_feature {
            released += self.inner.current_chunk_size() * self.extractor.amortized_size();
            self.mbrs.clear();
        }
        released + self.inner.clear()
    }

    pub fn clear_processed_src_data(&mut self) {
        self.inner.clear_processed_src_data();
    }

    pub fn serialize_tail(&self) -> IndexResult<Vec<u8>> {
        self.inner.serialize_tail()
    }

    pub fn restore_tail(&mut self, previous: Option<&[u8]>) -> IndexResult<()> {
        self.inner.restore_tail(previous)
    }

    pub fn close_and_release(&mut self, pool: &Arc<BufferPool>) {
        self.inner.close_and_release(pool);
        self.current_mbr.clear();
        self.mbrs.clear();
    }

    pub fn amortized_size(&self) -> usize {
        let mut cost = self.inner.amortized_size();
        if self.store_feature {
            cost += self.extractor.amortized_size();
        }
        cost
    }
}

fn format_feature(flat: &[f64], idx: usize, b: usize) -> Vec<(f64, f64)> {
    (0..b)
        .map(|i| (flat[2 * b * idx + 2 * i], flat[2 * b * idx + 2 * i + 1]))
        .collect()
}
