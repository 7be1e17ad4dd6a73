//! MBR index over ELB features
//!
//! Extracted features land in an R-tree as minimum bounding rectangles;
//! leaf payloads are window ids resolved through the preprocessor's
//! identifier list at flush time. The index is driven from outside by the
//! host's flush pipeline (build side) or by a query reader (query side);
//! the two sides are never interleaved on one instance.
//!
//! The R-tree prunes with a lower-bound threshold of zero: the tree then
//! only organizes identifiers, and all similarity filtering happens in
//! `post_process_next`. Correct (no false dismissals) but conservative; a
//! tighter lower bound would trade exactness obligations for pruning power.

use crate::buffer::{BufferPool, TsDataType, TvBuffer};
use crate::config::{
    self, EngineConfig, IndexProps, DISTANCE, ELB_CALC_PARAM, ELB_CALC_PARAM_SINGLE, ELB_TYPE,
    ELB_THRESHOLD_BASE, ELB_THRESHOLD_RATIO, FEATURE_DIM, INDEX_RANGE_STRATEGY, INDEX_SLIDE_STEP,
    INDEX_WINDOW_RANGE, MAX_ENTRIES, MIN_ENTRIES, PATTERN, SEED_PICKER, THRESHOLD,
};
use crate::distance::Distance;
use crate::error::{IndexError, IndexResult};
use crate::feature::{CalcParam, ElbType};
use crate::index::{IndexType, RangeStrategy};
use crate::io::{ByteReader, IndexFlushChunk};
use crate::preprocess::{ElbPreprocessor, Identifier};
use crate::read::{IndexFuncResult, TimeRanges};
use crate::rtree::{Rtree, SeedPicker};
use std::collections::HashMap;
use std::sync::Arc;

/// Typed view of the per-index property map
#[derive(Debug, Clone)]
pub struct MbrIndexConfig {
    pub strategy: RangeStrategy,
    pub window_range: usize,
    pub slide_step: usize,
    pub feature_dim: usize,
    pub max_entries: usize,
    pub min_entries: usize,
    pub seed_picker: SeedPicker,
    pub distance: Distance,
    pub elb_type: ElbType,
    pub calc_param: CalcParam,
}

impl MbrIndexConfig {
    /// Parse and normalize the property map
    pub fn parse(props: &IndexProps, engine: &EngineConfig) -> IndexResult<Self> {
        let strategy = match props.get(INDEX_RANGE_STRATEGY) {
            Some(s) => RangeStrategy::parse(s)?,
            None => RangeStrategy::Default,
        };
        let window_range = config::prop_usize(props, INDEX_WINDOW_RANGE)?
            .unwrap_or(engine.default_window_range);
        let slide_step = config::prop_usize(props, INDEX_SLIDE_STEP)?.unwrap_or(window_range);
        let feature_dim = config::prop_usize(props, FEATURE_DIM)?.unwrap_or(4);
        let mut max_entries = config::prop_usize(props, MAX_ENTRIES)?.unwrap_or(50);
        let mut min_entries = config::prop_usize(props, MIN_ENTRIES)?.unwrap_or(2);

        if max_entries < min_entries {
            tracing::warn!(
                "max_entries {} is less than min_entries {}, swapping",
                max_entries,
                min_entries
            );
            max_entries = max_entries.max(min_entries);
            min_entries = min_entries.min(max_entries);
        }
        if max_entries <= 1 {
            tracing::warn!("max_entries must be at least 2, falling back to 50");
            max_entries = 50;
        }

        let seed_picker = match props.get(SEED_PICKER) {
            Some(s) => SeedPicker::parse(s)?,
            None => SeedPicker::Linear,
        };
        let distance = match props.get(DISTANCE) {
            Some(s) => Distance::parse(s)?,
            None => Distance::Euclidean,
        };
        let elb_type = match props.get(ELB_TYPE) {
            Some(s) => ElbType::parse(s)?,
            None => ElbType::Ele,
        };

        let calc_param_name = props
            .get(ELB_CALC_PARAM)
            .map(String::as_str)
            .unwrap_or(ELB_CALC_PARAM_SINGLE);
        let calc_param = match calc_param_name {
            ELB_CALC_PARAM_SINGLE => {
                let base = config::prop_f64(props, ELB_THRESHOLD_BASE)?.unwrap_or(-1.0);
                let ratio = config::prop_f64(props, ELB_THRESHOLD_RATIO)?.unwrap_or(-1.0);
                CalcParam::single(base, ratio)
            }
            other => {
                return Err(IndexError::Config(format!(
                    "unknown elb_calc_param: {}",
                    other
                )))
            }
        };

        if feature_dim > window_range {
            return Err(IndexError::Config(format!(
                "feature_dim {} cannot be larger than window_range {}",
                feature_dim, window_range
            )));
        }

        Ok(Self {
            strategy,
            window_range,
            slide_step,
            feature_dim,
            max_entries,
            min_entries,
            seed_picker,
            distance,
            elb_type,
            calc_param,
        })
    }
}

/// Per-series ELB index instance
pub struct MbrIndex {
    path: String,
    index_type: IndexType,
    config: MbrIndexConfig,
    index_start_time: i64,
    pool: Arc<BufferPool>,

    preprocessor: ElbPreprocessor,
    rtree: Rtree<u32>,
    /// ELB features are rectangles; a point-feature index would insert
    /// zero-extent entries instead
    use_point_type: bool,
    current_corners: Vec<f32>,
    current_ranges: Vec<f32>,
    amortized_per_input: usize,

    // query side
    patterns: Option<Vec<f64>>,
    threshold: f64,
    identifier_map: HashMap<u32, Identifier>,

    closed: bool,
}

impl MbrIndex {
    pub fn new(
        path: impl Into<String>,
        data_type: TsDataType,
        index_start_time: i64,
        props: &IndexProps,
        engine: &EngineConfig,
        pool: &Arc<BufferPool>,
    ) -> IndexResult<Self> {
        let config = MbrIndexConfig::parse(props, engine)?;
        let preprocessor = ElbPreprocessor::new(
            data_type,
            config.window_range,
            config.slide_step,
            config.feature_dim,
            config.calc_param,
            config.elb_type,
            true,
            false,
            false,
            pool,
        )?;
        let rtree = Rtree::new(
            config.max_entries,
            config.min_entries,
            config.feature_dim,
            config.seed_picker,
        );
        let amortized_per_input =
            calc_amortized_cost(config.max_entries, config.min_entries, config.feature_dim, engine);
        let feature_dim = config.feature_dim;
        Ok(Self {
            path: path.into(),
            index_type: IndexType::Elb,
            config,
            index_start_time,
            pool: Arc::clone(pool),
            preprocessor,
            rtree,
            use_point_type: false,
            current_corners: vec![0.0; feature_dim],
            current_ranges: vec![0.0; feature_dim],
            amortized_per_input,
            patterns: None,
            threshold: f64::INFINITY,
            identifier_map: HashMap::new(),
            closed: false,
        })
    }

    fn check_open(&self) -> IndexResult<()> {
        if self.closed {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn config(&self) -> &MbrIndexConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> &ElbPreprocessor {
        &self.preprocessor
    }

    // ==================== Build side ====================

    /// Feed a batch of points into the preprocessor at the start of a
    /// flush task (or of a query scan)
    pub fn start_flush_task(&mut self, batch: &[(i64, f64)]) -> IndexResult<()> {
        self.check_open()?;
        self.preprocessor.append_batch(batch)
    }

    /// Feed a time/value buffer
    pub fn start_flush_task_tv(&mut self, batch: &TvBuffer) -> IndexResult<()> {
        self.check_open()?;
        self.preprocessor.append_tv(batch)
    }

    /// Should data from `offset` onward be indexed at all?
    pub fn check_need_index(&self, offset: usize) -> bool {
        self.config.strategy.need_build_index(
            self.preprocessor.src(),
            offset,
            self.index_start_time,
        )
    }

    /// Is another window available, honoring an optional time filter?
    pub fn has_next_window(&mut self, filter: Option<&TimeRanges>) -> IndexResult<bool> {
        self.preprocessor.has_next(filter)
    }

    /// Materialize the next window
    pub fn process_next_window(&mut self) -> IndexResult<()> {
        self.preprocessor.process_next()
    }

    /// Insert the newest window's feature into the R-tree
    pub fn build_next(&mut self) -> IndexResult<bool> {
        self.check_open()?;
        self.preprocessor
            .copy_feature(&mut self.current_corners, &mut self.current_ranges)?;
        let current_idx = (self.preprocessor.slice_num() - 1) as u32;
        if self.use_point_type {
            self.rtree.insert_point(&self.current_corners, current_idx);
        } else {
            self.rtree
                .insert(&self.current_corners, &self.current_ranges, current_idx);
        }
        Ok(true)
    }

    /// Serialize the chunk's R-tree; `None` when nothing was built
    ///
    /// Flush does not reset the tree; a following `clear` does.
    pub fn flush(&mut self) -> IndexResult<Option<IndexFlushChunk>> {
        self.check_open()?;
        if self.preprocessor.current_chunk_size() == 0 {
            tracing::warn!("Nothing to be flushed for {}", self.path);
            return Ok(None);
        }
        let mut body = Vec::new();
        let preprocessor = &self.preprocessor;
        self.rtree.serialize(&mut body, &mut |idx, out| {
            let identifier = preprocessor.identifier_at(*idx as usize)?;
            identifier.write_to(out);
            Ok(())
        })?;
        tracing::debug!(
            "Flushing index chunk for {}: {} windows, {} bytes",
            self.path,
            self.preprocessor.current_chunk_size(),
            body.len()
        );
        Ok(Some(IndexFlushChunk {
            path: self.path.clone(),
            index_type: self.index_type,
            body,
            start_time: self.preprocessor.chunk_start_time(),
            end_time: self.preprocessor.chunk_end_time(),
        }))
    }

    /// Sub-flush: release chunk state and reset the tree. Returns an
    /// estimate of the bytes freed.
    pub fn clear(&mut self) -> usize {
        let mut released = self.preprocessor.current_chunk_size() * self.amortized_per_input;
        released += self.preprocessor.clear();
        self.rtree = Rtree::new(
            self.config.max_entries,
            self.config.min_entries,
            self.config.feature_dim,
            self.config.seed_picker,
        );
        released
    }

    /// A flush task is complete; drop consumed source data
    pub fn end_flush_task(&mut self) {
        self.preprocessor.clear_processed_src_data();
    }

    /// Amortized per-point memory cost for the flush scheduler
    pub fn amortized_size(&self) -> usize {
        self.preprocessor.amortized_size() + self.amortized_per_input
    }

    /// Snapshot the unconsumed source tail across a file close
    pub fn serialize_tail(&self) -> IndexResult<Vec<u8>> {
        self.preprocessor.serialize_tail()
    }

    pub fn restore_tail(&mut self, previous: Option<&[u8]>) -> IndexResult<()> {
        self.preprocessor.restore_tail(previous)
    }

    /// Release everything; all later calls fail with `Closed`
    pub fn close_and_release(&mut self) {
        if self.closed {
            return;
        }
        self.clear();
        self.preprocessor.close_and_release(&self.pool);
        self.identifier_map.clear();
        self.closed = true;
    }

    /// Discard in-progress state and mark the persisted chunks for removal
    /// by the host; the instance becomes unusable
    pub fn delete(&mut self) {
        tracing::info!("Deleting index on {}", self.path);
        self.close_and_release();
    }

    // ==================== Query side ====================

    /// Initialize query parameters: `threshold` (default unbounded) and
    /// the required `pattern`
    pub fn init_query(&mut self, query_props: &IndexProps) -> IndexResult<()> {
        self.check_open()?;
        self.threshold = config::prop_f64(query_props, THRESHOLD)?.unwrap_or(f64::INFINITY);
        let pattern_str = query_props
            .get(PATTERN)
            .ok_or_else(|| IndexError::Config(format!("missing parameter: {}", PATTERN)))?;
        let patterns = config::parse_numeric_pattern(pattern_str)?;
        if patterns.len() < self.config.window_range {
            return Err(IndexError::Config(format!(
                "pattern length {} is shorter than window_range {}",
                patterns.len(),
                self.config.window_range
            )));
        }
        self.patterns = Some(patterns);
        self.preprocessor.set_query_mode(true);
        Ok(())
    }

    /// The query feature: per-block means of the pattern, zero extent
    ///
    /// Block boundaries must match the extractor's exactly: the last block
    /// absorbs the `window_range % feature_dim` remainder.
    fn fill_query_feature(&mut self) -> IndexResult<()> {
        let patterns = self
            .patterns
            .as_ref()
            .ok_or_else(|| IndexError::Fatal("query not initialized".into()))?;
        let b = self.config.feature_dim;
        let interval_width = self.config.window_range / b;
        for i in 0..b {
            let block_len = if i == b - 1 {
                self.config.window_range - (b - 1) * interval_width
            } else {
                interval_width
            };
            let mut sum = 0.0;
            for j in 0..block_len {
                sum += patterns[i * interval_width + j];
            }
            self.current_corners[i] = (sum / block_len as f64) as f32;
            self.current_ranges[i] = 0.0;
        }
        Ok(())
    }

    /// The R-tree pruning threshold derived from the query threshold.
    ///
    /// Zero: candidates are exactly the windows whose ELB envelope
    /// contains the pattern's block means.
    fn calc_lower_bound_threshold(&self, _query_threshold: f64) -> f64 {
        0.0
    }

    /// Query one index chunk, returning candidate identifiers that may
    /// contain matches (never dismissing a true match)
    pub fn query_by_index(&mut self, chunk_body: &[u8]) -> IndexResult<Vec<Identifier>> {
        self.check_open()?;
        self.fill_query_feature()?;

        let identifier_map = &mut self.identifier_map;
        identifier_map.clear();
        let mut next_id: u32 = 0;
        let mut reader = ByteReader::new(chunk_body);
        let chunk_rtree: Rtree<u32> = Rtree::deserialize(&mut reader, &mut |r| {
            let identifier = Identifier::read_from(r)?;
            let id = next_id;
            next_id += 1;
            identifier_map.insert(id, identifier);
            Ok(id)
        })?;

        let lower_bound = self.calc_lower_bound_threshold(self.threshold);
        let candidate_ids =
            chunk_rtree.search_with_threshold(&self.current_corners, &self.current_ranges, lower_bound);

        let candidates = candidate_ids
            .iter()
            .filter_map(|id| self.identifier_map.get(id).copied())
            .collect();
        self.identifier_map.clear();
        Ok(candidates)
    }

    /// Evaluate the query functions against the newly materialized window
    ///
    /// Returns the remaining function budget (the number of accumulators
    /// still accepting values).
    pub fn post_process_next(&mut self, funcs: &mut [IndexFuncResult]) -> IndexResult<usize> {
        self.check_open()?;
        let patterns = self
            .patterns
            .as_ref()
            .ok_or_else(|| IndexError::Fatal("query not initialized".into()))?;

        let aligned = self.preprocessor.current_aligned(&self.pool)?;
        let aligned_values = aligned.values_f64(0, aligned.len());
        let dist = self.config.distance.dist(&aligned_values, patterns);

        let remaining = funcs.len();
        if dist <= self.threshold {
            let identifier = self.preprocessor.current_identifier()?;
            for result in funcs.iter_mut() {
                result.accumulate(&identifier, &aligned_values, patterns);
            }
        }
        self.pool.release(aligned);
        Ok(remaining)
    }
}

/// Amortized R-tree cost per inserted point
///
/// Cautious full `a`-ary tree estimation: with `n` points at flush time,
/// `inner_num = (a*n/b - 1)/(a - 1)` and the per-point cost is
/// `(1 + 1/inner_num) * leaf_cost`.
fn calc_amortized_cost(a: usize, b: usize, dim: usize, engine: &EngineConfig) -> usize {
    let leaf_cost = rtree_node_cost(dim);
    let n = engine.index_buffer_size / (leaf_cost + 3 * 8);
    if n < b {
        return leaf_cost;
    }
    let inner_num = (a as f64 * n as f64 / b as f64 - 1.0) / (a as f64 - 1.0);
    leaf_cost + (leaf_cost as f64 / inner_num) as usize
}

/// Two f32 bound arrays + payload + node kind + two arena handles
fn rtree_node_cost(dim: usize) -> usize {
    (2 * dim * 4 + 4) + 1 + 2 * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EngineConfig {
        EngineConfig::default()
    }

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new())
    }

    fn props(pairs: &[(&str, &str)]) -> IndexProps {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn build_index(index_props: IndexProps) -> MbrIndex {
        MbrIndex::new(
            "root.sg.d1.s1",
            TsDataType::F64,
            0,
            &index_props,
            &engine(),
            &pool(),
        )
        .unwrap()
    }

    /// Feed points, build every window, and return the flushed chunk
    fn build_and_flush(index: &mut MbrIndex, points: &[(i64, f64)]) -> IndexFlushChunk {
        index.start_flush_task(points).unwrap();
        while index.has_next_window(None).unwrap() {
            index.process_next_window().unwrap();
            index.build_next().unwrap();
        }
        index.flush().unwrap().expect("chunk should not be empty")
    }

    #[test]
    fn test_config_defaults() {
        let config = MbrIndexConfig::parse(&props(&[]), &engine()).unwrap();
        assert_eq!(config.feature_dim, 4);
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.min_entries, 2);
        assert_eq!(config.window_range, 64);
        assert_eq!(config.slide_step, 64);
        assert_eq!(config.seed_picker, SeedPicker::Linear);
        assert_eq!(config.distance, Distance::Euclidean);
        assert_eq!(config.elb_type, ElbType::Ele);
    }

    #[test]
    fn test_inverted_capacities_normalize() {
        let config = MbrIndexConfig::parse(
            &props(&[(MAX_ENTRIES, "1"), (MIN_ENTRIES, "5"), (INDEX_WINDOW_RANGE, "8")]),
            &engine(),
        )
        .unwrap();
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.min_entries, 5);
    }

    #[test]
    fn test_feature_dim_exceeding_window_rejected() {
        let result = MbrIndexConfig::parse(
            &props(&[(INDEX_WINDOW_RANGE, "4"), (FEATURE_DIM, "8")]),
            &engine(),
        );
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[test]
    fn test_build_flush_query_candidates() {
        // W=4, b=2, M=4, m=2, ELE over values 1..=6: windows
        // [1,2,3,4], [2,3,4,5], [3,4,5,6]
        let mut index = build_index(props(&[
            (INDEX_WINDOW_RANGE, "4"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "2"),
            (MAX_ENTRIES, "4"),
            (MIN_ENTRIES, "2"),
        ]));
        let points: Vec<(i64, f64)> = (0..6).map(|i| (i * 100, (i + 1) as f64)).collect();
        let chunk = build_and_flush(&mut index, &points);
        assert_eq!(chunk.start_time, 0);
        assert_eq!(chunk.end_time, 500);

        let mut query = build_index(props(&[
            (INDEX_WINDOW_RANGE, "4"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "2"),
        ]));
        query
            .init_query(&props(&[(PATTERN, "3,3,5,5"), (THRESHOLD, "0.5")]))
            .unwrap();
        let candidates = query.query_by_index(&chunk.body).unwrap();

        // pattern block means (3, 5) fall inside the envelopes of the
        // second and third windows only
        let mut starts: Vec<i64> = candidates.iter().map(|c| c.start_time).collect();
        starts.sort_unstable();
        assert_eq!(starts, vec![100, 200]);
    }

    #[test]
    fn test_exact_window_is_never_dismissed() {
        // a window identical to the pattern always sits inside its own
        // ELE envelope, so it survives the zero lower-bound search
        let mut index = build_index(props(&[
            (INDEX_WINDOW_RANGE, "4"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "2"),
        ]));
        let values = [5.0, 1.0, 4.0, 2.0, 9.0, 3.0, 7.0, 0.0];
        let points: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 10, *v))
            .collect();
        let chunk = build_and_flush(&mut index, &points);

        // pattern = the window starting at index 2: [4,2,9,3]
        let mut query = build_index(props(&[
            (INDEX_WINDOW_RANGE, "4"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "2"),
        ]));
        query
            .init_query(&props(&[(PATTERN, "4,2,9,3"), (THRESHOLD, "0.5")]))
            .unwrap();
        let candidates = query.query_by_index(&chunk.body).unwrap();
        assert!(candidates.iter().any(|c| c.start_time == 20));
    }

    #[test]
    fn test_no_false_dismissals_with_group_envelopes() {
        // ELB_GROUP with the query threshold as deviation budget: every
        // window within the threshold must be a candidate (b^2 <= W)
        let elb_props = || {
            props(&[
                (INDEX_WINDOW_RANGE, "4"),
                (INDEX_SLIDE_STEP, "1"),
                (FEATURE_DIM, "2"),
                (ELB_TYPE, "ELB_GROUP"),
                (ELB_THRESHOLD_BASE, "1.05"),
            ])
        };
        let mut index = build_index(elb_props());
        let series: Vec<f64> = (0..40).map(|i| ((i % 7) as f64) * 0.5).collect();
        let points: Vec<(i64, f64)> = series
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 10, *v))
            .collect();
        let chunk = build_and_flush(&mut index, &points);

        let pattern_values = [1.0, 1.5, 2.0, 2.5];
        let threshold = 1.0;

        let mut query = build_index(elb_props());
        query
            .init_query(&props(&[(PATTERN, "1.0,1.5,2.0,2.5"), (THRESHOLD, "1.0")]))
            .unwrap();
        let candidates = query.query_by_index(&chunk.body).unwrap();
        let candidate_starts: std::collections::HashSet<i64> =
            candidates.iter().map(|c| c.start_time).collect();

        // recompute true matches directly from the raw series
        for start in 0..=36usize {
            let window = &series[start..start + 4];
            let dist = crate::distance::euclidean(window, &pattern_values);
            if dist <= threshold {
                assert!(
                    candidate_starts.contains(&((start as i64) * 10)),
                    "window at {} (dist {}) was dismissed",
                    start,
                    dist
                );
            }
        }
    }

    #[test]
    fn test_non_divisible_window_keeps_exact_match() {
        // W=5, b=2: the last block absorbs the remainder (width 3). The
        // query feature must partition the pattern the same way; tight
        // GROUP envelopes expose any disagreement at the block boundary.
        let elb_props = || {
            props(&[
                (INDEX_WINDOW_RANGE, "5"),
                (INDEX_SLIDE_STEP, "1"),
                (FEATURE_DIM, "2"),
                (ELB_TYPE, "ELB_GROUP"),
                (ELB_THRESHOLD_BASE, "0.1"),
            ])
        };
        let mut index = build_index(elb_props());
        let values = [1.0, 2.0, 0.0, 0.0, 9.0, 2.0, 3.0];
        let points: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 10, *v))
            .collect();
        let chunk = build_and_flush(&mut index, &points);

        // pattern = the window starting at index 0: [1,2,0,0,9]; its
        // last-block mean (0+0+9)/3 sits inside the stored envelope only
        // if the query averages over all three remainder points
        let mut query = build_index(elb_props());
        query
            .init_query(&props(&[(PATTERN, "1,2,0,0,9"), (THRESHOLD, "10.0")]))
            .unwrap();
        let candidates = query.query_by_index(&chunk.body).unwrap();
        assert!(candidates.iter().any(|c| c.start_time == 0));
    }

    #[test]
    fn test_sub_flush_chunks_concatenate() {
        // 10 points, W=3, S=1: 8 windows split 3 + 5 across two chunks
        let mut index = build_index(props(&[
            (INDEX_WINDOW_RANGE, "3"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "3"),
        ]));
        let points: Vec<(i64, f64)> = (0..10).map(|i| (i * 100, i as f64)).collect();

        let chunk1 = build_and_flush(&mut index, &points[..5]);
        index.clear();
        index.end_flush_task();
        let chunk2 = build_and_flush(&mut index, &points[5..]);

        let ids1 = chunk_identifiers(&chunk1);
        let ids2 = chunk_identifiers(&chunk2);
        assert_eq!(ids1.len(), 3);
        assert_eq!(ids2.len(), 5);
        assert_eq!(chunk1.start_time, 0);
        assert_eq!(chunk1.end_time, 400);
        assert_eq!(chunk2.start_time, 300);
        assert_eq!(chunk2.end_time, 900);

        let mut all: Vec<i64> = ids1.iter().chain(ids2.iter()).map(|i| i.start_time).collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 100, 200, 300, 400, 500, 600, 700]);
    }

    fn chunk_identifiers(chunk: &IndexFlushChunk) -> Vec<Identifier> {
        let mut identifiers = Vec::new();
        let mut reader = ByteReader::new(&chunk.body);
        let _: Rtree<u32> = Rtree::deserialize(&mut reader, &mut |r| {
            identifiers.push(Identifier::read_from(r)?);
            Ok(identifiers.len() as u32 - 1)
        })
        .unwrap();
        identifiers
    }

    #[test]
    fn test_flush_empty_chunk_returns_none() {
        let mut index = build_index(props(&[(INDEX_WINDOW_RANGE, "4")]));
        assert!(index.flush().unwrap().is_none());
    }

    #[test]
    fn test_missing_pattern_is_config_error() {
        let mut index = build_index(props(&[(INDEX_WINDOW_RANGE, "4")]));
        let err = index.init_query(&props(&[(THRESHOLD, "1.0")])).unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_short_pattern_is_config_error() {
        let mut index = build_index(props(&[(INDEX_WINDOW_RANGE, "8")]));
        let err = index
            .init_query(&props(&[(PATTERN, "1,2,3")]))
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_post_process_gates_on_threshold() {
        let mut index = build_index(props(&[
            (INDEX_WINDOW_RANGE, "4"),
            (INDEX_SLIDE_STEP, "1"),
            (FEATURE_DIM, "2"),
        ]));
        index
            .init_query(&props(&[(PATTERN, "1,2,3,4"), (THRESHOLD, "0.1")]))
            .unwrap();

        let points: Vec<(i64, f64)> = (0..6).map(|i| (i * 100, (i + 1) as f64)).collect();
        index.start_flush_task(&points).unwrap();

        let mut funcs = vec![
            IndexFuncResult::new(crate::read::IndexFunc::SimSt),
            IndexFuncResult::new(crate::read::IndexFunc::Ed),
        ];
        while index.has_next_window(None).unwrap() {
            index.process_next_window().unwrap();
            let remaining = index.post_process_next(&mut funcs).unwrap();
            assert_eq!(remaining, 2);
        }
        // only the first window [1,2,3,4] matches exactly
        assert_eq!(funcs[0].values(), &[0.0]);
        assert_eq!(funcs[1].values(), &[0.0]);
    }

    #[test]
    fn test_closed_index_rejects_calls() {
        let mut index = build_index(props(&[(INDEX_WINDOW_RANGE, "4")]));
        index.close_and_release();
        assert!(matches!(
            index.start_flush_task(&[(0, 1.0)]),
            Err(IndexError::Closed)
        ));
        assert!(matches!(index.flush(), Err(IndexError::Closed)));
    }

    #[test]
    fn test_delete_is_terminal() {
        let mut index = build_index(props(&[(INDEX_WINDOW_RANGE, "4")]));
        index.delete();
        assert!(matches!(index.build_next(), Err(IndexError::Closed)));
    }

    #[test]
    fn test_range_strategy_gates_indexing() {
        let mut index = MbrIndex::new(
            "root.sg.d1.s1",
            TsDataType::F64,
            500,
            &props(&[(INDEX_WINDOW_RANGE, "4"), (INDEX_RANGE_STRATEGY, "within")]),
            &engine(),
            &pool(),
        )
        .unwrap();

        let mut batch = TvBuffer::new(TsDataType::F64);
        for i in 0..8 {
            batch.push(i * 100, i as f64);
        }
        index.start_flush_task_tv(&batch).unwrap();

        // slices starting before the configured epoch are not indexed
        assert!(!index.check_need_index(0));
        assert!(index.check_need_index(5));
    }

    #[test]
    fn test_amortized_size_positive() {
        let index = build_index(props(&[(INDEX_WINDOW_RANGE, "4"), (FEATURE_DIM, "2")]));
        // identifier storage plus the amortized tree cost
        assert!(index.amortized_size() >= 24);
    }
}
