//! Query-time index functions
//!
//! A subsequence-matching query carries one or more functions to evaluate
//! over every window that survives pruning and passes the similarity
//! threshold. Each function accumulates one value per matching window.

use crate::distance::{dtw, euclidean};
use crate::error::{IndexError, IndexResult};
use crate::preprocess::Identifier;

/// Functions the ELB index can evaluate during post-processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFunc {
    /// Time span of the matching window
    TimeRange,
    /// Start time of the matching window
    SimSt,
    /// End time of the matching window
    SimEt,
    /// Point count of the matching window
    SeriesLen,
    /// Euclidean distance between the aligned window and the pattern
    Ed,
    /// DTW distance between the aligned window and the pattern
    Dtw,
}

impl IndexFunc {
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TIME_RANGE" => Ok(IndexFunc::TimeRange),
            "SIM_ST" => Ok(IndexFunc::SimSt),
            "SIM_ET" => Ok(IndexFunc::SimEt),
            "SERIES_LEN" => Ok(IndexFunc::SeriesLen),
            "ED" => Ok(IndexFunc::Ed),
            "DTW" => Ok(IndexFunc::Dtw),
            other => Err(IndexError::UnsupportedQuery(format!(
                "unknown index function: {}",
                other
            ))),
        }
    }
}

/// Accumulator for one function across all matching windows of a query
#[derive(Debug, Clone)]
pub struct IndexFuncResult {
    func: IndexFunc,
    values: Vec<f64>,
}

impl IndexFuncResult {
    pub fn new(func: IndexFunc) -> Self {
        Self {
            func,
            values: Vec::new(),
        }
    }

    pub fn func(&self) -> IndexFunc {
        self.func
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn match_count(&self) -> usize {
        self.values.len()
    }

    /// Record one matching window
    pub fn accumulate(&mut self, identifier: &Identifier, aligned: &[f64], pattern: &[f64]) {
        let value = match self.func {
            IndexFunc::TimeRange => (identifier.end_time - identifier.start_time) as f64,
            IndexFunc::SimSt => identifier.start_time as f64,
            IndexFunc::SimEt => identifier.end_time as f64,
            IndexFunc::SeriesLen => identifier.count as f64,
            IndexFunc::Ed => euclidean(aligned, pattern),
            IndexFunc::Dtw => {
                let band = (aligned.len() / 10).max(1);
                dtw(aligned, pattern, band)
            }
        };
        self.values.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_functions() {
        assert_eq!(IndexFunc::parse("ed").unwrap(), IndexFunc::Ed);
        assert_eq!(IndexFunc::parse("SIM_ST").unwrap(), IndexFunc::SimSt);
        assert!(matches!(
            IndexFunc::parse("count_distinct"),
            Err(IndexError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_accumulate_per_window() {
        let id = Identifier::new(100, 400, 4);
        let aligned = [1.0, 2.0, 3.0, 4.0];
        let pattern = [1.0, 2.0, 3.0, 4.0];

        let mut st = IndexFuncResult::new(IndexFunc::SimSt);
        let mut span = IndexFuncResult::new(IndexFunc::TimeRange);
        let mut ed = IndexFuncResult::new(IndexFunc::Ed);

        for result in [&mut st, &mut span, &mut ed] {
            result.accumulate(&id, &aligned, &pattern);
        }
        assert_eq!(st.values(), &[100.0]);
        assert_eq!(span.values(), &[300.0]);
        assert_eq!(ed.values(), &[0.0]);
        assert_eq!(ed.match_count(), 1);
    }
}
