//! ELB (Equal-Length Block) feature extraction
//!
//! A window of length W is divided into `b` equal-width blocks (the last
//! block absorbs any remainder). Each block yields an upper/lower bound
//! pair, giving a `2b`-dimensional minimum bounding rectangle per window.
//!
//! Feature layout: `[u_0, l_0, u_1, l_1, …, u_{b-1}, l_{b-1}]`.
//!
//! Refer to: Kang R, et al. Matching Consecutive Subpatterns over Streaming
//! Time Series. APWeb-WAIM 2018.

use crate::buffer::TvBuffer;
use crate::config::ELB_DEFAULT_THRESHOLD_RATIO;
use crate::error::{IndexError, IndexResult};

/// Which bound pair each block produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElbType {
    /// Element bounds: block minimum and maximum
    Ele,
    /// Adaptive bounds: block mean widened by a deviation budget
    Group,
    /// Series-specific bounds: block mean with asymmetric budgets
    Ss,
}

impl ElbType {
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ELE" => Ok(ElbType::Ele),
            "ELB_GROUP" | "GROUP" => Ok(ElbType::Group),
            "SS" => Ok(ElbType::Ss),
            other => Err(IndexError::Config(format!("unknown elb_type: {}", other))),
        }
    }
}

/// Per-block deviation budget calculation
///
/// One dispatch per window, not per block.
#[derive(Debug, Clone, Copy)]
pub enum CalcParam {
    /// A single scalar budget for the whole window: `threshold_base` when
    /// non-negative, otherwise `threshold_ratio` times the window's value
    /// range. Split evenly across blocks as `budget / sqrt(b)`.
    Single {
        threshold_base: f64,
        threshold_ratio: f64,
    },
}

impl CalcParam {
    /// The `single` schema with the built-in ratio fallback applied when
    /// neither base nor ratio was configured
    pub fn single(threshold_base: f64, threshold_ratio: f64) -> Self {
        let ratio = if threshold_base < 0.0 && threshold_ratio < 0.0 {
            ELB_DEFAULT_THRESHOLD_RATIO
        } else {
            threshold_ratio
        };
        CalcParam::Single {
            threshold_base,
            threshold_ratio: ratio,
        }
    }

    /// Deviation budget for one block of the given window
    fn block_bound(&self, src: &TvBuffer, offset: usize, window: usize, block_num: usize) -> f64 {
        match self {
            CalcParam::Single {
                threshold_base,
                threshold_ratio,
            } => {
                let budget = if *threshold_base >= 0.0 {
                    *threshold_base
                } else {
                    threshold_ratio * src.value_range(offset, window)
                };
                budget / (block_num as f64).sqrt()
            }
        }
    }
}

/// Extracts one ELB MBR per window
#[derive(Debug)]
pub struct ElbFeatureExtractor {
    window_range: usize,
    block_num: usize,
    calc_param: CalcParam,
    elb_type: ElbType,
}

impl ElbFeatureExtractor {
    pub fn new(
        window_range: usize,
        block_num: usize,
        calc_param: CalcParam,
        elb_type: ElbType,
    ) -> IndexResult<Self> {
        if block_num == 0 {
            return Err(IndexError::Config("feature_dim must be positive".into()));
        }
        if block_num > window_range {
            return Err(IndexError::Config(format!(
                "feature_dim {} cannot be larger than window_range {}",
                block_num, window_range
            )));
        }
        Ok(Self {
            window_range,
            block_num,
            calc_param,
            elb_type,
        })
    }

    pub fn block_num(&self) -> usize {
        self.block_num
    }

    /// Compute the feature for the window at `src[offset..offset+W]`,
    /// appending `2b` doubles to `out`
    pub fn extract(&self, src: &TvBuffer, offset: usize, out: &mut Vec<f64>) {
        let b = self.block_num;
        let w = self.window_range / b;

        for i in 0..b {
            let block_start = offset + i * w;
            let block_len = if i == b - 1 {
                self.window_range - (b - 1) * w
            } else {
                w
            };

            let (upper, lower) = match self.elb_type {
                ElbType::Ele => {
                    let mut min = f64::MAX;
                    let mut max = f64::MIN;
                    for j in block_start..block_start + block_len {
                        let v = src.value_f64(j);
                        min = min.min(v);
                        max = max.max(v);
                    }
                    (max, min)
                }
                ElbType::Group => {
                    let mean = block_mean(src, block_start, block_len);
                    let bound =
                        self.calc_param
                            .block_bound(src, offset, self.window_range, b);
                    (mean + bound, mean - bound)
                }
                ElbType::Ss => {
                    let mean = block_mean(src, block_start, block_len);
                    let bound =
                        self.calc_param
                            .block_bound(src, offset, self.window_range, b);
                    // asymmetric budgets collapse to the single budget here
                    (mean + bound, mean - bound)
                }
            };
            out.push(upper);
            out.push(lower);
        }
    }

    /// Amortized per-window storage reported to the memory manager
    pub fn amortized_size(&self) -> usize {
        2 * self.block_num * 8 + 16
    }
}

fn block_mean(src: &TvBuffer, offset: usize, len: usize) -> f64 {
    let mut sum = 0.0;
    for j in offset..offset + len {
        sum += src.value_f64(j);
    }
    sum / len as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TsDataType;

    fn window(values: &[f64]) -> TvBuffer {
        let mut buf = TvBuffer::new(TsDataType::F64);
        for (i, v) in values.iter().enumerate() {
            buf.push(i as i64 * 10, *v);
        }
        buf
    }

    #[test]
    fn test_ele_bounds() {
        let src = window(&[1.0, 4.0, 2.0, 8.0]);
        let extractor = ElbFeatureExtractor::new(
            4,
            2,
            CalcParam::single(-1.0, -1.0),
            ElbType::Ele,
        )
        .unwrap();

        let mut feature = Vec::new();
        extractor.extract(&src, 0, &mut feature);
        // [u_0, l_0, u_1, l_1]
        assert_eq!(feature, vec![4.0, 1.0, 8.0, 2.0]);
    }

    #[test]
    fn test_last_block_absorbs_remainder() {
        // W = 5, b = 2 -> blocks of 2 and 3
        let src = window(&[1.0, 3.0, 5.0, 7.0, 9.0]);
        let extractor = ElbFeatureExtractor::new(
            5,
            2,
            CalcParam::single(-1.0, -1.0),
            ElbType::Ele,
        )
        .unwrap();

        let mut feature = Vec::new();
        extractor.extract(&src, 0, &mut feature);
        assert_eq!(feature, vec![3.0, 1.0, 9.0, 5.0]);
    }

    #[test]
    fn test_group_bounds_use_base_budget() {
        let src = window(&[2.0, 4.0, 6.0, 8.0]);
        let extractor = ElbFeatureExtractor::new(
            4,
            4,
            CalcParam::single(2.0, -1.0),
            ElbType::Group,
        )
        .unwrap();

        let mut feature = Vec::new();
        extractor.extract(&src, 0, &mut feature);
        // per-block bound = 2 / sqrt(4) = 1; block mean == value
        assert_eq!(feature.len(), 8);
        assert!((feature[0] - 3.0).abs() < 1e-9);
        assert!((feature[1] - 1.0).abs() < 1e-9);
        assert!((feature[6] - 9.0).abs() < 1e-9);
        assert!((feature[7] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_group_ratio_budget_tracks_value_range() {
        let src = window(&[0.0, 10.0]);
        let extractor = ElbFeatureExtractor::new(
            2,
            1,
            CalcParam::single(-1.0, 0.5),
            ElbType::Group,
        )
        .unwrap();

        let mut feature = Vec::new();
        extractor.extract(&src, 0, &mut feature);
        // budget = 0.5 * range(10) = 5; mean = 5 -> [10, 0]
        assert!((feature[0] - 10.0).abs() < 1e-9);
        assert!((feature[1] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_block_num_validation() {
        assert!(ElbFeatureExtractor::new(
            4,
            8,
            CalcParam::single(-1.0, -1.0),
            ElbType::Ele,
        )
        .is_err());
    }

    #[test]
    fn test_default_ratio_applies_when_unset() {
        let param = CalcParam::single(-1.0, -1.0);
        let CalcParam::Single {
            threshold_ratio, ..
        } = param;
        assert_eq!(threshold_ratio, ELB_DEFAULT_THRESHOLD_RATIO);
    }
}
