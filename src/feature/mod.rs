//! Lower-bounding feature extraction
//!
//! Features are compact per-window summaries that admit a lower-bounding
//! distance, so the index may prune a window only when it is provably
//! outside the similarity threshold. The one scheme implemented here is
//! ELB (Equal-Length Block): a window split into `b` equal-width blocks,
//! each contributing an upper/lower bound pair.

mod elb;

pub use elb::{CalcParam, ElbFeatureExtractor, ElbType};
