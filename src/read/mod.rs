//! Query-time index reading
//!
//! A query never reads raw data through the index; it only asks which raw
//! data ranges can be skipped. [`IndexQueryReader`] owns that decision,
//! combining per-chunk R-tree lookups with the running allowed-time filter,
//! and post-processes surviving windows through the configured index
//! functions.

mod func;
mod optimize;
mod reader;
mod time_range;

pub use func::{IndexFunc, IndexFuncResult};
pub use optimize::{NaiveOptimizer, UnpackOptimizer};
pub use reader::{IndexQueryReader, QueryState};
pub use time_range::TimeRanges;
