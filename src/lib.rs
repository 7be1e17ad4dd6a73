//! # Simile
//!
//! Embeddable similarity-search index engine for column-oriented
//! time-series storage. For a configured series path it maintains an
//! auxiliary structure that can, at query time, rapidly prune raw-data
//! ranges that cannot contain any subsequence similar to a user-supplied
//! pattern.
//!
//! ## Features
//!
//! - **Sliding-window preprocessing**: append-only point streams become
//!   aligned fixed-length subsequences under bounded memory
//! - **ELB features**: per-window upper/lower block bounds forming a
//!   minimum bounding rectangle in feature space
//! - **In-memory R-tree**: bulk insertion with linear or quadratic split
//!   heuristics, threshold range search, codec-driven serialization
//! - **No false dismissals**: pruning may keep spurious candidates but
//!   never discards a window within the similarity threshold
//! - **Flush-scheduler friendly**: amortized memory reporting and
//!   arbitrarily many sub-flushes per logical flush task
//!
//! ## Modules
//!
//! - [`buffer`]: typed value buffers and the shared buffer pool
//! - [`preprocess`]: sliding-window preprocessors
//! - [`feature`]: ELB feature extraction
//! - [`rtree`]: the in-memory R-tree
//! - [`index`]: the per-series MBR index instance
//! - [`io`]: index chunk files
//! - [`read`]: query-time pruning reader
//!
//! ## Quick Start
//!
//! ```rust
//! use simile::{BufferPool, EngineConfig, IndexProps, MbrIndex, TsDataType};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), simile::IndexError> {
//!     let pool = Arc::new(BufferPool::new());
//!     let engine = EngineConfig::default();
//!
//!     let mut props = IndexProps::new();
//!     props.insert("index_window_range".into(), "4".into());
//!     props.insert("index_slide_step".into(), "1".into());
//!     props.insert("feature_dim".into(), "2".into());
//!
//!     let mut index =
//!         MbrIndex::new("root.sg.d1.s1", TsDataType::F64, 0, &props, &engine, &pool)?;
//!
//!     // build side: feed points, build windows, flush a chunk
//!     let points: Vec<(i64, f64)> = (0..16).map(|i| (i * 100, (i as f64).sin())).collect();
//!     index.start_flush_task(&points)?;
//!     while index.has_next_window(None)? {
//!         index.process_next_window()?;
//!         index.build_next()?;
//!     }
//!     let chunk = index.flush()?.expect("windows were built");
//!     println!("flushed {} bytes for [{}, {}]", chunk.len(), chunk.start_time, chunk.end_time);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod distance;
pub mod error;
pub mod feature;
pub mod index;
pub mod io;
pub mod preprocess;
pub mod read;
pub mod rtree;

// Re-export top-level types for convenience
pub use buffer::{BufferPool, PrimitiveBuffer, TsDataType, TvBuffer};
pub use config::{EngineConfig, IndexProps};
pub use distance::Distance;
pub use error::{IndexError, IndexResult};
pub use feature::{CalcParam, ElbFeatureExtractor, ElbType};
pub use index::{IndexType, MbrIndex, MbrIndexConfig, RangeStrategy};
pub use io::{IndexChunkMeta, IndexFileReader, IndexFileWriter, IndexFlushChunk};
pub use preprocess::{CountFixedPreprocessor, ElbPreprocessor, Identifier};
pub use read::{IndexFunc, IndexFuncResult, IndexQueryReader, QueryState, TimeRanges};
pub use rtree::{Rtree, SeedPicker};
