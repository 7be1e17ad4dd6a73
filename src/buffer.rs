//! Typed value buffers and the shared buffer pool
//!
//! The index engine works on append-only `<time, value>` streams where the
//! value column is one of four numeric types. `PrimitiveBuffer` stores the
//! value column without boxing; `TvBuffer` pairs it with a timestamp column.
//! Buffers are recycled through a process-wide `BufferPool` that is always
//! passed explicitly — allocation is non-blocking and the pool grows on
//! demand.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Numeric data types supported by the index engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsDataType {
    I32,
    I64,
    F32,
    F64,
}

impl TsDataType {
    /// Size of one value in bytes
    pub fn size_of(&self) -> usize {
        match self {
            TsDataType::I32 | TsDataType::F32 => 4,
            TsDataType::I64 | TsDataType::F64 => 8,
        }
    }

    /// Parse from a configuration string
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i32" | "int32" => Ok(TsDataType::I32),
            "i64" | "int64" => Ok(TsDataType::I64),
            "f32" | "float" => Ok(TsDataType::F32),
            "f64" | "double" => Ok(TsDataType::F64),
            other => Err(IndexError::DataType(other.to_string())),
        }
    }
}

impl std::fmt::Display for TsDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TsDataType::I32 => write!(f, "i32"),
            TsDataType::I64 => write!(f, "i64"),
            TsDataType::F32 => write!(f, "f32"),
            TsDataType::F64 => write!(f, "f64"),
        }
    }
}

/// Typed append-only value array
///
/// All variants expose values through `get_f64`, which is lossless for every
/// supported type except very large i64 values; the index treats features as
/// f64 throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PrimitiveBuffer {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PrimitiveBuffer {
    /// Create an empty buffer of the given type
    pub fn new(data_type: TsDataType) -> Self {
        match data_type {
            TsDataType::I32 => PrimitiveBuffer::I32(Vec::new()),
            TsDataType::I64 => PrimitiveBuffer::I64(Vec::new()),
            TsDataType::F32 => PrimitiveBuffer::F32(Vec::new()),
            TsDataType::F64 => PrimitiveBuffer::F64(Vec::new()),
        }
    }

    pub fn data_type(&self) -> TsDataType {
        match self {
            PrimitiveBuffer::I32(_) => TsDataType::I32,
            PrimitiveBuffer::I64(_) => TsDataType::I64,
            PrimitiveBuffer::F32(_) => TsDataType::F32,
            PrimitiveBuffer::F64(_) => TsDataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PrimitiveBuffer::I32(v) => v.len(),
            PrimitiveBuffer::I64(v) => v.len(),
            PrimitiveBuffer::F32(v) => v.len(),
            PrimitiveBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value, converting from f64 to the buffer's type
    pub fn push_f64(&mut self, value: f64) {
        match self {
            PrimitiveBuffer::I32(v) => v.push(value as i32),
            PrimitiveBuffer::I64(v) => v.push(value as i64),
            PrimitiveBuffer::F32(v) => v.push(value as f32),
            PrimitiveBuffer::F64(v) => v.push(value),
        }
    }

    /// Read a value as f64
    pub fn get_f64(&self, idx: usize) -> f64 {
        match self {
            PrimitiveBuffer::I32(v) => v[idx] as f64,
            PrimitiveBuffer::I64(v) => v[idx] as f64,
            PrimitiveBuffer::F32(v) => v[idx] as f64,
            PrimitiveBuffer::F64(v) => v[idx],
        }
    }

    /// Drop the first `n` values, shifting the remainder to the front
    pub fn drain_front(&mut self, n: usize) {
        match self {
            PrimitiveBuffer::I32(v) => {
                v.drain(..n.min(v.len()));
            }
            PrimitiveBuffer::I64(v) => {
                v.drain(..n.min(v.len()));
            }
            PrimitiveBuffer::F32(v) => {
                v.drain(..n.min(v.len()));
            }
            PrimitiveBuffer::F64(v) => {
                v.drain(..n.min(v.len()));
            }
        }
    }

    pub fn clear(&mut self) {
        match self {
            PrimitiveBuffer::I32(v) => v.clear(),
            PrimitiveBuffer::I64(v) => v.clear(),
            PrimitiveBuffer::F32(v) => v.clear(),
            PrimitiveBuffer::F64(v) => v.clear(),
        }
    }

    /// Estimated heap usage in bytes
    pub fn memory_bytes(&self) -> usize {
        self.len() * self.data_type().size_of()
    }
}

/// A time/value column pair, the unit the preprocessor consumes and the
/// aligned-sequence representation it produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvBuffer {
    times: Vec<i64>,
    values: PrimitiveBuffer,
}

impl TvBuffer {
    pub fn new(data_type: TsDataType) -> Self {
        Self {
            times: Vec::new(),
            values: PrimitiveBuffer::new(data_type),
        }
    }

    pub fn data_type(&self) -> TsDataType {
        self.values.data_type()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn push(&mut self, time: i64, value: f64) {
        self.times.push(time);
        self.values.push_f64(value);
    }

    pub fn time(&self, idx: usize) -> i64 {
        self.times[idx]
    }

    pub fn last_time(&self) -> Option<i64> {
        self.times.last().copied()
    }

    pub fn value_f64(&self, idx: usize) -> f64 {
        self.values.get_f64(idx)
    }

    /// Copy a slice of the value column into an f64 vector
    pub fn values_f64(&self, start: usize, len: usize) -> Vec<f64> {
        (start..start + len).map(|i| self.values.get_f64(i)).collect()
    }

    /// Max minus min over `[offset, offset + len)`, clamped to the buffer end
    pub fn value_range(&self, offset: usize, len: usize) -> f64 {
        let end = (offset + len).min(self.len());
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for idx in offset..end {
            let v = self.values.get_f64(idx);
            min = min.min(v);
            max = max.max(v);
        }
        if max < min {
            0.0
        } else {
            max - min
        }
    }

    pub fn drain_front(&mut self, n: usize) {
        let n = n.min(self.times.len());
        self.times.drain(..n);
        self.values.drain_front(n);
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.values.clear();
    }

    pub fn memory_bytes(&self) -> usize {
        self.times.len() * 8 + self.values.memory_bytes()
    }
}

/// Resample `src[offset..offset+len]` onto a uniform timestamp grid of
/// `aligned_size` points
///
/// The grid is `[t0, t0+Δ, …]` with `Δ = (t_last − t0)/(aligned_size − 1)`;
/// each grid point takes the nearest source value by timestamp, scanning
/// forward while the next candidate is strictly closer.
pub fn align_uniform(
    src: &TvBuffer,
    offset: usize,
    len: usize,
    aligned_size: usize,
    out: &mut TvBuffer,
) {
    out.clear();
    if len == 0 || aligned_size == 0 {
        return;
    }
    if aligned_size == 1 {
        out.push(src.time(offset), src.value_f64(offset));
        return;
    }
    let t0 = src.time(offset);
    let t_last = src.time(offset + len - 1);
    let interval = (t_last - t0) / (aligned_size as i64 - 1);

    let mut idx = offset;
    for i in 0..aligned_size {
        let timestamp = t0 + i as i64 * interval;
        let mut min_delta = (src.time(idx) - timestamp).abs();
        while idx < offset + len - 1 {
            let next_delta = (src.time(idx + 1) - timestamp).abs();
            if next_delta < min_delta {
                min_delta = next_delta;
                idx += 1;
            } else {
                break;
            }
        }
        out.push(timestamp, src.value_f64(idx));
    }
}

/// Process-wide recycling pool for `TvBuffer`s
///
/// Shared across all index instances; allocation never blocks on capacity
/// (the pool grows on demand) and `release` is a plain hand-back. Indices
/// must not hold a pooled buffer across a public-API return, except their
/// own long-lived source buffer.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<HashMap<TsDataType, Vec<TvBuffer>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a buffer of the given type, reusing a released one when available
    pub fn allocate(&self, data_type: TsDataType) -> TvBuffer {
        let mut free = self.free.lock().unwrap();
        free.get_mut(&data_type)
            .and_then(|list| list.pop())
            .unwrap_or_else(|| TvBuffer::new(data_type))
    }

    /// Hand a buffer back; its contents are discarded
    pub fn release(&self, mut buffer: TvBuffer) {
        buffer.clear();
        let mut free = self.free.lock().unwrap();
        free.entry(buffer.data_type()).or_default().push(buffer);
    }

    /// Number of idle buffers currently pooled
    pub fn idle_count(&self) -> usize {
        let free = self.free.lock().unwrap();
        free.values().map(|list| list.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parse() {
        assert_eq!(TsDataType::parse("double").unwrap(), TsDataType::F64);
        assert_eq!(TsDataType::parse("INT32").unwrap(), TsDataType::I32);
        assert_eq!(TsDataType::parse("f32").unwrap().size_of(), 4);
        assert!(matches!(
            TsDataType::parse("text"),
            Err(IndexError::DataType(_))
        ));
    }

    #[test]
    fn test_primitive_buffer_roundtrip() {
        let mut buf = PrimitiveBuffer::new(TsDataType::I32);
        buf.push_f64(3.0);
        buf.push_f64(-7.0);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.get_f64(0), 3.0);
        assert_eq!(buf.get_f64(1), -7.0);
        assert_eq!(buf.memory_bytes(), 8);
    }

    #[test]
    fn test_drain_front() {
        let mut buf = TvBuffer::new(TsDataType::F64);
        for i in 0..10 {
            buf.push(i * 100, i as f64);
        }
        buf.drain_front(4);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.time(0), 400);
        assert_eq!(buf.value_f64(0), 4.0);
    }

    #[test]
    fn test_value_range() {
        let mut buf = TvBuffer::new(TsDataType::F64);
        for (i, v) in [2.0, 9.0, 4.0, -1.0].iter().enumerate() {
            buf.push(i as i64, *v);
        }
        assert_eq!(buf.value_range(0, 4), 10.0);
        assert_eq!(buf.value_range(0, 2), 7.0);
        // length clamped to buffer end
        assert_eq!(buf.value_range(2, 100), 5.0);
    }

    #[test]
    fn test_align_uniform_equally_spaced() {
        let mut src = TvBuffer::new(TsDataType::F64);
        for i in 0..8 {
            src.push(i * 10, i as f64);
        }
        let mut out = TvBuffer::new(TsDataType::F64);
        align_uniform(&src, 0, 8, 4, &mut out);

        assert_eq!(out.len(), 4);
        // grid must be equally spaced
        let delta = out.time(1) - out.time(0);
        for i in 1..out.len() {
            assert_eq!(out.time(i) - out.time(i - 1), delta);
        }
    }

    #[test]
    fn test_align_uniform_same_size_is_identity() {
        let mut src = TvBuffer::new(TsDataType::F64);
        for i in 0..5 {
            src.push(i * 7, (i * i) as f64);
        }
        let mut out = TvBuffer::new(TsDataType::F64);
        align_uniform(&src, 0, 5, 5, &mut out);

        assert_eq!(out.len(), 5);
        for i in 0..5 {
            assert_eq!(out.value_f64(i), (i * i) as f64);
        }
    }

    #[test]
    fn test_align_uniform_idempotent_length() {
        let mut src = TvBuffer::new(TsDataType::F64);
        for i in 0..13 {
            src.push(i * 3 + (i % 2), i as f64);
        }
        let mut once = TvBuffer::new(TsDataType::F64);
        align_uniform(&src, 0, 13, 6, &mut once);
        let mut twice = TvBuffer::new(TsDataType::F64);
        align_uniform(&once, 0, once.len(), 6, &mut twice);
        assert_eq!(once.len(), 6);
        assert_eq!(twice.len(), 6);
    }

    #[test]
    fn test_pool_recycles_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.allocate(TsDataType::F32);
        buf.push(1, 1.5);
        pool.release(buf);
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.allocate(TsDataType::F32);
        assert!(reused.is_empty());
        assert_eq!(pool.idle_count(), 0);

        // different type allocates fresh
        let other = pool.allocate(TsDataType::I64);
        assert_eq!(other.data_type(), TsDataType::I64);
    }
}
