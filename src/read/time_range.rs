//! Closed-interval time range sets
//!
//! The query reader tracks three evolving time filters (allowed, usable,
//! chunk-pruned) as sets of closed `[start, end]` intervals over i64
//! timestamps. Intervals are kept sorted, disjoint and coalesced; adjacent
//! integer intervals (`[1,2]` and `[3,4]`) merge.

/// A set of closed, disjoint, sorted time intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRanges {
    ranges: Vec<(i64, i64)>,
}

impl TimeRanges {
    /// The empty set
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    /// The universal set `[i64::MIN, i64::MAX]`
    pub fn universe() -> Self {
        Self {
            ranges: vec![(i64::MIN, i64::MAX)],
        }
    }

    /// A single interval; empty if `start > end`
    pub fn from_range(start: i64, end: i64) -> Self {
        if start > end {
            Self::empty()
        } else {
            Self {
                ranges: vec![(start, end)],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.ranges.iter().copied()
    }

    /// Union a closed interval into the set
    pub fn add_range(&mut self, start: i64, end: i64) {
        if start > end {
            return;
        }
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        let mut new = (start, end);
        let mut placed = false;

        for &(s, e) in &self.ranges {
            if placed {
                result.push((s, e));
            } else if Self::touches(new, (s, e)) {
                new.0 = new.0.min(s);
                new.1 = new.1.max(e);
            } else if e < new.0 {
                result.push((s, e));
            } else {
                result.push(new);
                placed = true;
                result.push((s, e));
            }
        }
        if !placed {
            result.push(new);
        }
        self.ranges = result;
    }

    /// Overlapping or directly adjacent on the integer line
    fn touches(a: (i64, i64), b: (i64, i64)) -> bool {
        let overlap = a.0 <= b.1 && b.0 <= a.1;
        let adjacent = (b.1 != i64::MAX && b.1 + 1 == a.0) || (a.1 != i64::MAX && a.1 + 1 == b.0);
        overlap || adjacent
    }

    /// Remove a closed interval from the set
    pub fn subtract_range(&mut self, start: i64, end: i64) {
        if start > end {
            return;
        }
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e < start || s > end {
                result.push((s, e));
                continue;
            }
            if s < start {
                result.push((s, start - 1));
            }
            if e > end {
                result.push((end + 1, e));
            }
        }
        self.ranges = result;
    }

    /// Remove every interval of `other` from the set
    pub fn subtract(&mut self, other: &TimeRanges) {
        for (s, e) in other.iter() {
            self.subtract_range(s, e);
        }
    }

    /// Intersect the set with `other`, keeping only overlapping parts
    pub fn intersect(&self, other: &TimeRanges) -> TimeRanges {
        let mut out = TimeRanges::empty();
        for &(s1, e1) in &self.ranges {
            for (s2, e2) in other.iter() {
                let s = s1.max(s2);
                let e = e1.min(e2);
                if s <= e {
                    out.add_range(s, e);
                }
            }
        }
        out
    }

    /// Does any interval overlap `[start, end]`?
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        if start > end {
            return false;
        }
        self.ranges.iter().any(|&(s, e)| s <= end && e >= start)
    }

    /// Is `[start, end]` entirely inside one interval of the set?
    pub fn fully_contains(&self, start: i64, end: i64) -> bool {
        if start > end {
            return false;
        }
        self.ranges.iter().any(|&(s, e)| s <= start && e >= end)
    }

    /// Does the set contain the point `t`?
    pub fn contains_point(&self, t: i64) -> bool {
        self.ranges.iter().any(|&(s, e)| s <= t && t <= e)
    }

    /// Total covered span; saturates on the universal set
    pub fn covered_span(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(s, e)| (e as i128 - s as i128 + 1).min(u64::MAX as i128) as u64)
            .fold(0u64, |acc, d| acc.saturating_add(d))
    }
}
