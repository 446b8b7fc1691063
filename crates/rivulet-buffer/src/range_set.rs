use std::fmt;

use crate::{BufferError, BufferResult};

/// Half-open time interval `[start, end)` in seconds, `start < end` guaranteed.
///
/// `end` may be `f64::INFINITY` to express "until the end of the timeline".
#[derive(Clone, Copy, PartialEq)]
pub struct TimeRange {
    start: f64,
    end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> BufferResult<Self> {
        if start.is_finite() && !end.is_nan() && start < end {
            Ok(Self { start, end })
        } else {
            Err(BufferError::InvalidRange { start, end })
        }
    }

    /// Range from `start` to the end of the timeline.
    pub fn from_start(start: f64) -> BufferResult<Self> {
        Self::new(start, f64::INFINITY)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection with `other`, `None` when they do not overlap.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeRange { start, end })
    }

    /// Whether `other` lies fully inside this range, within `tolerance` on both ends.
    pub fn covers(&self, other: &TimeRange, tolerance: f64) -> bool {
        self.start <= other.start + tolerance && self.end >= other.end - tolerance
    }
}

impl fmt::Debug for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Sorted set of disjoint, non-touching time intervals.
///
/// Inserting merges overlapping and adjacent intervals; removing splits or shrinks them.
/// Every operation is linear in the number of stored intervals.
#[derive(Clone, Default, PartialEq)]
pub struct RangeSet {
    ranges: Vec<TimeRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = TimeRange>) -> Self {
        let mut set = Self::new();
        for range in ranges {
            set.insert(range);
        }
        set
    }

    pub fn insert(&mut self, range: TimeRange) {
        let mut merged = range;
        let mut placed = false;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);

        for existing in &self.ranges {
            if existing.end < merged.start {
                out.push(*existing);
            } else if existing.start > merged.end {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*existing);
            } else {
                merged.start = merged.start.min(existing.start);
                merged.end = merged.end.max(existing.end);
            }
        }
        if !placed {
            out.push(merged);
        }
        self.ranges = out;
    }

    pub fn remove(&mut self, range: TimeRange) {
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for existing in &self.ranges {
            if !existing.overlaps(&range) {
                out.push(*existing);
                continue;
            }
            if existing.start < range.start {
                out.push(TimeRange {
                    start: existing.start,
                    end: range.start,
                });
            }
            if existing.end > range.end {
                out.push(TimeRange {
                    start: range.end,
                    end: existing.end,
                });
            }
        }
        self.ranges = out;
    }

    pub fn intersect(&self, other: &RangeSet) -> RangeSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (&self.ranges[i], &other.ranges[j]);
            if let Some(common) = a.intersection(b) {
                out.push(common);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        RangeSet { ranges: out }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.range_at(time).is_some()
    }

    /// The interval containing `time`.
    pub fn range_at(&self, time: f64) -> Option<TimeRange> {
        self.ranges.iter().find(|r| r.contains(time)).copied()
    }

    /// Nearest hole at or after `time`.
    ///
    /// Starts at `time` when it is not buffered, otherwise at the end of the interval
    /// containing it. The hole ends where the next interval starts, or at infinity.
    pub fn gap(&self, time: f64) -> TimeRange {
        let start = self.range_at(time).map_or(time, |r| r.end);
        let end = self
            .ranges
            .iter()
            .map(|r| r.start)
            .find(|s| *s > start)
            .unwrap_or(f64::INFINITY);
        TimeRange { start, end }
    }

    /// Holes inside `within`, in time order.
    pub fn gaps_within(&self, within: TimeRange) -> Vec<TimeRange> {
        let mut holes = RangeSet::from_ranges([within]);
        for range in &self.ranges {
            if range.start >= within.end {
                break;
            }
            holes.remove(*range);
        }
        holes.ranges
    }

    /// Contiguous buffered duration from `time` onwards.
    pub fn buffered_ahead(&self, time: f64) -> f64 {
        self.range_at(time).map_or(0.0, |r| r.end - time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn first(&self) -> Option<TimeRange> {
        self.ranges.first().copied()
    }

    pub fn last(&self) -> Option<TimeRange> {
        self.ranges.last().copied()
    }
}

impl fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ranges.iter()).finish()
    }
}

impl FromIterator<TimeRange> for RangeSet {
    fn from_iter<T: IntoIterator<Item = TimeRange>>(iter: T) -> Self {
        Self::from_ranges(iter)
    }
}
