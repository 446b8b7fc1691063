use rivulet_manifest::ByteRange;
use tracing::trace;

use crate::{RangeSet, TimeRange};

/// Most a sink may fall short of a segment's declared bounds, in seconds, before the
/// shortfall counts as missing media.
pub const MAX_EDGE_SLACK: f64 = 0.3;

/// Share of a segment's duration a sink may fall short of it by.
const EDGE_SLACK_SHARE: f64 = 0.2;

const MIN_EDGE_SLACK: f64 = 1e-3;

/// Shortfall against `declared` that still counts as holding the whole segment.
///
/// Media buffers report ranges rounded to frame boundaries, so what they hold rarely
/// matches the index to the millisecond.
pub fn edge_slack(declared: &TimeRange) -> f64 {
    (declared.duration() * EDGE_SLACK_SHARE).clamp(MIN_EDGE_SLACK, MAX_EDGE_SLACK)
}

/// Identity of a downloaded segment.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentInfo {
    pub period_id: String,
    pub representation_id: String,
    pub bitrate: u64,
    pub segment_number: u64,
    pub byte_range: Option<ByteRange>,
    /// Range the index declares for this segment.
    pub declared: TimeRange,
}

impl SegmentInfo {
    /// Same bytes from the same representation, regardless of how much of it is still buffered.
    pub fn same_segment(&self, other: &SegmentInfo) -> bool {
        self.period_id == other.period_id
            && self.representation_id == other.representation_id
            && self.segment_number == other.segment_number
            && self.byte_range == other.byte_range
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BookkeptSegment {
    pub range: TimeRange,
    pub info: SegmentInfo,
}

/// Authoritative record of which segment produced each buffered time range of a track.
///
/// Entries are kept sorted by start time and never overlap: a newer segment replaces the
/// overlapped part of older entries, leaving their remainders in place.
#[derive(Debug, Default)]
pub struct SegmentBookkeeper {
    buffered: RangeSet,
    segments: Vec<BookkeptSegment>,
}

impl SegmentBookkeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, range: TimeRange, info: SegmentInfo) {
        self.buffered.insert(range);

        let mut out = Vec::with_capacity(self.segments.len() + 2);
        for entry in self.segments.drain(..) {
            if !entry.range.overlaps(&range) {
                out.push(entry);
                continue;
            }
            for remainder in remainders(entry.range, range) {
                out.push(BookkeptSegment {
                    range: remainder,
                    info: entry.info.clone(),
                });
            }
        }
        trace!(
            representation = %info.representation_id,
            segment = info.segment_number,
            ?range,
            "bookkeeping segment"
        );
        out.push(BookkeptSegment { range, info });
        out.sort_by(|a, b| a.range.start().total_cmp(&b.range.start()));
        self.segments = out;
    }

    pub fn remove_segment(&mut self, range: TimeRange) {
        self.buffered.remove(range);

        let mut out = Vec::with_capacity(self.segments.len() + 1);
        for entry in self.segments.drain(..) {
            if !entry.range.overlaps(&range) {
                out.push(entry);
                continue;
            }
            for remainder in remainders(entry.range, range) {
                out.push(BookkeptSegment {
                    range: remainder,
                    info: entry.info.clone(),
                });
            }
        }
        self.segments = out;
    }

    /// Whether this exact segment is recorded and still spans its whole declared range.
    pub fn has_segment(&self, info: &SegmentInfo) -> bool {
        let slack = edge_slack(&info.declared);
        self.segments
            .iter()
            .any(|entry| entry.info.same_segment(info) && entry.range.covers(&info.declared, slack))
    }

    /// Drops bookkeeping for anything the sink no longer holds.
    ///
    /// Gaps no longer than the [`edge_slack`] of every segment they touch are rounding by the
    /// sink and are kept. Returns the ranges that disappeared.
    pub fn synchronize(&mut self, sink_buffered: &RangeSet) -> Vec<TimeRange> {
        let lost: Vec<TimeRange> = self
            .buffered
            .iter()
            .flat_map(|range| sink_buffered.gaps_within(*range))
            .filter(|gap| !self.is_rounding(gap))
            .collect();
        for range in &lost {
            self.remove_segment(*range);
        }
        lost
    }

    fn is_rounding(&self, gap: &TimeRange) -> bool {
        let mut touched = self
            .segments
            .iter()
            .filter(|entry| entry.range.overlaps(gap))
            .peekable();
        touched.peek().is_some()
            && touched.all(|entry| gap.duration() <= edge_slack(&entry.info.declared))
    }

    pub fn segment_at(&self, time: f64) -> Option<&BookkeptSegment> {
        self.segments.iter().find(|entry| entry.range.contains(time))
    }

    pub fn segments(&self) -> &[BookkeptSegment] {
        &self.segments
    }

    pub fn buffered(&self) -> &RangeSet {
        &self.buffered
    }

    pub fn clear(&mut self) {
        self.buffered = RangeSet::new();
        self.segments.clear();
    }
}

/// Parts of `range` left after cutting out `cut`.
fn remainders(range: TimeRange, cut: TimeRange) -> impl Iterator<Item = TimeRange> {
    let head = TimeRange::new(range.start(), cut.start().min(range.end())).ok();
    let tail = TimeRange::new(cut.end().max(range.start()), range.end()).ok();
    head.into_iter().chain(tail)
}
