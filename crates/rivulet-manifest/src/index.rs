use url::Url;

use crate::{ManifestError, ManifestResult};

/// Inclusive byte range inside a resource, as sent in a `Range` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Initialization data a sink needs before any media segment of a representation.
#[derive(Clone, Debug, PartialEq)]
pub struct InitSegment {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
}

/// One time-addressable chunk of encoded media.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Sequence number, unique within a representation.
    pub number: u64,
    /// Presentation start, seconds.
    pub start: f64,
    /// Declared duration, seconds.
    pub duration: f64,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
}

impl Segment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end()
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end && self.end() > start
    }
}

/// Explicit list of segments, sorted by start.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineIndex {
    init: Option<InitSegment>,
    segments: Vec<Segment>,
}

impl TimelineIndex {
    pub fn new(init: Option<InitSegment>, mut segments: Vec<Segment>) -> Self {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { init, segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Fixed-duration segments addressed through a `$Number$` URL template.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateIndex {
    init: Option<InitSegment>,
    base: Url,
    media: String,
    start_number: u64,
    segment_duration: f64,
    start: f64,
    end: Option<f64>,
}

impl TemplateIndex {
    const NUMBER: &'static str = "$Number$";

    /// # Errors
    ///
    /// Fails when the template has no `$Number$` placeholder, does not resolve against
    /// `base`, or the segment duration is not positive.
    pub fn new(
        base: Url,
        media: impl Into<String>,
        start_number: u64,
        segment_duration: f64,
        start: f64,
        end: Option<f64>,
    ) -> ManifestResult<Self> {
        let media = media.into();
        let invalid = |reason: &str| ManifestError::InvalidTemplate {
            template: media.clone(),
            reason: reason.to_string(),
        };

        if !media.contains(Self::NUMBER) {
            return Err(invalid("missing $Number$ placeholder"));
        }
        if !(segment_duration > 0.0 && segment_duration.is_finite()) {
            return Err(invalid("segment duration must be positive"));
        }
        base.join(&media.replace(Self::NUMBER, &start_number.to_string()))
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            init: None,
            base,
            media,
            start_number,
            segment_duration,
            start,
            end,
        })
    }

    #[must_use]
    pub fn with_init(mut self, init: InitSegment) -> Self {
        self.init = Some(init);
        self
    }

    fn segment(&self, position: u64) -> Option<Segment> {
        #[expect(clippy::cast_precision_loss, reason = "segment positions stay small")]
        let start = self.start + position as f64 * self.segment_duration;
        if let Some(end) = self.end {
            if start >= end {
                return None;
            }
        }
        let number = self.start_number + position;
        let url = self
            .base
            .join(&self.media.replace(Self::NUMBER, &number.to_string()))
            .ok()?;
        let duration = match self.end {
            Some(end) => self.segment_duration.min(end - start),
            None => self.segment_duration,
        };
        Some(Segment {
            number,
            start,
            duration,
            url,
            byte_range: None,
        })
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "floor of a non-negative ratio"
    )]
    fn position_at(&self, time: f64) -> u64 {
        ((time - self.start) / self.segment_duration).floor().max(0.0) as u64
    }
}

/// Maps presentation time to segment descriptors for one representation.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentIndex {
    Timeline(TimelineIndex),
    Template(TemplateIndex),
}

impl SegmentIndex {
    pub fn init_segment(&self) -> Option<&InitSegment> {
        match self {
            Self::Timeline(index) => index.init.as_ref(),
            Self::Template(index) => index.init.as_ref(),
        }
    }

    /// Segments overlapping `[start, end)`, in time order.
    pub fn segments_in(&self, start: f64, end: f64) -> Vec<Segment> {
        if start >= end {
            return Vec::new();
        }
        match self {
            Self::Timeline(index) => index
                .segments
                .iter()
                .filter(|s| s.overlaps(start, end))
                .cloned()
                .collect(),
            Self::Template(index) => {
                let mut out = Vec::new();
                let mut position = index.position_at(start);
                while let Some(segment) = index.segment(position) {
                    if segment.start >= end {
                        break;
                    }
                    if segment.overlaps(start, end) {
                        out.push(segment);
                    }
                    position += 1;
                }
                out
            }
        }
    }

    /// The segment whose declared range contains `time`.
    pub fn segment_at(&self, time: f64) -> Option<Segment> {
        match self {
            Self::Timeline(index) => index.segments.iter().find(|s| s.contains(time)).cloned(),
            Self::Template(index) => {
                if time < index.start {
                    return None;
                }
                index
                    .segment(index.position_at(time))
                    .filter(|s| s.contains(time))
            }
        }
    }

    /// Earliest declared segment start at or after `time`.
    pub fn next_segment_start(&self, time: f64) -> Option<f64> {
        match self {
            Self::Timeline(index) => index
                .segments
                .iter()
                .map(|s| s.start)
                .find(|start| *start >= time),
            Self::Template(index) => {
                if time <= index.start {
                    return index.segment(0).map(|s| s.start);
                }
                let position = index.position_at(time);
                let current = index.segment(position)?;
                if current.start >= time {
                    Some(current.start)
                } else {
                    index.segment(position + 1).map(|s| s.start)
                }
            }
        }
    }

    /// End of the last declared segment, `None` for open-ended templates.
    pub fn end(&self) -> Option<f64> {
        match self {
            Self::Timeline(index) => index.segments.last().map(Segment::end),
            Self::Template(index) => index.end,
        }
    }
}

impl From<TimelineIndex> for SegmentIndex {
    fn from(index: TimelineIndex) -> Self {
        Self::Timeline(index)
    }
}

impl From<TemplateIndex> for SegmentIndex {
    fn from(index: TemplateIndex) -> Self {
        Self::Template(index)
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/video/").expect("valid url")
    }

    fn timeline(starts: &[(f64, f64)]) -> SegmentIndex {
        let segments = starts
            .iter()
            .enumerate()
            .map(|(i, (start, duration))| Segment {
                number: i as u64,
                start: *start,
                duration: *duration,
                url: base().join(&format!("seg-{i}.m4s")).expect("valid url"),
                byte_range: None,
            })
            .collect();
        TimelineIndex::new(None, segments).into()
    }

    fn template(end: Option<f64>) -> SegmentIndex {
        TemplateIndex::new(base(), "chunk-$Number$.m4s", 1, 4.0, 0.0, end)
            .expect("valid template")
            .into()
    }

    // Timeline

    #[rstest]
    #[case(0.0, 4.0, vec![0])]
    #[case(3.9, 4.1, vec![0, 1])]
    #[case(8.0, 100.0, vec![2])]
    #[case(12.0, 20.0, vec![])]
    fn timeline_segments_in(#[case] start: f64, #[case] end: f64, #[case] expected: Vec<u64>) {
        let index = timeline(&[(0.0, 4.0), (4.0, 4.0), (8.0, 4.0)]);
        let numbers: Vec<u64> = index.segments_in(start, end).iter().map(|s| s.number).collect();
        assert_eq!(numbers, expected);
    }

    #[test]
    fn timeline_is_sorted_on_construction() {
        let index = timeline(&[(8.0, 4.0), (0.0, 4.0)]);
        assert_eq!(index.segment_at(1.0).map(|s| s.start), Some(0.0));
        assert_eq!(index.end(), Some(12.0));
    }

    #[rstest]
    #[case(0.0, Some(0.0))]
    #[case(1.0, Some(50.0))]
    #[case(50.0, Some(50.0))]
    #[case(51.0, None)]
    fn timeline_next_segment_start_across_hole(#[case] time: f64, #[case] expected: Option<f64>) {
        let index = timeline(&[(0.0, 4.0), (50.0, 4.0)]);
        assert_eq!(index.next_segment_start(time), expected);
    }

    // Template

    #[test]
    fn template_resolves_numbered_urls() {
        let index = template(None);
        let segment = index.segment_at(9.0).expect("segment at 9s");
        assert_eq!(segment.number, 3);
        assert_eq!(segment.start, 8.0);
        assert_eq!(segment.url.as_str(), "https://cdn.example.com/video/chunk-3.m4s");
    }

    #[test]
    fn template_last_segment_is_clipped_to_end() {
        let index = template(Some(10.0));
        let segments = index.segments_in(0.0, 100.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].duration, 2.0);
        assert_eq!(index.segment_at(10.0), None);
    }

    #[rstest]
    #[case(0.0, Some(0.0))]
    #[case(0.5, Some(4.0))]
    #[case(4.0, Some(4.0))]
    #[case(9.0, None)]
    fn template_next_segment_start(#[case] time: f64, #[case] expected: Option<f64>) {
        let index = template(Some(8.0));
        assert_eq!(index.next_segment_start(time), expected);
    }

    #[rstest]
    #[case("chunk.m4s", 4.0)]
    #[case("chunk-$Number$.m4s", 0.0)]
    #[case("chunk-$Number$.m4s", -1.0)]
    fn template_rejects_invalid_input(#[case] media: &str, #[case] duration: f64) {
        let result = TemplateIndex::new(base(), media, 0, duration, 0.0, None);
        assert!(matches!(result, Err(ManifestError::InvalidTemplate { .. })));
    }

    #[test]
    fn byte_range_len_is_inclusive() {
        assert_eq!(ByteRange::new(0, 99).len(), 100);
        assert!(!ByteRange::new(10, 10).is_empty());
    }
}
