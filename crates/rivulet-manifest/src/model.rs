use std::{collections::HashSet, fmt};

use tracing::debug;

use crate::{ManifestError, ManifestResult, SegmentIndex};

/// Kind of media carried by an adaptation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackType {
    Audio,
    Video,
    Text,
}

impl TrackType {
    pub const ALL: [TrackType; 3] = [TrackType::Audio, TrackType::Video, TrackType::Text];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bitrate/codec variant of a track.
#[derive(Clone, Debug, PartialEq)]
pub struct Representation {
    pub id: String,
    /// Bits per second.
    pub bitrate: u64,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub index: SegmentIndex,
}

impl Representation {
    pub fn new(id: impl Into<String>, bitrate: u64, index: SegmentIndex) -> Self {
        Self {
            id: id.into(),
            bitrate,
            mime_type: None,
            codecs: None,
            width: None,
            height: None,
            index,
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn with_codecs(mut self, codecs: impl Into<String>) -> Self {
        self.codecs = Some(codecs.into());
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Content type string used to open a sink, e.g. `video/mp4;codecs="avc1.4d401f"`.
    pub fn content_type(&self) -> String {
        let mime = self.mime_type.as_deref().unwrap_or("application/octet-stream");
        match &self.codecs {
            Some(codecs) => format!("{mime};codecs=\"{codecs}\""),
            None => mime.to_string(),
        }
    }
}

/// A set of alternative representations for one semantic track.
#[derive(Clone, Debug, PartialEq)]
pub struct Adaptation {
    pub id: String,
    pub track_type: TrackType,
    pub language: Option<String>,
    representations: Vec<Representation>,
}

impl Adaptation {
    /// # Errors
    ///
    /// [`ManifestError::EmptyAdaptation`] when `representations` is empty.
    pub fn new(
        id: impl Into<String>,
        track_type: TrackType,
        representations: Vec<Representation>,
    ) -> ManifestResult<Self> {
        let id = id.into();
        if representations.is_empty() {
            return Err(ManifestError::EmptyAdaptation { id });
        }
        Ok(Self {
            id,
            track_type,
            language: None,
            representations,
        })
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Never empty.
    pub fn representations(&self) -> &[Representation] {
        &self.representations
    }

    /// Representations sorted by ascending bitrate; equal bitrates keep declaration order.
    pub fn sorted_representations(&self) -> Vec<&Representation> {
        let mut sorted: Vec<&Representation> = self.representations.iter().collect();
        sorted.sort_by_key(|r| r.bitrate);
        sorted
    }

    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }
}

/// Time-bounded part of the manifest with its own adaptations.
#[derive(Clone, Debug, PartialEq)]
pub struct Period {
    pub id: String,
    pub start: f64,
    pub end: Option<f64>,
    pub adaptations: Vec<Adaptation>,
}

impl Period {
    pub fn new(id: impl Into<String>, start: f64, adaptations: Vec<Adaptation>) -> Self {
        Self {
            id: id.into(),
            start,
            end: None,
            adaptations,
        }
    }

    #[must_use]
    pub fn with_end(mut self, end: f64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && self.end.is_none_or(|end| time < end)
    }

    /// First adaptation of the given track type.
    pub fn adaptation(&self, track: TrackType) -> Option<&Adaptation> {
        self.adaptations.iter().find(|a| a.track_type == track)
    }

    /// Track types present in this period, in `TrackType` order.
    pub fn track_types(&self) -> Vec<TrackType> {
        TrackType::ALL
            .into_iter()
            .filter(|t| self.adaptation(*t).is_some())
            .collect()
    }
}

/// Parsed manifest, normalized on construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub id: String,
    pub is_live: bool,
    periods: Vec<Period>,
    duration: Option<f64>,
}

impl Manifest {
    /// Builds a manifest, sorting periods and making them non-overlapping.
    ///
    /// # Errors
    ///
    /// Fails when there are no periods or a period ends before it starts.
    pub fn new(
        id: impl Into<String>,
        periods: Vec<Period>,
        duration: Option<f64>,
    ) -> ManifestResult<Self> {
        let periods = normalize_periods(periods, duration)?;
        Ok(Self {
            id: id.into(),
            is_live: false,
            periods,
            duration,
        })
    }

    #[must_use]
    pub fn live(mut self) -> Self {
        self.is_live = true;
        self
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn period(&self, id: &str) -> Option<&Period> {
        self.periods.iter().find(|p| p.id == id)
    }

    pub fn period_for_time(&self, time: f64) -> Option<&Period> {
        self.periods.iter().find(|p| p.contains(time))
    }

    /// Period immediately following `id`.
    pub fn next_period(&self, id: &str) -> Option<&Period> {
        let position = self.periods.iter().position(|p| p.id == id)?;
        self.periods.get(position + 1)
    }

    pub fn is_last_period(&self, id: &str) -> bool {
        self.periods.last().is_some_and(|p| p.id == id)
    }

    /// Declared duration, falling back to the end of the last period.
    pub fn duration(&self) -> Option<f64> {
        self.duration
            .or_else(|| self.periods.last().and_then(|p| p.end))
    }

    /// Renames colliding adaptation and representation IDs in a single pass.
    ///
    /// A collision gets `-dup` appended until it is unique within its scope.
    /// Returns how many IDs were renamed.
    pub fn dedupe_ids(&mut self) -> usize {
        let mut renamed = 0;
        for period in &mut self.periods {
            let mut adaptation_ids = HashSet::new();
            for adaptation in &mut period.adaptations {
                renamed += usize::from(make_unique(&mut adaptation.id, &mut adaptation_ids));

                let mut representation_ids = HashSet::new();
                for representation in &mut adaptation.representations {
                    renamed += usize::from(make_unique(
                        &mut representation.id,
                        &mut representation_ids,
                    ));
                }
            }
        }
        if renamed > 0 {
            debug!(manifest = %self.id, renamed, "deduplicated manifest ids");
        }
        renamed
    }
}

fn make_unique(id: &mut String, seen: &mut HashSet<String>) -> bool {
    let mut changed = false;
    while seen.contains(id.as_str()) {
        id.push_str("-dup");
        changed = true;
    }
    seen.insert(id.clone());
    changed
}

fn normalize_periods(mut periods: Vec<Period>, duration: Option<f64>) -> ManifestResult<Vec<Period>> {
    if periods.is_empty() {
        return Err(ManifestError::NoPeriods);
    }
    periods.sort_by(|a, b| a.start.total_cmp(&b.start));

    let next_starts: Vec<Option<f64>> = periods
        .iter()
        .skip(1)
        .map(|p| Some(p.start))
        .chain(std::iter::once(None))
        .collect();

    for (period, next_start) in periods.iter_mut().zip(next_starts) {
        period.end = match (period.end, next_start) {
            (Some(end), Some(next)) => Some(end.min(next)),
            (None, Some(next)) => Some(next),
            (end, None) => end.or(duration),
        };
        if let Some(end) = period.end {
            if end <= period.start {
                return Err(ManifestError::InvalidPeriod {
                    id: period.id.clone(),
                    reason: format!("end {end} is not after start {}", period.start),
                });
            }
        }
    }
    Ok(periods)
}
