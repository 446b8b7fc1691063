use std::sync::Arc;

use rivulet_abr::AbrManager;
use rivulet_buffer::{
    BufferError, ClockReceiver, MAX_EDGE_SLACK, QueuedSink, RangeSet, SegmentBookkeeper,
    SegmentInfo, SinkChunk, TimeRange,
};
use rivulet_events::{RepresentationInfo, StreamEvent};
use rivulet_manifest::{Adaptation, Manifest, Period, Representation, Segment, TrackType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    EndOfStreamCoordinator, EventSender, FetchedSegment, PipelineError, SegmentPipeline,
    SegmentRequest, StreamError, StreamResult,
};

/// Holes shorter than this are float noise, not missing media.
const GAP_EPSILON: f64 = 1e-3;

/// Instructions from the controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrchestratorCommand {
    /// Fill the hole skipped after a discontinuity again.
    Resume,
}

/// What an orchestrator tells the controller.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackReport {
    /// The track stopped; the session must restart or fail.
    Failed(StreamError),
    /// Media is missing in `[gap_start, next_time)`.
    Discontinuity {
        track: TrackType,
        gap_start: f64,
        next_time: f64,
    },
}

/// Collaborators shared by every orchestrator of a session.
#[derive(Clone)]
pub struct SessionParts {
    pub manifest: Arc<Manifest>,
    pub pipeline: Arc<SegmentPipeline>,
    pub abr: Arc<AbrManager>,
    pub end_of_stream: Arc<EndOfStreamCoordinator>,
    pub events: EventSender,
    pub reports: mpsc::UnboundedSender<TrackReport>,
}

#[derive(Debug, PartialEq)]
enum Step {
    /// Something was done; plan again right away.
    Progress,
    /// Nothing to do until the clock, ABR or a command changes.
    Idle,
}

enum Plan {
    Fetch(Box<FetchJob>),
    Discontinuity { gap_start: f64, next_time: f64 },
    Done { end_reached: bool },
}

struct FetchJob {
    period_id: String,
    representation: Representation,
    segment: Segment,
    info: SegmentInfo,
}

/// Per-track buffering loop.
///
/// Each iteration keeps the bookkeeping in line with the sink, looks for the first hole in
/// the wanted window `[current_time, current_time + wanted_buffer_ahead)` (clipped period
/// by period) and downloads the segment that fills it at the quality ABR picks.
pub struct BufferOrchestrator {
    track: TrackType,
    parts: SessionParts,
    sink: QueuedSink,
    bookkeeper: SegmentBookkeeper,
    clock: ClockReceiver,
    commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
    cancel: CancellationToken,
    /// `(period, representation)` whose init data the sink last received.
    initialized: Option<(String, String)>,
    /// Hole reported as a discontinuity, left alone until resumed or seeking.
    skipped: Option<TimeRange>,
}

impl BufferOrchestrator {
    pub fn new(
        track: TrackType,
        parts: SessionParts,
        sink: QueuedSink,
        clock: ClockReceiver,
        commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            track,
            parts,
            sink,
            bookkeeper: SegmentBookkeeper::new(),
            clock,
            commands,
            cancel,
            initialized: None,
            skipped: None,
        }
    }

    pub fn track(&self) -> TrackType {
        self.track
    }

    /// Buffers until cancelled. Failures are reported, not returned.
    pub async fn run(mut self) {
        let mut abr_revision = self.parts.abr.subscribe();
        debug!(track = %self.track, "orchestrator started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.step().await {
                Ok(Step::Progress) => continue,
                Ok(Step::Idle) => {}
                Err(error) if is_teardown(&error) => break,
                Err(error) => {
                    info!(track = %self.track, %error, "track failed");
                    let _ = self.parts.reports.send(TrackReport::Failed(error));
                    break;
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                changed = self.clock.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = abr_revision.changed() => {}
                Some(command) = self.commands.recv() => self.handle(command),
            }
        }
        debug!(track = %self.track, "orchestrator stopped");
    }

    fn handle(&mut self, command: OrchestratorCommand) {
        match command {
            OrchestratorCommand::Resume => {
                trace!(track = %self.track, skipped = ?self.skipped, "resuming");
                self.skipped = None;
            }
        }
    }

    async fn step(&mut self) -> StreamResult<Step> {
        let tick = *self.clock.borrow_and_update();

        let lost = self.bookkeeper.synchronize(&self.sink.buffered());
        if !lost.is_empty() {
            trace!(track = %self.track, ?lost, "bookkeeping dropped evicted ranges");
        }
        if tick.is_seeking {
            self.skipped = None;
        }

        let window_end = tick.current_time + tick.wanted_buffer_ahead.max(0.0);
        match self.plan(tick.current_time, window_end) {
            Plan::Fetch(job) => {
                self.parts.end_of_stream.resume(self.track);
                self.execute(*job).await?;
                Ok(Step::Progress)
            }
            Plan::Discontinuity {
                gap_start,
                next_time,
            } => {
                info!(track = %self.track, gap_start, next_time, "discontinuity");
                self.skipped = TimeRange::new(gap_start, next_time).ok();
                let _ = self.parts.events.send(StreamEvent::Discontinuity {
                    track: self.track,
                    gap_start,
                    next_time,
                });
                let _ = self.parts.reports.send(TrackReport::Discontinuity {
                    track: self.track,
                    gap_start,
                    next_time,
                });
                Ok(Step::Progress)
            }
            Plan::Done { end_reached } => {
                if end_reached {
                    self.parts.end_of_stream.request(self.track);
                } else {
                    self.parts.end_of_stream.resume(self.track);
                }
                Ok(Step::Idle)
            }
        }
    }

    fn plan(&self, time: f64, window_end: f64) -> Plan {
        let manifest = Arc::clone(&self.parts.manifest);

        for period in manifest.periods() {
            if period.start >= window_end || period.end.is_some_and(|end| end <= time) {
                continue;
            }
            let Some(adaptation) = period.adaptation(self.track) else {
                continue;
            };
            let start = time.max(period.start);
            let end = period.end.map_or(window_end, |e| e.min(window_end));
            let Ok(window) = TimeRange::new(start, end) else {
                continue;
            };
            let holes = self.holes_within(window);
            if holes.is_empty() {
                continue;
            }

            let Some(representation) = self.choose(&period.id, adaptation) else {
                continue;
            };
            for hole in holes {
                if let Some(plan) = self.plan_hole(period, representation, hole) {
                    return plan;
                }
            }
        }

        if let Some(job) = self.plan_upgrade(&manifest, time, window_end) {
            return Plan::Fetch(Box::new(job));
        }

        let end_reached = !manifest.is_live
            && manifest
                .duration()
                .is_some_and(|end| window_end >= end - GAP_EPSILON);
        Plan::Done { end_reached }
    }

    /// Unbuffered parts of `window`, minus the skipped discontinuity.
    fn holes_within(&self, window: TimeRange) -> Vec<TimeRange> {
        let mut holes: RangeSet = self
            .bookkeeper
            .buffered()
            .gaps_within(window)
            .into_iter()
            .collect();
        if let Some(skipped) = self.skipped {
            holes.remove(skipped);
        }
        holes
            .iter()
            .filter(|hole| hole.duration() > GAP_EPSILON)
            .copied()
            .collect()
    }

    fn choose<'a>(&self, period_id: &str, adaptation: &'a Adaptation) -> Option<&'a Representation> {
        let decision = self.parts.abr.choose(self.track, period_id, adaptation);
        let representation = adaptation
            .representation(&decision.representation_id)
            .or_else(|| adaptation.representations().first())?;
        if decision.changed {
            let _ = self.parts.events.send(StreamEvent::BitrateChanged {
                track: self.track,
                representation: RepresentationInfo::from(representation),
            });
        }
        Some(representation)
    }

    fn plan_hole(
        &self,
        period: &Period,
        representation: &Representation,
        hole: TimeRange,
    ) -> Option<Plan> {
        let segments = representation.index.segments_in(hole.start(), hole.end());
        let covered = segments
            .iter()
            .any(|s| s.start <= hole.start() + GAP_EPSILON);

        if !covered {
            // Index rounding between adjacent segments, not missing media.
            if hole.duration() <= MAX_EDGE_SLACK {
                return None;
            }
            let next_time = representation
                .index
                .next_segment_start(hole.start())
                .or(period.end)?;
            return Some(Plan::Discontinuity {
                gap_start: hole.start(),
                next_time,
            });
        }

        segments.into_iter().find_map(|segment| {
            let info = segment_info(period, representation, &segment)?;
            (!self.bookkeeper.has_segment(&info)).then(|| {
                Plan::Fetch(Box::new(FetchJob {
                    period_id: period.id.clone(),
                    representation: representation.clone(),
                    segment,
                    info,
                }))
            })
        })
    }

    /// Re-fetches buffered media ahead of the playhead segment when a strictly higher
    /// bitrate is now chosen.
    fn plan_upgrade(&self, manifest: &Manifest, time: f64, window_end: f64) -> Option<FetchJob> {
        let period = manifest.period_for_time(time)?;
        let adaptation = period.adaptation(self.track)?;
        let representation = self.choose(&period.id, adaptation)?;

        for entry in self.bookkeeper.segments() {
            let start = entry.range.start();
            if start >= window_end {
                break;
            }
            if start < time || entry.info.period_id != period.id {
                continue;
            }
            if entry.info.bitrate >= representation.bitrate {
                continue;
            }
            let Some(segment) = representation.index.segment_at(start) else {
                continue;
            };
            if segment.contains(time) {
                continue;
            }
            let Some(info) = segment_info(period, representation, &segment) else {
                continue;
            };
            if !self.bookkeeper.has_segment(&info) {
                debug!(track = %self.track, representation = %representation.id, segment = segment.number, "upgrading buffered segment");
                return Some(FetchJob {
                    period_id: period.id.clone(),
                    representation: representation.clone(),
                    segment,
                    info,
                });
            }
        }
        None
    }

    async fn execute(&mut self, job: FetchJob) -> StreamResult<()> {
        let track = self.track;
        let range = job.info.declared;
        let key = (job.period_id.clone(), job.representation.id.clone());

        if self.initialized.as_ref() != Some(&key) {
            if let Some(init) = job.representation.index.init_segment() {
                let request = SegmentRequest::init(track, init);
                let Some(fetched) = self.fetch_unless_seeked_away(&request, range).await? else {
                    return Ok(());
                };
                self.sink
                    .enqueue_append(SinkChunk::init(fetched.data))
                    .await
                    .map_err(|source| StreamError::Buffer { track, source })?;
            }
            self.initialized = Some(key);
        }

        let request = SegmentRequest::media(track, &job.segment);
        let Some(fetched) = self.fetch_unless_seeked_away(&request, range).await? else {
            return Ok(());
        };
        self.sink
            .enqueue_append(SinkChunk::media(fetched.data, range))
            .await
            .map_err(|source| StreamError::Buffer { track, source })?;
        self.bookkeeper.add_segment(range, job.info);
        trace!(%track, representation = %job.representation.id, segment = job.segment.number, ?range, "segment buffered");
        Ok(())
    }

    /// Downloads `request`, abandoning it when a seek lands outside `segment_range`.
    async fn fetch_unless_seeked_away(
        &mut self,
        request: &SegmentRequest,
        segment_range: TimeRange,
    ) -> StreamResult<Option<FetchedSegment>> {
        let track = self.track;
        let to_error = |source: PipelineError| StreamError::Pipeline { track, source };

        let fetch = self.parts.pipeline.fetch(request, &self.cancel);
        tokio::pin!(fetch);

        loop {
            tokio::select! {
                result = &mut fetch => return result.map(Some).map_err(to_error),
                changed = self.clock.changed() => {
                    if changed.is_err() {
                        return fetch.await.map(Some).map_err(to_error);
                    }
                    let tick = *self.clock.borrow();
                    if tick.is_seeking && !segment_range.contains(tick.current_time) {
                        debug!(%track, url = %request.url, position = tick.current_time, "seek outside in-flight segment, aborting");
                        return Ok(None);
                    }
                }
            }
        }
    }
}

fn segment_info(
    period: &Period,
    representation: &Representation,
    segment: &Segment,
) -> Option<SegmentInfo> {
    let declared = TimeRange::new(segment.start, segment.end()).ok()?;
    Some(SegmentInfo {
        period_id: period.id.clone(),
        representation_id: representation.id.clone(),
        bitrate: representation.bitrate,
        segment_number: segment.number,
        byte_range: segment.byte_range,
        declared,
    })
}

fn is_teardown(error: &StreamError) -> bool {
    matches!(
        error,
        StreamError::Buffer {
            source: BufferError::Disposed,
            ..
        } | StreamError::Pipeline {
            source: PipelineError::Cancelled,
            ..
        }
    )
}
