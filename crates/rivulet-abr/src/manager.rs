use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use rivulet_manifest::{Adaptation, Representation, TrackType};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    AbrOptions, Estimator, NetworkMetric, RequestId, RequestProgress, ThroughputEstimator,
};

/// Periods per track whose last choice is remembered.
const REMEMBERED_PERIODS: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrReason {
    /// A manual bitrate is set for the track.
    Manual,
    /// Picked from the bandwidth estimate.
    Bandwidth,
    /// No estimate yet; lowest candidate or configured initial bitrate.
    NoEstimate,
    /// Stepped one representation down because too many frames are dropped.
    DroppedFrames,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbrDecision {
    pub representation_id: String,
    pub bitrate: u64,
    pub reason: AbrReason,
    /// `false` when the choice repeats the previous one and needs no announcement.
    pub changed: bool,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    segment_duration: f64,
    progress: Option<RequestProgress>,
}

struct TrackContext<E> {
    estimator: E,
    in_flight: HashMap<RequestId, InFlight>,
    manual_bitrate: Option<u64>,
    max_auto_bitrate: Option<u64>,
    last_choice: Option<String>,
    /// `(period id, representation id)`, oldest first.
    period_choices: VecDeque<(String, String)>,
    force_emit: bool,
}

struct Shared {
    limit_width: Option<u32>,
    dropped_frame_ratio: f64,
}

/// Per-track adaptive bitrate state, shared by every orchestrator of a session.
///
/// Telemetry is written by segment pipelines; orchestrators call [`AbrManager::choose`]
/// on each loop iteration. Overrides bump a revision that orchestrators watch so they
/// re-evaluate without waiting for the next clock tick.
pub struct AbrManager<E: Estimator = ThroughputEstimator> {
    options: AbrOptions,
    make_estimator: Box<dyn Fn(TrackType) -> E + Send + Sync>,
    tracks: Mutex<HashMap<TrackType, TrackContext<E>>>,
    shared: Mutex<Shared>,
    next_request: AtomicU64,
    revision: watch::Sender<u64>,
}

impl AbrManager<ThroughputEstimator> {
    pub fn new(options: AbrOptions) -> Self {
        let estimator_options = options.clone();
        Self::with_estimators(options, move |_| ThroughputEstimator::new(&estimator_options))
    }
}

impl<E: Estimator> AbrManager<E> {
    pub fn with_estimators(
        options: AbrOptions,
        make_estimator: impl Fn(TrackType) -> E + Send + Sync + 'static,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Shared {
            limit_width: options.limit_width,
            dropped_frame_ratio: 0.0,
        };
        Self {
            options,
            make_estimator: Box::new(make_estimator),
            tracks: Mutex::new(HashMap::new()),
            shared: Mutex::new(shared),
            next_request: AtomicU64::new(1),
            revision,
        }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.options
    }

    /// Receiver notified whenever an override changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn with_track<R>(&self, track: TrackType, f: impl FnOnce(&mut TrackContext<E>) -> R) -> R {
        let mut tracks = self.tracks.lock();
        let ctx = tracks.entry(track).or_insert_with(|| TrackContext {
            estimator: (self.make_estimator)(track),
            in_flight: HashMap::new(),
            manual_bitrate: self.options.manual_bitrates.get(&track).copied(),
            max_auto_bitrate: self.options.max_auto_bitrates.get(&track).copied(),
            last_choice: None,
            period_choices: VecDeque::new(),
            force_emit: false,
        });
        f(ctx)
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    // Telemetry

    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    pub fn request_started(&self, track: TrackType, id: RequestId, segment_duration: f64) {
        self.with_track(track, |ctx| {
            ctx.in_flight.insert(
                id,
                InFlight {
                    segment_duration,
                    progress: None,
                },
            );
        });
    }

    pub fn request_progress(&self, track: TrackType, id: RequestId, progress: RequestProgress) {
        self.with_track(track, |ctx| {
            if let Some(request) = ctx.in_flight.get_mut(&id) {
                request.progress = Some(progress);
            }
        });
    }

    /// Forgets a request, whether it completed, failed or was cancelled.
    pub fn request_finished(&self, track: TrackType, id: RequestId) {
        self.with_track(track, |ctx| {
            ctx.in_flight.remove(&id);
        });
    }

    pub fn add_metric(&self, track: TrackType, metric: NetworkMetric) {
        self.with_track(track, |ctx| ctx.estimator.push_metric(&metric));
    }

    pub fn in_flight_count(&self, track: TrackType) -> usize {
        self.with_track(track, |ctx| ctx.in_flight.len())
    }

    // Overrides

    pub fn set_manual_bitrate(&self, track: TrackType, bitrate: Option<u64>) {
        self.with_track(track, |ctx| {
            ctx.manual_bitrate = bitrate;
            ctx.force_emit = true;
        });
        debug!(%track, ?bitrate, "manual bitrate changed");
        self.bump_revision();
    }

    pub fn set_max_auto_bitrate(&self, track: TrackType, bitrate: Option<u64>) {
        self.with_track(track, |ctx| ctx.max_auto_bitrate = bitrate);
        self.bump_revision();
    }

    pub fn set_limit_width(&self, width: Option<u32>) {
        self.shared.lock().limit_width = width;
        self.bump_revision();
    }

    /// Ratio of dropped to decoded video frames over the last measured interval.
    pub fn set_dropped_frame_ratio(&self, ratio: f64) {
        let mut shared = self.shared.lock();
        let was_over = shared.dropped_frame_ratio > self.options.dropped_frames_threshold;
        shared.dropped_frame_ratio = ratio;
        let is_over = ratio > self.options.dropped_frames_threshold;
        drop(shared);
        if was_over != is_over {
            self.bump_revision();
        }
    }

    /// Current bandwidth estimate for `track`, in-flight slowness included.
    pub fn estimate(&self, track: TrackType) -> Option<u64> {
        self.with_track(track, |ctx| Self::estimate_for(ctx, &self.options, track))
    }

    fn estimate_for(ctx: &TrackContext<E>, options: &AbrOptions, track: TrackType) -> Option<u64> {
        let sampled = ctx
            .estimator
            .estimate_bps()
            .or_else(|| options.initial_bitrates.get(&track).copied());
        let pending = ctx
            .in_flight
            .values()
            .filter_map(InFlight::emergency_estimate)
            .min();
        match (sampled, pending) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn last_choice(&self, track: TrackType) -> Option<String> {
        self.tracks
            .lock()
            .get(&track)
            .and_then(|ctx| ctx.last_choice.clone())
    }

    /// Picks a representation of `adaptation`, which belongs to period `period_id`, for `track`.
    ///
    /// `changed` is set when the pick differs from the previous one in that period, or right after a
    /// manual override changed.
    pub fn choose(
        &self,
        track: TrackType,
        period_id: &str,
        adaptation: &Adaptation,
    ) -> AbrDecision {
        let (limit_width, dropped_frame_ratio) = {
            let shared = self.shared.lock();
            (shared.limit_width, shared.dropped_frame_ratio)
        };

        self.with_track(track, |ctx| {
            let sorted = adaptation.sorted_representations();
            let (chosen, reason) = if let Some(manual) = ctx.manual_bitrate {
                (highest_at_or_below(&sorted, manual), AbrReason::Manual)
            } else {
                let mut candidates = cap_bitrate(&sorted, ctx.max_auto_bitrate);
                if track == TrackType::Video {
                    candidates = cap_width(&candidates, limit_width);
                }
                let estimate = Self::estimate_for(ctx, &self.options, track);
                let (mut chosen, mut reason) = match estimate {
                    Some(bps) => {
                        let ceiling = scale(bps, self.options.safety_factor);
                        (highest_at_or_below(&candidates, ceiling), AbrReason::Bandwidth)
                    }
                    None => (candidates[0], AbrReason::NoEstimate),
                };
                if track == TrackType::Video
                    && dropped_frame_ratio > self.options.dropped_frames_threshold
                {
                    if let Some(lower) = step_down(&candidates, chosen) {
                        chosen = lower;
                        reason = AbrReason::DroppedFrames;
                    }
                }
                (chosen, reason)
            };

            let previous = ctx
                .period_choices
                .iter()
                .find(|(period, _)| period == period_id)
                .map(|(_, id)| id.as_str());
            let changed = ctx.force_emit || previous != Some(chosen.id.as_str());
            ctx.force_emit = false;
            ctx.last_choice = Some(chosen.id.clone());
            ctx.period_choices.retain(|(period, _)| period != period_id);
            ctx.period_choices
                .push_back((period_id.to_owned(), chosen.id.clone()));
            if ctx.period_choices.len() > REMEMBERED_PERIODS {
                ctx.period_choices.pop_front();
            }

            if changed {
                debug!(
                    %track,
                    representation = %chosen.id,
                    bitrate = chosen.bitrate,
                    ?reason,
                    "ABR choice"
                );
            }

            AbrDecision {
                representation_id: chosen.id.clone(),
                bitrate: chosen.bitrate,
                reason,
                changed,
            }
        })
    }
}

impl InFlight {
    /// Bandwidth implied by a request that already took longer than its media duration.
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "byte counts are far below 2^52"
    )]
    fn emergency_estimate(&self) -> Option<u64> {
        let progress = self.progress?;
        let elapsed = progress.elapsed.as_secs_f64();
        if elapsed <= self.segment_duration || progress.elapsed < Duration::from_millis(1) {
            return None;
        }
        Some((progress.bytes_received as f64 * 8.0 / elapsed) as u64)
    }
}

#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "bitrates are far below 2^52"
)]
fn scale(bps: u64, factor: f64) -> u64 {
    (bps as f64 * factor).max(0.0) as u64
}

/// Highest bitrate not above `ceiling`, first declared on ties; lowest when none fits.
fn highest_at_or_below<'a>(sorted: &[&'a Representation], ceiling: u64) -> &'a Representation {
    let mut best = sorted[0];
    for rep in sorted.iter().skip(1) {
        if rep.bitrate <= ceiling && rep.bitrate > best.bitrate {
            best = rep;
        }
    }
    best
}

fn cap_bitrate<'a>(sorted: &[&'a Representation], cap: Option<u64>) -> Vec<&'a Representation> {
    let Some(cap) = cap else {
        return sorted.to_vec();
    };
    let capped: Vec<_> = sorted.iter().copied().filter(|r| r.bitrate <= cap).collect();
    if capped.is_empty() {
        sorted[..1].to_vec()
    } else {
        capped
    }
}

fn cap_width<'a>(
    candidates: &[&'a Representation],
    limit: Option<u32>,
) -> Vec<&'a Representation> {
    let Some(limit) = limit else {
        return candidates.to_vec();
    };
    let fitting: Vec<_> = candidates
        .iter()
        .copied()
        .filter(|r| r.width.is_none_or(|w| w <= limit))
        .collect();
    if !fitting.is_empty() {
        return fitting;
    }
    let narrowest = candidates.iter().filter_map(|r| r.width).min();
    candidates
        .iter()
        .copied()
        .filter(|r| r.width == narrowest)
        .collect()
}

fn step_down<'a>(
    candidates: &[&'a Representation],
    chosen: &Representation,
) -> Option<&'a Representation> {
    candidates
        .iter()
        .copied()
        .filter(|r| r.bitrate < chosen.bitrate)
        .max_by_key(|r| r.bitrate)
        .map(|top| {
            candidates
                .iter()
                .copied()
                .find(|r| r.bitrate == top.bitrate)
                .unwrap_or(top)
        })
}
