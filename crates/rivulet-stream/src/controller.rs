use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use parking_lot::Mutex;
use rivulet_abr::AbrManager;
use rivulet_buffer::{ClockTick, GarbageCollector, QueuedSink, RangeSet};
use rivulet_events::{EventBus, Issue, RepresentationInfo, StreamEvent};
use rivulet_manifest::{Manifest, TrackType};
use rivulet_net::{Net, retry_with_backoff};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
    time::MissedTickBehavior,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    BufferOrchestrator, EndOfStreamCoordinator, EngineConfig, EventSender, FrameCounters,
    ManifestLoader, OrchestratorCommand, PassThrough, PlaybackSurface, SegmentParser,
    SegmentPipeline, SessionParts, StartAt, StreamError, StreamResult, TrackReport,
};

/// Lifecycle of a streaming session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    FetchingManifest,
    WaitingSurfaceReady,
    Initializing,
    Running,
    /// Restarting after a session-level failure; `attempt` counts retries.
    Retrying {
        attempt: u32,
    },
    Ended,
    Failed,
    Disposed,
}

impl ControllerState {
    /// No further transitions happen from here.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disposed)
    }
}

/// State shared between the session task and its handles.
struct Shared {
    state: watch::Sender<ControllerState>,
    sinks: Mutex<BTreeMap<TrackType, QueuedSink>>,
    chosen: Mutex<BTreeMap<TrackType, RepresentationInfo>>,
    abr: Arc<AbrManager>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl Shared {
    /// A disposed session never leaves `Disposed`.
    fn set_state(&self, next: ControllerState) {
        self.state.send_if_modified(|state| {
            if *state == ControllerState::Disposed || *state == next {
                return false;
            }
            debug!(from = ?*state, to = ?next, "controller state");
            *state = next;
            true
        });
    }

    fn dispose_sinks(&self) {
        for sink in self.sinks.lock().values() {
            sink.dispose();
        }
    }
}

/// Builds and starts a streaming session.
///
/// ```ignore
/// let handle = StreamController::new(config, loader, surface, net).start();
/// let mut events = handle.subscribe();
/// ```
pub struct StreamController {
    config: EngineConfig,
    loader: Arc<dyn ManifestLoader>,
    surface: Arc<dyn PlaybackSurface>,
    net: Arc<dyn Net>,
    parser: Arc<dyn SegmentParser>,
    shared: Arc<Shared>,
}

impl StreamController {
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn ManifestLoader>,
        surface: Arc<dyn PlaybackSurface>,
        net: Arc<dyn Net>,
    ) -> Self {
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let shared = Arc::new(Shared {
            state: watch::Sender::new(ControllerState::Idle),
            sinks: Mutex::new(BTreeMap::new()),
            chosen: Mutex::new(BTreeMap::new()),
            abr: Arc::new(AbrManager::new(config.abr.clone())),
            bus: EventBus::new(config.event_capacity),
            cancel,
        });
        Self {
            config,
            loader,
            surface,
            net,
            parser: Arc::new(PassThrough),
            shared,
        }
    }

    #[must_use]
    pub fn with_segment_parser(mut self, parser: Arc<dyn SegmentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Subscribe before [`start`](Self::start) to observe `manifestReady`.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.bus.subscribe()
    }

    /// Spawns the session and event forwarding tasks.
    pub fn start(self) -> StreamHandle {
        let (events, rx) = mpsc::unbounded_channel();
        let handle = StreamHandle {
            shared: Arc::clone(&self.shared),
        };

        tokio::spawn(forward_events(rx, Arc::clone(&self.shared)));

        let session = Session {
            config: self.config,
            loader: self.loader,
            surface: self.surface,
            net: self.net,
            parser: self.parser,
            shared: self.shared,
            events,
            manifest: Mutex::new(None),
        };
        tokio::spawn(session.run());

        handle
    }
}

async fn forward_events(mut rx: mpsc::UnboundedReceiver<StreamEvent>, shared: Arc<Shared>) {
    while let Some(event) = rx.recv().await {
        if let StreamEvent::BitrateChanged {
            track,
            representation,
        } = &event
        {
            shared.chosen.lock().insert(*track, representation.clone());
        }
        shared.bus.publish(event);
    }
}

/// Cheap handle to a running session.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl StreamHandle {
    pub fn state(&self) -> ControllerState {
        *self.shared.state.borrow()
    }

    /// Resolves with the first state matching `predicate`.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(ControllerState) -> bool,
    ) -> ControllerState {
        let mut rx = self.shared.state.subscribe();
        let waited = rx.wait_for(|state| predicate(*state)).await.map(|state| *state);
        waited.unwrap_or_else(|_| *rx.borrow())
    }

    /// Ranges the surface holds for `track`; empty before the session initialized.
    pub fn buffered(&self, track: TrackType) -> RangeSet {
        self.shared
            .sinks
            .lock()
            .get(&track)
            .map(QueuedSink::buffered)
            .unwrap_or_default()
    }

    pub fn chosen_representation(&self, track: TrackType) -> Option<RepresentationInfo> {
        self.shared.chosen.lock().get(&track).cloned()
    }

    pub fn set_manual_bitrate(&self, track: TrackType, bitrate: Option<u64>) {
        self.shared.abr.set_manual_bitrate(track, bitrate);
    }

    pub fn set_max_auto_bitrate(&self, track: TrackType, bitrate: Option<u64>) {
        self.shared.abr.set_max_auto_bitrate(track, bitrate);
    }

    pub fn set_limit_width(&self, width: Option<u32>) {
        self.shared.abr.set_limit_width(width);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.bus.subscribe()
    }

    pub fn events(&self) -> BroadcastStream<StreamEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Stops every task and releases every sink. Safe to call more than once.
    pub fn dispose(&self) {
        if self.state() == ControllerState::Disposed {
            return;
        }
        info!("disposing stream");
        self.shared.set_state(ControllerState::Disposed);
        self.shared.cancel.cancel();
        self.shared.dispose_sinks();
    }
}

/// Where playback starts, clamped to the first period.
pub fn start_position(manifest: &Manifest, start_at: StartAt) -> StreamResult<f64> {
    let first = manifest
        .periods()
        .first()
        .map_or(0.0, |period| period.start);
    let requested = match start_at {
        StartAt::Beginning => first,
        StartAt::Position(position) => position,
        StartAt::FromEnd(offset) => match manifest.duration() {
            Some(end) => end - offset,
            None => return Err(StreamError::StartingTimeNotFound { position: -offset }),
        },
    };
    let position = requested.max(first);
    if manifest.period_for_time(position).is_none() {
        return Err(StreamError::StartingTimeNotFound {
            position: requested,
        });
    }
    Ok(position)
}

struct Session {
    config: EngineConfig,
    loader: Arc<dyn ManifestLoader>,
    surface: Arc<dyn PlaybackSurface>,
    net: Arc<dyn Net>,
    parser: Arc<dyn SegmentParser>,
    shared: Arc<Shared>,
    events: EventSender,
    /// Loaded once; session restarts reuse it.
    manifest: Mutex<Option<Arc<Manifest>>>,
}

impl Session {
    async fn run(self) {
        let mut attempts = 0;
        let cancel = self.shared.cancel.clone();

        let work = retry_with_backoff(
            &self.config.session_retry,
            |error: &StreamError| !error.is_fatal(),
            |error, retry, delay| {
                warn!(%error, attempt = retry, delay_ms = delay.as_millis(), "restarting session");
                self.shared
                    .set_state(ControllerState::Retrying { attempt: retry });
                let message = format!("session restart {retry} after: {error}");
                let _ = self.events.send(StreamEvent::Warning(Issue::new(
                    error.code(),
                    error.track(),
                    message,
                )));
            },
            |attempt| {
                attempts = attempt + 1;
                self.run_once()
            },
        );

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(()),
            result = work => result,
        };

        match result {
            Ok(()) => debug!("session stopped"),
            Err(error) => {
                let error = if error.is_fatal() {
                    error
                } else {
                    StreamError::UnrecoverableFailure {
                        attempts,
                        source: Box::new(error),
                    }
                };
                warn!(%error, "session failed");
                self.shared.set_state(ControllerState::Failed);
                let _ = self.events.send(StreamEvent::FatalError(error.to_issue()));
                self.shared.dispose_sinks();
            }
        }
    }

    async fn manifest(&self) -> StreamResult<Arc<Manifest>> {
        let cached = self.manifest.lock().clone();
        if let Some(manifest) = cached {
            return Ok(manifest);
        }
        let mut manifest = self.loader.load().await?;
        let renamed = manifest.dedupe_ids();
        if renamed > 0 {
            info!(renamed, "renamed colliding ids");
        }
        let manifest = Arc::new(manifest);
        *self.manifest.lock() = Some(Arc::clone(&manifest));
        let _ = self.events.send(StreamEvent::ManifestReady {
            manifest_id: manifest.id.clone(),
            periods: manifest.periods().len(),
            duration: manifest.duration(),
        });
        Ok(manifest)
    }

    /// One `FetchingManifest → Running` cycle. Returns `Ok` only when cancelled.
    async fn run_once(&self) -> StreamResult<()> {
        let cancel = self.shared.cancel.child_token();
        let _stop_children = cancel.clone().drop_guard();

        self.shared.set_state(ControllerState::FetchingManifest);
        let manifest = self.manifest().await?;

        self.shared.set_state(ControllerState::WaitingSurfaceReady);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            ready = self.surface.wait_ready() => ready?,
        }

        self.shared.set_state(ControllerState::Initializing);
        if let Some(duration) = manifest.duration() {
            self.surface.set_duration(duration)?;
        }
        let start = start_position(&manifest, self.config.start_at)?;
        if (self.surface.current_time() - start).abs() > 1e-3 {
            debug!(start, "seeking to starting position");
            self.surface.seek(start);
        }

        let (clock_tx, clock_rx) = watch::channel(self.tick(start, false));
        let (reports_tx, mut reports) = mpsc::unbounded_channel();

        let mut sinks = Vec::new();
        for track in track_types(&manifest) {
            let Some(representation) = manifest
                .periods()
                .iter()
                .filter_map(|period| period.adaptation(track))
                .find_map(|adaptation| adaptation.representations().first())
            else {
                continue;
            };
            let raw = self.surface.create_sink(track, representation)?;
            sinks.push(QueuedSink::new(
                track,
                raw,
                clock_rx.clone(),
                self.config.buffer.gc_floor,
            ));
        }
        *self.shared.sinks.lock() = sinks.iter().map(|s| (s.track(), s.clone())).collect();

        let end_of_stream = Arc::new(EndOfStreamCoordinator::new(
            sinks.iter().map(QueuedSink::track),
            sinks.clone(),
            Arc::clone(&self.surface),
            self.config.end_of_stream_retry.clone(),
            self.events.clone(),
        ));
        let pipeline = SegmentPipeline::new(
            Arc::clone(&self.net),
            Arc::clone(&self.shared.abr),
            self.config.segment_retry.clone(),
            self.config.request_timeout,
        )
        .with_parser(Arc::clone(&self.parser))
        .with_events(self.events.clone());
        let parts = SessionParts {
            manifest: Arc::clone(&manifest),
            pipeline: Arc::new(pipeline),
            abr: Arc::clone(&self.shared.abr),
            end_of_stream: Arc::clone(&end_of_stream),
            events: self.events.clone(),
            reports: reports_tx.clone(),
        };

        let mut tasks = JoinSet::new();
        let mut commands = BTreeMap::new();
        for sink in &sinks {
            let track = sink.track();
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            commands.insert(track, command_tx);
            tasks.spawn(GarbageCollector::new(sink.clone(), clock_rx.clone(), cancel.clone()).run());
            tasks.spawn(
                BufferOrchestrator::new(
                    track,
                    parts.clone(),
                    sink.clone(),
                    clock_rx.clone(),
                    command_rx,
                    cancel.clone(),
                )
                .run(),
            );
        }
        tasks.spawn({
            let end_of_stream = Arc::clone(&end_of_stream);
            let cancel = cancel.clone();
            async move {
                if let Err(error) = end_of_stream.run(&cancel).await {
                    let _ = reports_tx.send(TrackReport::Failed(error));
                }
            }
        });

        self.shared.set_state(ControllerState::Running);
        let _ = self.events.send(StreamEvent::Loaded);
        info!(manifest = %manifest.id, start, tracks = sinks.len(), "session running");

        let mut monitor = PlaybackMonitor {
            manifest: &manifest,
            sinks: &sinks,
            commands,
            period_id: None,
            stalled: BTreeSet::new(),
            jumps: BTreeMap::new(),
            frames: None,
        };
        let mut declared = end_of_stream.subscribe_declared();
        let mut interval = tokio::time::interval(self.config.clock_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                Some(report) = reports.recv() => match report {
                    TrackReport::Failed(error) => break Err(error),
                    TrackReport::Discontinuity { track, gap_start, next_time } => {
                        monitor.jumps.insert(track, (gap_start, next_time));
                    }
                },
                Ok(()) = declared.changed() => {
                    let ended = *declared.borrow_and_update();
                    self.shared.set_state(if ended {
                        ControllerState::Ended
                    } else {
                        ControllerState::Running
                    });
                }
                _ = interval.tick() => {
                    let tick = self.tick(self.surface.current_time(), self.surface.is_seeking());
                    clock_tx.send_replace(tick);
                    self.observe(&mut monitor, &tick, *declared.borrow());
                }
            }
        };

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
        for sink in &sinks {
            sink.dispose();
        }
        result
    }

    fn tick(&self, current_time: f64, is_seeking: bool) -> ClockTick {
        let buffer = &self.config.buffer;
        ClockTick {
            current_time,
            wanted_buffer_ahead: buffer.wanted_buffer_ahead,
            max_buffer_ahead: buffer.max_buffer_ahead,
            max_buffer_behind: buffer.max_buffer_behind,
            is_seeking,
        }
    }

    fn observe(&self, monitor: &mut PlaybackMonitor<'_>, tick: &ClockTick, ended: bool) {
        if let Some(ratio) = monitor.dropped_frame_ratio(self.surface.frame_counters()) {
            self.shared.abr.set_dropped_frame_ratio(ratio);
        }

        let time = tick.current_time;
        if let Some(period) = monitor.manifest.period_for_time(time)
            && monitor.period_id.as_deref() != Some(period.id.as_str())
        {
            let first = monitor.period_id.is_none();
            monitor.period_id = Some(period.id.clone());
            if !first {
                info!(period = %period.id, start = period.start, "period changed");
                let _ = self.events.send(StreamEvent::PeriodChanged {
                    period_id: period.id.clone(),
                    start: period.start,
                });
            }
        }

        let mut resumed = Vec::new();
        for (track, (gap_start, next_time)) in &monitor.jumps {
            if time >= *next_time {
                resumed.push(*track);
            } else if !tick.is_seeking && time >= *gap_start - 1e-3 {
                info!(%track, from = time, to = next_time, "jumping over discontinuity");
                self.surface.seek(*next_time);
                resumed.push(*track);
            }
        }
        for track in resumed {
            monitor.jumps.remove(&track);
            if let Some(commands) = monitor.commands.get(&track) {
                let _ = commands.send(OrchestratorCommand::Resume);
            }
        }

        for sink in monitor.sinks {
            let track = sink.track();
            let starving = !tick.is_seeking && !ended && !sink.buffered().contains(time);
            if !starving {
                monitor.stalled.remove(&track);
            } else if monitor.stalled.insert(track) {
                debug!(%track, position = time, "stalled");
                let _ = self.events.send(StreamEvent::Stalled {
                    track,
                    position: time,
                });
            }
        }
    }
}

/// Per-tick playback observations of one session cycle.
struct PlaybackMonitor<'a> {
    manifest: &'a Manifest,
    sinks: &'a [QueuedSink],
    commands: BTreeMap<TrackType, mpsc::UnboundedSender<OrchestratorCommand>>,
    period_id: Option<String>,
    stalled: BTreeSet<TrackType>,
    /// Pending discontinuity per track: `(gap_start, next_time)`.
    jumps: BTreeMap<TrackType, (f64, f64)>,
    frames: Option<FrameCounters>,
}

impl PlaybackMonitor<'_> {
    /// Dropped share of the frames decoded since the previous sample.
    #[expect(clippy::cast_precision_loss, reason = "frame counts stay far below 2^52")]
    fn dropped_frame_ratio(&mut self, counters: Option<FrameCounters>) -> Option<f64> {
        let counters = counters?;
        let previous = self.frames.replace(counters).unwrap_or_default();
        let decoded = counters.decoded.saturating_sub(previous.decoded);
        let dropped = counters.dropped.saturating_sub(previous.dropped);
        (decoded > 0).then(|| (dropped as f64 / decoded as f64).min(1.0))
    }
}

fn track_types(manifest: &Manifest) -> BTreeSet<TrackType> {
    manifest
        .periods()
        .iter()
        .flat_map(rivulet_manifest::Period::track_types)
        .collect()
}
