use std::{sync::Arc, time::Duration};

use rivulet_abr::{AbrManager, AbrOptions};
use rivulet_buffer::{BufferError, BufferSink, ClockTick, QueuedSink, SinkError, TimeRange};
use rivulet_manifest::{Adaptation, Manifest, Period, TrackType};
use rivulet_net::RetryPolicy;
use rivulet_stream::{
    BufferOrchestrator, EndOfStreamCoordinator, OrchestratorCommand, SegmentPipeline,
    SessionParts, StreamError, StreamEvent, TrackReport,
};
use rivulet_test_utils::{
    MemorySink, MemorySurface, ScriptedNet, audio_adaptation, init_tracing,
    single_track_manifest, timeline_representation, video_ladder,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

fn r(start: f64, end: f64) -> TimeRange {
    TimeRange::new(start, end).expect("valid range")
}

fn tick(time: f64, wanted: f64) -> ClockTick {
    ClockTick {
        wanted_buffer_ahead: wanted,
        ..ClockTick::at(time)
    }
}

struct Harness {
    track: TrackType,
    sink: Arc<MemorySink>,
    net: Arc<ScriptedNet>,
    abr: Arc<AbrManager>,
    clock: watch::Sender<ClockTick>,
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    reports: mpsc::UnboundedReceiver<TrackReport>,
    end_of_stream: Arc<EndOfStreamCoordinator>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(manifest: Manifest, track: TrackType, net: ScriptedNet, start: ClockTick) -> Self {
        Self::start_with(manifest, track, net, MemorySink::new(), start, |_| {})
    }

    fn start_with(
        manifest: Manifest,
        track: TrackType,
        net: ScriptedNet,
        sink: MemorySink,
        start: ClockTick,
        configure: impl FnOnce(&AbrManager),
    ) -> Self {
        init_tracing();
        let sink = Arc::new(sink);
        let net = Arc::new(net);
        let (clock, clock_rx) = watch::channel(start);
        let queued = QueuedSink::new(track, sink.clone(), clock_rx.clone(), 2.0);
        let abr = Arc::new(AbrManager::new(AbrOptions::default()));
        configure(&abr);

        let (events_tx, events) = mpsc::unbounded_channel();
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let end_of_stream = Arc::new(EndOfStreamCoordinator::new(
            [track],
            vec![queued.clone()],
            Arc::new(MemorySurface::default()),
            RetryPolicy::default(),
            events_tx.clone(),
        ));
        let pipeline = SegmentPipeline::new(
            net.clone(),
            abr.clone(),
            RetryPolicy::default(),
            Duration::from_secs(10),
        );
        let parts = SessionParts {
            manifest: Arc::new(manifest),
            pipeline: Arc::new(pipeline),
            abr: abr.clone(),
            end_of_stream: end_of_stream.clone(),
            events: events_tx,
            reports: reports_tx,
        };

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let orchestrator =
            BufferOrchestrator::new(track, parts, queued, clock_rx, commands_rx, cancel.clone());
        let task = tokio::spawn(orchestrator.run());

        Self {
            track,
            sink,
            net,
            abr,
            clock,
            commands,
            events,
            reports,
            end_of_stream,
            cancel,
            task,
        }
    }

    fn drain_events(&mut self) -> Vec<StreamEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    fn wants_end(&self) -> bool {
        self.end_of_stream.wants(self.track)
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.expect("orchestrator task");
        self.sink.assert_exclusive();
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(3)).await;
}

fn audio_vod(duration: f64) -> Manifest {
    single_track_manifest(audio_adaptation(4.0, 0.0, Some(duration)), duration)
}

// Window

#[tokio::test(start_paused = true)]
async fn fills_wanted_window_then_requests_end_of_stream() {
    let net = ScriptedNet::new()
        .with_default_body(20_000)
        .with_latency(Duration::from_millis(50));
    let mut h = Harness::start(audio_vod(40.0), TrackType::Audio, net, tick(0.0, 12.0));

    settle().await;
    assert_eq!(h.sink.appended(), vec![r(0.0, 4.0), r(4.0, 8.0), r(8.0, 12.0)]);
    assert_eq!(h.sink.init_count(), 1);
    assert!(!h.wants_end());

    h.clock.send_replace(tick(30.0, 12.0));
    settle().await;

    // The window is clipped to the period end at 40.
    assert_eq!(
        h.sink.appended()[3..],
        [r(28.0, 32.0), r(32.0, 36.0), r(36.0, 40.0)]
    );
    assert!(h.wants_end());
    assert!(
        h.drain_events()
            .iter()
            .any(|e| matches!(e, StreamEvent::BitrateChanged { representation, .. } if representation.id == "a128k"))
    );
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn crosses_into_next_period() {
    let period = |id: &str, start: f64, end: f64| {
        Period::new(id, start, vec![audio_adaptation(4.0, start, Some(end))]).with_end(end)
    };
    let manifest = Manifest::new(
        "two-periods",
        vec![period("p0", 0.0, 10.0), period("p1", 10.0, 20.0)],
        Some(20.0),
    )
    .expect("manifest");
    let net = ScriptedNet::new().with_default_body(20_000);
    let h = Harness::start(manifest, TrackType::Audio, net, tick(6.0, 8.0));

    settle().await;

    // [8, 10) closes p0, then p1 restarts numbering at its own start.
    assert_eq!(
        h.sink.appended(),
        vec![r(4.0, 8.0), r(8.0, 10.0), r(10.0, 14.0)]
    );
    assert_eq!(h.sink.init_count(), 2);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sink_rounding_does_not_trigger_refetch() {
    let net = ScriptedNet::new().with_default_body(20_000);
    let sink = MemorySink::new().with_end_trim(0.05);
    let h = Harness::start_with(
        audio_vod(40.0),
        TrackType::Audio,
        net,
        sink,
        tick(0.0, 8.0),
        |_| {},
    );

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.sink.appended(), vec![r(0.0, 4.0), r(4.0, 8.0)]);
    assert_eq!(
        h.sink.buffered().as_slice(),
        &[r(0.0, 3.95), r(4.0, 7.95)]
    );
    assert_eq!(h.net.requests().len(), 3, "init and two segments");
    h.stop().await;
}

// Discontinuity

#[tokio::test(start_paused = true)]
async fn unfillable_gap_is_reported_once_until_resumed() {
    let mut segments: Vec<(f64, f64)> = (0..10).map(|i| (f64::from(i) * 4.0, 4.0)).collect();
    segments.push((40.0, 2.0));
    segments.push((46.0, 4.0));
    let representation = timeline_representation(TrackType::Audio, "a", 128_000, &segments);
    let adaptation =
        Adaptation::new("audio", TrackType::Audio, vec![representation]).expect("adaptation");
    let manifest = single_track_manifest(adaptation, 50.0);
    let net = ScriptedNet::new().with_default_body(20_000);
    let mut h = Harness::start(manifest, TrackType::Audio, net, tick(30.0, 30.0));

    settle().await;

    assert_eq!(h.sink.buffered().as_slice(), &[r(28.0, 42.0), r(46.0, 50.0)]);
    let discontinuity = StreamEvent::Discontinuity {
        track: TrackType::Audio,
        gap_start: 42.0,
        next_time: 46.0,
    };
    let reported = |events: &[StreamEvent]| events.iter().filter(|e| **e == discontinuity).count();
    assert_eq!(reported(&h.drain_events()), 1);
    assert_eq!(
        h.reports.try_recv().ok(),
        Some(TrackReport::Discontinuity {
            track: TrackType::Audio,
            gap_start: 42.0,
            next_time: 46.0,
        })
    );
    assert!(h.wants_end());

    // More ticks do not bring the gap back.
    h.clock.send_replace(tick(31.0, 30.0));
    settle().await;
    assert_eq!(reported(&h.drain_events()), 0);

    h.commands
        .send(OrchestratorCommand::Resume)
        .expect("orchestrator alive");
    settle().await;
    assert_eq!(reported(&h.drain_events()), 1);
    h.stop().await;
}

// Quality

#[tokio::test(start_paused = true)]
async fn upgrade_replaces_segments_ahead_of_playhead() {
    let manifest = single_track_manifest(video_ladder(4.0, 0.0, Some(40.0)), 40.0);
    let net = ScriptedNet::new()
        .with_default_body(40_000)
        .with_latency(Duration::from_millis(50));
    let mut h = Harness::start_with(
        manifest,
        TrackType::Video,
        net,
        MemorySink::new(),
        tick(1.0, 11.0),
        |abr| abr.set_manual_bitrate(TrackType::Video, Some(100_000)),
    );

    settle().await;
    assert_eq!(h.sink.appended(), vec![r(0.0, 4.0), r(4.0, 8.0), r(8.0, 12.0)]);

    // 6.4 Mbit/s measured, so the top rung fits.
    h.abr.set_manual_bitrate(TrackType::Video, None);
    settle().await;

    assert_eq!(
        h.sink.appended()[3..],
        [r(4.0, 8.0), r(8.0, 12.0)],
        "the segment under the playhead stays"
    );
    assert_eq!(h.sink.init_count(), 2);
    let chosen: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::BitrateChanged { representation, .. } => Some(representation.id),
            _ => None,
        })
        .collect();
    assert_eq!(chosen, ["v100k", "v1000k"]);
    assert!(
        h.net
            .requested_urls()
            .iter()
            .all(|url| !url.ends_with("v1000k/1.m4s"))
    );
    h.stop().await;
}

// Seeking

#[tokio::test(start_paused = true)]
async fn seek_outside_in_flight_segment_aborts_it() {
    let net = ScriptedNet::new()
        .with_default_body(20_000)
        .with_latency(Duration::from_secs(2));
    let h = Harness::start(audio_vod(40.0), TrackType::Audio, net, tick(0.0, 4.0));

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.clock.send_replace(ClockTick {
        is_seeking: true,
        ..tick(20.0, 4.0)
    });
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(h.sink.appended(), vec![r(20.0, 24.0)]);
    let urls = h.net.requested_urls();
    assert!(urls.iter().all(|url| !url.ends_with("/1.m4s")), "{urls:?}");
    assert!(urls.iter().any(|url| url.ends_with("/6.m4s")), "{urls:?}");
    assert_eq!(h.abr.in_flight_count(TrackType::Audio), 0);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn seek_inside_in_flight_segment_keeps_it() {
    let net = ScriptedNet::new()
        .with_default_body(20_000)
        .with_latency(Duration::from_secs(1));
    let h = Harness::start(audio_vod(40.0), TrackType::Audio, net, tick(0.0, 4.0));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    h.clock.send_replace(ClockTick {
        is_seeking: true,
        ..tick(2.0, 4.0)
    });
    settle().await;

    assert_eq!(h.sink.appended()[0], r(0.0, 4.0));
    assert_eq!(h.net.request_count("http://cdn.test/audio/a128k/1.m4s"), 1);
    h.stop().await;
}

// Failures

#[tokio::test(start_paused = true)]
async fn rejected_append_stops_the_track() {
    let sink = MemorySink::new();
    sink.fail_next_append(SinkError::Rejected("bad init".into()));
    let net = ScriptedNet::new().with_default_body(20_000);
    let mut h = Harness::start_with(
        audio_vod(40.0),
        TrackType::Audio,
        net,
        sink,
        tick(0.0, 12.0),
        |_| {},
    );

    let report = h.reports.recv().await.expect("report");

    assert_eq!(
        report,
        TrackReport::Failed(StreamError::Buffer {
            track: TrackType::Audio,
            source: BufferError::AppendFailed(SinkError::Rejected("bad init".into())),
        })
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.task.is_finished());
    assert!(h.sink.appended().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_segments_fail_the_track() {
    let net = ScriptedNet::new();
    let mut h = Harness::start(audio_vod(40.0), TrackType::Audio, net, tick(0.0, 4.0));

    let report = h.reports.recv().await.expect("report");

    let TrackReport::Failed(error) = report else {
        panic!("expected a failure, got {report:?}");
    };
    assert_eq!(error.track(), Some(TrackType::Audio));
    assert!(!error.is_fatal(), "restarting the session may help");
    assert!(matches!(error, StreamError::Pipeline { .. }));
}
