use std::{sync::Arc, time::Duration};

use rivulet_buffer::TimeRange;
use rivulet_events::IssueCode;
use rivulet_manifest::{Adaptation, Manifest, TrackType};
use rivulet_net::RetryPolicy;
use rivulet_stream::{
    BufferOptions, ControllerState, EngineConfig, ReadyState, StartAt, StreamController, StreamEvent,
    StreamHandle,
};
use rivulet_test_utils::{
    MemorySurface, ScriptedNet, init_tracing, single_track_manifest, timeline_representation,
    vod_manifest,
};
use tokio::sync::broadcast;

const DEADLINE: Duration = Duration::from_secs(120);

struct Session {
    handle: StreamHandle,
    events: broadcast::Receiver<StreamEvent>,
    surface: Arc<MemorySurface>,
    net: Arc<ScriptedNet>,
}

fn start(manifest: Manifest, config: EngineConfig, surface: MemorySurface) -> Session {
    init_tracing();
    let surface = Arc::new(surface);
    let net = Arc::new(
        ScriptedNet::new()
            .with_default_body(20_000)
            .with_latency(Duration::from_millis(20)),
    );
    let controller =
        StreamController::new(config, Arc::new(manifest), surface.clone(), net.clone());
    let events = controller.subscribe();
    Session {
        handle: controller.start(),
        events,
        surface,
        net,
    }
}

fn quick_restarts() -> EngineConfig {
    EngineConfig::default().with_session_retry(RetryPolicy::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(10),
    ))
}

impl Session {
    async fn reach(&self, wanted: ControllerState) -> ControllerState {
        tokio::time::timeout(DEADLINE, self.handle.wait_for_state(|s| s == wanted || s.is_terminal()))
            .await
            .expect("state reached in time")
    }

    /// Events up to and including the first one matching `until`.
    async fn events_until(&mut self, mut until: impl FnMut(&StreamEvent) -> bool) -> Vec<StreamEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(DEADLINE, self.events.recv())
                .await
                .expect("event in time")
                .expect("event bus open");
            let done = until(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn drain(&mut self) -> Vec<StreamEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

fn position(events: &[StreamEvent], wanted: impl Fn(&StreamEvent) -> bool) -> usize {
    events
        .iter()
        .position(wanted)
        .unwrap_or_else(|| panic!("event missing from {events:?}"))
}

// Lifecycle

#[tokio::test(start_paused = true)]
async fn vod_plays_through_to_end_of_stream() {
    let mut s = start(
        vod_manifest(20.0, 4.0),
        EngineConfig::default(),
        MemorySurface::default(),
    );

    let events = s.events_until(|e| *e == StreamEvent::Ended).await;

    assert_eq!(
        events[0],
        StreamEvent::ManifestReady {
            manifest_id: "vod".into(),
            periods: 1,
            duration: Some(20.0),
        }
    );
    assert!(position(&events, |e| *e == StreamEvent::Loaded) > 0);
    assert!(!events.iter().any(StreamEvent::is_terminal));
    assert_eq!(s.reach(ControllerState::Ended).await, ControllerState::Ended);

    let full = TimeRange::new(0.0, 20.0).expect("range");
    for track in [TrackType::Video, TrackType::Audio] {
        assert_eq!(s.handle.buffered(track).as_slice(), &[full], "{track}");
    }
    assert_eq!(s.surface.duration(), Some(20.0));
    assert_eq!(s.surface.end_signals(), 1);
    assert_eq!(s.surface.sinks_created(), 2);
    assert!(s.surface.seeks().is_empty());
    assert_eq!(
        s.handle
            .chosen_representation(TrackType::Video)
            .map(|r| r.id),
        Some("v1000k".to_string())
    );
    s.handle.dispose();
}

#[tokio::test(start_paused = true)]
async fn waits_for_surface_before_initializing() {
    // Longer than the wanted buffer, so the session stays `Running`.
    let s = start(
        vod_manifest(60.0, 4.0),
        EngineConfig::default(),
        MemorySurface::new(ReadyState::Closed),
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(s.handle.state(), ControllerState::WaitingSurfaceReady);
    assert_eq!(s.surface.sinks_created(), 0);
    assert_eq!(s.net.request_count("http://cdn.test/video/v100k/init.mp4"), 0);

    s.surface.set_ready_state(ReadyState::Open);

    assert_eq!(s.reach(ControllerState::Running).await, ControllerState::Running);
    s.handle.dispose();
}

#[tokio::test(start_paused = true)]
async fn starts_at_requested_position() {
    let config = EngineConfig::default()
        .with_start_at(StartAt::FromEnd(8.0))
        .with_buffer(BufferOptions::default().with_wanted_buffer_ahead(8.0));
    let mut s = start(vod_manifest(20.0, 4.0), config, MemorySurface::default());

    s.events_until(|e| *e == StreamEvent::Ended).await;

    assert_eq!(s.surface.seeks(), vec![12.0]);
    let requested = s.net.requested_urls();
    assert!(
        requested.iter().all(|url| !url.ends_with("/1.m4s")),
        "nothing before the start position: {requested:?}"
    );
    s.handle.dispose();
}

// Discontinuity

#[tokio::test(start_paused = true)]
async fn playhead_jumps_over_missing_media() {
    let representation = timeline_representation(
        TrackType::Audio,
        "a",
        128_000,
        &[(0.0, 4.0), (4.0, 4.0), (12.0, 4.0), (16.0, 4.0)],
    );
    let adaptation =
        Adaptation::new("audio", TrackType::Audio, vec![representation]).expect("adaptation");
    let mut s = start(
        single_track_manifest(adaptation, 20.0),
        EngineConfig::default(),
        MemorySurface::default(),
    );

    s.events_until(|e| matches!(e, StreamEvent::Discontinuity { .. }))
        .await;
    assert!(s.surface.seeks().is_empty(), "playhead is still before the gap");

    s.surface.set_time(8.0);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(s.surface.seeks(), vec![12.0]);
    assert_eq!(
        s.handle.buffered(TrackType::Audio).as_slice(),
        &[
            TimeRange::new(0.0, 8.0).expect("range"),
            TimeRange::new(12.0, 20.0).expect("range"),
        ]
    );
    s.handle.dispose();
}

// Failures

#[tokio::test(start_paused = true)]
async fn restarts_then_gives_up_when_sinks_cannot_be_created() {
    let surface = MemorySurface::default();
    surface.fail_sink_creation(true);
    let mut s = start(vod_manifest(20.0, 4.0), quick_restarts(), surface);

    let events = s.events_until(StreamEvent::is_terminal).await;

    assert_eq!(s.handle.state(), ControllerState::Failed);
    let manifests = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ManifestReady { .. }))
        .count();
    assert_eq!(manifests, 1, "manifest is reused across restarts");
    let warnings: Vec<IssueCode> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Warning(issue) => Some(issue.code),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, [IssueCode::Surface, IssueCode::Surface]);
    let Some(StreamEvent::FatalError(issue)) = events.last() else {
        panic!("expected a fatal error last, got {events:?}");
    };
    assert_eq!(issue.code, IssueCode::Unrecoverable);
    assert!(issue.message.contains("3 session attempts"), "{}", issue.message);
}

#[tokio::test(start_paused = true)]
async fn recovers_when_a_restart_succeeds() {
    let surface = MemorySurface::default();
    surface.fail_sink_creation(true);
    let mut s = start(vod_manifest(20.0, 4.0), quick_restarts(), surface);

    s.events_until(|e| matches!(e, StreamEvent::Warning(_))).await;
    s.surface.fail_sink_creation(false);

    s.events_until(|e| *e == StreamEvent::Ended).await;
    assert_eq!(s.handle.state(), ControllerState::Ended);
    s.handle.dispose();
}

#[tokio::test(start_paused = true)]
async fn unreachable_start_position_is_fatal_without_restart() {
    let config = quick_restarts().with_start_at(StartAt::Position(90.0));
    let mut s = start(vod_manifest(20.0, 4.0), config, MemorySurface::default());

    let events = s.events_until(StreamEvent::is_terminal).await;

    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Warning(_))));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::FatalError(issue)) if issue.code == IssueCode::StartingTimeNotFound
    ));
    assert_eq!(s.handle.state(), ControllerState::Failed);
    assert_eq!(s.surface.sinks_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn refused_end_of_stream_fails_the_session() {
    let surface = MemorySurface::default();
    surface.refuse_end_of_stream(true);
    let config = quick_restarts().with_end_of_stream_retry(RetryPolicy::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(10),
    ));
    let mut s = start(vod_manifest(8.0, 4.0), config, surface);

    let events = s.events_until(StreamEvent::is_terminal).await;

    assert!(matches!(
        events.last(),
        Some(StreamEvent::FatalError(issue)) if issue.code == IssueCode::EndOfStreamRejected
    ));
    assert_eq!(s.surface.end_signals(), 0);
}

// Dispose

#[tokio::test(start_paused = true)]
async fn dispose_is_idempotent_and_stops_downloads() {
    let config = EngineConfig::default()
        .with_buffer(BufferOptions::default().with_wanted_buffer_ahead(8.0));
    let mut s = start(vod_manifest(60.0, 4.0), config, MemorySurface::default());
    assert_eq!(s.reach(ControllerState::Running).await, ControllerState::Running);

    s.handle.dispose();
    s.handle.dispose();
    let requests = s.net.requests().len();

    s.surface.set_time(30.0);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(s.handle.state(), ControllerState::Disposed);
    assert_eq!(s.net.requests().len(), requests);
    assert!(!s.drain().iter().any(StreamEvent::is_terminal));
}
