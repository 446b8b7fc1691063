//! Scriptable [`PlaybackSurface`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rivulet_buffer::BufferSink;
use rivulet_manifest::{Representation, TrackType};
use rivulet_stream::{FrameCounters, PlaybackSurface, ReadyState, SurfaceError};
use tokio::sync::watch;

use crate::MemorySink;

/// Surface whose clock, ready state and frame counters are driven by the test.
///
/// Sinks it creates are [`MemorySink`]s, kept for inspection; a restarted session gets fresh
/// ones. A successful end-of-stream signal moves it to [`ReadyState::Ended`].
pub struct MemorySurface {
    ready: watch::Sender<ReadyState>,
    time: Mutex<f64>,
    seeking: AtomicBool,
    frames: Mutex<Option<FrameCounters>>,
    duration: Mutex<Option<f64>>,
    sink_capacity: Option<f64>,
    sinks: Mutex<Vec<(TrackType, Arc<MemorySink>)>>,
    seeks: Mutex<Vec<f64>>,
    end_signals: AtomicUsize,
    refuse_end: AtomicBool,
    fail_sink_creation: AtomicBool,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new(ReadyState::Open)
    }
}

impl MemorySurface {
    #[must_use]
    pub fn new(ready: ReadyState) -> Self {
        Self {
            ready: watch::Sender::new(ready),
            time: Mutex::new(0.0),
            seeking: AtomicBool::new(false),
            frames: Mutex::new(None),
            duration: Mutex::new(None),
            sink_capacity: None,
            sinks: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            end_signals: AtomicUsize::new(0),
            refuse_end: AtomicBool::new(false),
            fail_sink_creation: AtomicBool::new(false),
        }
    }

    /// Sinks refuse appends past `seconds` of media.
    #[must_use]
    pub fn with_sink_capacity(mut self, seconds: f64) -> Self {
        self.sink_capacity = Some(seconds);
        self
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        self.ready.send_replace(state);
    }

    pub fn set_time(&self, time: f64) {
        *self.time.lock() = time;
    }

    pub fn set_seeking(&self, seeking: bool) {
        self.seeking.store(seeking, Ordering::SeqCst);
    }

    pub fn set_frames(&self, decoded: u64, dropped: u64) {
        *self.frames.lock() = Some(FrameCounters { decoded, dropped });
    }

    pub fn refuse_end_of_stream(&self, refuse: bool) {
        self.refuse_end.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_sink_creation(&self, fail: bool) {
        self.fail_sink_creation.store(fail, Ordering::SeqCst);
    }

    pub fn duration(&self) -> Option<f64> {
        *self.duration.lock()
    }

    /// Most recent sink created for `track`.
    pub fn sink(&self, track: TrackType) -> Option<Arc<MemorySink>> {
        self.sinks
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| *t == track)
            .map(|(_, sink)| Arc::clone(sink))
    }

    pub fn sinks_created(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().clone()
    }

    pub fn end_signals(&self) -> usize {
        self.end_signals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSurface for MemorySurface {
    fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    async fn wait_ready(&self) -> Result<(), SurfaceError> {
        let mut rx = self.ready.subscribe();
        rx.wait_for(|state| *state != ReadyState::Closed)
            .await
            .map(|_| ())
            .map_err(|_| SurfaceError::Closed)
    }

    fn set_duration(&self, duration: f64) -> Result<(), SurfaceError> {
        *self.duration.lock() = Some(duration);
        Ok(())
    }

    fn create_sink(
        &self,
        track: TrackType,
        _representation: &Representation,
    ) -> Result<Arc<dyn BufferSink>, SurfaceError> {
        if self.fail_sink_creation.load(Ordering::SeqCst) {
            return Err(SurfaceError::Rejected(format!("no {track} sink")));
        }
        let sink = match self.sink_capacity {
            Some(seconds) => MemorySink::new().with_capacity(seconds),
            None => MemorySink::new(),
        };
        let sink = Arc::new(sink);
        self.sinks.lock().push((track, Arc::clone(&sink)));
        Ok(sink)
    }

    fn current_time(&self) -> f64 {
        *self.time.lock()
    }

    fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::SeqCst)
    }

    fn seek(&self, time: f64) {
        self.seeks.lock().push(time);
        self.set_time(time);
    }

    fn frame_counters(&self) -> Option<FrameCounters> {
        *self.frames.lock()
    }

    fn signal_end(&self) -> Result<(), SurfaceError> {
        if self.refuse_end.load(Ordering::SeqCst) {
            return Err(SurfaceError::Rejected("source buffer updating".into()));
        }
        self.end_signals.fetch_add(1, Ordering::SeqCst);
        self.ready.send_replace(ReadyState::Ended);
        Ok(())
    }
}
