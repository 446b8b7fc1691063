use rivulet_manifest::TrackType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    BufferError, BufferResult, BufferSink, ClockReceiver, ClockTick, QueuedSink, RangeSet,
    TimeRange,
};

/// Parts of `buffered` lying strictly outside `[time - behind, time + ahead]`,
/// farthest from `time` first.
pub fn ranges_outside(buffered: &RangeSet, time: f64, behind: f64, ahead: f64) -> Vec<TimeRange> {
    let keep_start = time - behind.max(0.0);
    let keep_end = time + ahead.max(0.0);

    let mut out = Vec::new();
    for range in buffered.iter() {
        if range.start() < keep_start {
            out.extend(TimeRange::new(range.start(), range.end().min(keep_start)).ok());
        }
        if range.end() > keep_end {
            out.extend(TimeRange::new(range.start().max(keep_end), range.end()).ok());
        }
    }
    out.retain(|piece| !piece.contains(time));
    out.sort_by(|a, b| distance(b, time).total_cmp(&distance(a, time)));
    out
}

fn distance(range: &TimeRange, time: f64) -> f64 {
    if range.end() <= time {
        time - range.end()
    } else {
        range.start() - time
    }
}

/// Ever tighter eviction passes after an over-capacity rejection.
///
/// The first pass uses the tick's own window (an infinite side is measured up to the
/// buffered extent); each further pass halves both sides down to half of `floor`.
/// Works directly on the raw sink: the caller must hold its only operation slot.
#[derive(Debug)]
pub struct ForcedEviction {
    time: f64,
    behind: f64,
    ahead: f64,
    min_side: f64,
    exhausted: bool,
}

impl ForcedEviction {
    pub fn new(buffered: &RangeSet, tick: &ClockTick, floor: f64) -> Self {
        let time = tick.current_time;
        let min_side = (floor / 2.0).max(0.0);
        let (Some(first), Some(last)) = (buffered.first(), buffered.last()) else {
            return Self {
                time,
                behind: min_side,
                ahead: min_side,
                min_side,
                exhausted: true,
            };
        };
        Self {
            time,
            behind: finite_or(tick.max_buffer_behind, time - first.start()).max(min_side),
            ahead: finite_or(tick.max_buffer_ahead, last.end() - time).max(min_side),
            min_side,
            exhausted: false,
        }
    }

    /// Narrows the window until a pass evicts something and returns what went.
    ///
    /// `Ok(None)` once the window sits at the floor with nothing left outside it.
    pub async fn next_pass(
        &mut self,
        sink: &dyn BufferSink,
    ) -> BufferResult<Option<Vec<TimeRange>>> {
        while !self.exhausted {
            let (behind, ahead) = (self.behind, self.ahead);
            self.exhausted = behind <= self.min_side && ahead <= self.min_side;
            self.behind = (behind / 2.0).max(self.min_side);
            self.ahead = (ahead / 2.0).max(self.min_side);

            let targets = ranges_outside(&sink.buffered(), self.time, behind, ahead);
            if targets.is_empty() {
                continue;
            }
            for range in &targets {
                sink.remove(*range)
                    .await
                    .map_err(BufferError::RemoveFailed)?;
            }
            debug!(current_time = self.time, behind, ahead, evicted = ?targets, "forced eviction");
            return Ok(Some(targets));
        }
        Ok(None)
    }
}

/// Runs [`ForcedEviction`] passes until one of them evicts something.
pub async fn force_collect(
    sink: &dyn BufferSink,
    tick: &ClockTick,
    floor: f64,
) -> BufferResult<Vec<TimeRange>> {
    ForcedEviction::new(&sink.buffered(), tick, floor)
        .next_pass(sink)
        .await?
        .ok_or(BufferError::NothingToEvict {
            current_time: tick.current_time,
        })
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback.max(0.0) }
}

/// Routine eviction on every clock tick.
pub struct GarbageCollector {
    track: TrackType,
    sink: QueuedSink,
    clock: ClockReceiver,
    cancel: CancellationToken,
}

impl GarbageCollector {
    pub fn new(sink: QueuedSink, clock: ClockReceiver, cancel: CancellationToken) -> Self {
        Self {
            track: sink.track(),
            sink,
            clock,
            cancel,
        }
    }

    /// Collects until cancelled, the clock goes away or the sink is disposed.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                changed = self.clock.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            let tick = *self.clock.borrow_and_update();
            match self.collect(&tick).await {
                Ok(_) => {}
                Err(BufferError::Disposed) => return,
                Err(error) => warn!(track = %self.track, %error, "eviction failed"),
            }
        }
    }

    /// Removes whatever lies outside the tick's keep-window, through the queue.
    pub async fn collect(&self, tick: &ClockTick) -> BufferResult<Vec<TimeRange>> {
        let targets = ranges_outside(
            &self.sink.buffered(),
            tick.current_time,
            tick.max_buffer_behind,
            tick.max_buffer_ahead,
        );
        for range in &targets {
            self.sink.enqueue_remove(*range).await?;
        }
        if !targets.is_empty() {
            debug!(track = %self.track, current_time = tick.current_time, evicted = ?targets, "evicted");
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rstest::*;
    use tokio::sync::watch;

    use super::*;
    use crate::{SinkChunk, SinkError};

    fn r(start: f64, end: f64) -> TimeRange {
        TimeRange::new(start, end).expect("valid range")
    }

    fn pairs(ranges: &[TimeRange]) -> Vec<(f64, f64)> {
        ranges.iter().map(|r| (r.start(), r.end())).collect()
    }

    struct HeldSink(Mutex<RangeSet>);

    #[async_trait]
    impl BufferSink for HeldSink {
        async fn append(&self, chunk: SinkChunk) -> Result<(), SinkError> {
            if let Some(range) = chunk.range() {
                self.0.lock().insert(range);
            }
            Ok(())
        }

        async fn remove(&self, range: TimeRange) -> Result<(), SinkError> {
            self.0.lock().remove(range);
            Ok(())
        }

        fn buffered(&self) -> RangeSet {
            self.0.lock().clone()
        }
    }

    fn held(ranges: &[(f64, f64)]) -> HeldSink {
        HeldSink(Mutex::new(ranges.iter().map(|(s, e)| r(*s, *e)).collect()))
    }

    // Window

    #[rstest]
    #[case::behind_only(&[(0.0, 30.0)], 20.0, 5.0, f64::INFINITY, vec![(0.0, 15.0)])]
    #[case::both_sides(&[(0.0, 30.0)], 20.0, 5.0, 5.0, vec![(0.0, 15.0), (25.0, 30.0)])]
    #[case::farthest_first(&[(0.0, 2.0), (10.0, 12.0), (40.0, 50.0)], 20.0, 1.0, 10.0, vec![(40.0, 50.0), (0.0, 2.0), (10.0, 12.0)])]
    #[case::everything_kept(&[(10.0, 30.0)], 20.0, 60.0, f64::INFINITY, vec![])]
    fn outside_window(
        #[case] buffered: &[(f64, f64)],
        #[case] time: f64,
        #[case] behind: f64,
        #[case] ahead: f64,
        #[case] expected: Vec<(f64, f64)>,
    ) {
        let set: RangeSet = buffered.iter().map(|(s, e)| r(*s, *e)).collect();
        assert_eq!(pairs(&ranges_outside(&set, time, behind, ahead)), expected);
    }

    #[rstest]
    #[case(0.0)]
    #[case(7.5)]
    #[case(29.9)]
    fn playhead_range_is_never_removed(#[case] time: f64) {
        let set: RangeSet = [r(0.0, 30.0)].into_iter().collect();
        for piece in ranges_outside(&set, time, 0.0, 0.0) {
            assert!(!piece.contains(time));
        }
    }

    // Forced

    #[tokio::test]
    async fn forced_uses_configured_window_first() {
        let sink = held(&[(0.0, 30.0)]);
        let tick = ClockTick {
            max_buffer_behind: 5.0,
            ..ClockTick::at(20.0)
        };

        let evicted = force_collect(&sink, &tick, 2.0).await.expect("evicted");

        assert_eq!(pairs(&evicted), vec![(0.0, 15.0)]);
        assert_eq!(sink.buffered().as_slice(), &[r(15.0, 30.0)]);
    }

    #[tokio::test]
    async fn forced_halves_window_until_something_goes() {
        let sink = held(&[(0.0, 30.0)]);
        let evicted = force_collect(&sink, &ClockTick::at(20.0), 2.0)
            .await
            .expect("evicted");

        // Unbounded window spans [0, 30], then halves to [10, 25].
        assert_eq!(pairs(&evicted), vec![(0.0, 10.0), (25.0, 30.0)]);
    }

    #[tokio::test]
    async fn forced_gives_up_at_floor() {
        let sink = held(&[(19.5, 20.5)]);
        let result = force_collect(&sink, &ClockTick::at(20.0), 2.0).await;
        assert_eq!(
            result,
            Err(BufferError::NothingToEvict { current_time: 20.0 })
        );
    }

    #[tokio::test]
    async fn successive_passes_keep_narrowing() {
        let sink = held(&[(0.0, 40.0)]);
        let tick = ClockTick {
            max_buffer_behind: 16.0,
            max_buffer_ahead: 16.0,
            ..ClockTick::at(20.0)
        };
        let mut eviction = ForcedEviction::new(&sink.buffered(), &tick, 2.0);

        let first = eviction.next_pass(&sink).await.expect("pass");
        let second = eviction.next_pass(&sink).await.expect("pass");

        assert_eq!(first.as_deref().map(pairs), Some(vec![(0.0, 4.0), (36.0, 40.0)]));
        assert_eq!(second.as_deref().map(pairs), Some(vec![(4.0, 12.0), (28.0, 36.0)]));
        assert_eq!(sink.buffered().as_slice(), &[r(12.0, 28.0)]);
    }

    #[tokio::test]
    async fn passes_run_out_at_floor() {
        let sink = held(&[(10.0, 30.0)]);
        let mut eviction = ForcedEviction::new(&sink.buffered(), &ClockTick::at(20.0), 2.0);

        let mut passes = 0;
        while eviction.next_pass(&sink).await.expect("pass").is_some() {
            passes += 1;
        }

        assert!(passes > 0);
        assert_eq!(sink.buffered().as_slice(), &[r(19.0, 21.0)]);
    }

    #[tokio::test]
    async fn forced_on_empty_sink_fails() {
        let sink = held(&[]);
        assert!(force_collect(&sink, &ClockTick::at(0.0), 2.0).await.is_err());
    }

    // Routine

    #[tokio::test(start_paused = true)]
    async fn routine_collection_follows_clock() {
        let sink = Arc::new(held(&[(0.0, 100.0)]));
        let (clock_tx, clock_rx) = watch::channel(ClockTick::at(0.0));
        let queued = QueuedSink::new(TrackType::Audio, sink.clone(), clock_rx.clone(), 2.0);
        let cancel = CancellationToken::new();
        let gc = GarbageCollector::new(queued.clone(), clock_rx, cancel.clone());
        let task = tokio::spawn(gc.run());

        clock_tx.send_replace(ClockTick {
            max_buffer_behind: 10.0,
            max_buffer_ahead: 30.0,
            ..ClockTick::at(50.0)
        });
        while sink.buffered().as_slice() != [r(40.0, 80.0)] {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        cancel.cancel();
        task.await.expect("gc task");
    }
}
