use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use rivulet_manifest::TrackType;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    BufferError, BufferResult, BufferSink, ClockReceiver, ClockTick, RangeSet, SinkChunk,
    SinkError, TimeRange, gc::ForcedEviction,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkState {
    #[default]
    Idle,
    Appending,
    Removing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStatus {
    pub state: SinkState,
    /// Operations submitted and not yet completed, the running one included.
    pub pending: usize,
    pub disposed: bool,
}

impl SinkStatus {
    pub fn is_idle(&self) -> bool {
        self.state == SinkState::Idle && self.pending == 0
    }
}

enum Op {
    Append(SinkChunk),
    Remove(TimeRange),
}

struct Pending {
    op: Op,
    reply: oneshot::Sender<BufferResult<()>>,
}

struct Shared {
    track: TrackType,
    sink: Mutex<Option<Arc<dyn BufferSink>>>,
    status: watch::Sender<SinkStatus>,
    cancel: CancellationToken,
}

impl Shared {
    fn current_sink(&self) -> Option<Arc<dyn BufferSink>> {
        self.sink.lock().clone()
    }
}

/// FIFO front of a [`BufferSink`].
///
/// Submissions are queued and executed one at a time by a background task, in order.
/// An append rejected for capacity triggers a forced eviction around the current clock
/// position, narrowed until at least the chunk's duration is freed, and is retried once.
#[derive(Clone)]
pub struct QueuedSink {
    tx: mpsc::UnboundedSender<Pending>,
    shared: Arc<Shared>,
}

impl QueuedSink {
    /// Wraps `sink` and spawns the draining task on the current runtime.
    pub fn new(
        track: TrackType,
        sink: Arc<dyn BufferSink>,
        clock: ClockReceiver,
        gc_floor: f64,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SinkStatus::default());
        let shared = Arc::new(Shared {
            track,
            sink: Mutex::new(Some(sink)),
            status,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(drain(Arc::clone(&shared), rx, clock, gc_floor));

        Self { tx, shared }
    }

    /// Queues an append. The returned future resolves once this append has completed.
    pub fn enqueue_append(
        &self,
        chunk: SinkChunk,
    ) -> impl Future<Output = BufferResult<()>> + Send + 'static {
        let reply = self.submit(Op::Append(chunk));
        async move { reply.await.unwrap_or(Err(BufferError::Disposed)) }
    }

    /// Queues a removal. The returned future resolves once this removal has completed.
    pub fn enqueue_remove(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = BufferResult<()>> + Send + 'static {
        let reply = self.submit(Op::Remove(range));
        async move { reply.await.unwrap_or(Err(BufferError::Disposed)) }
    }

    fn submit(&self, op: Op) -> oneshot::Receiver<BufferResult<()>> {
        let (reply, rx) = oneshot::channel();
        if self.shared.cancel.is_cancelled() {
            let _ = reply.send(Err(BufferError::Disposed));
            return rx;
        }

        self.shared.status.send_modify(|s| s.pending += 1);
        if let Err(mpsc::error::SendError(pending)) = self.tx.send(Pending { op, reply }) {
            self.shared
                .status
                .send_modify(|s| s.pending = s.pending.saturating_sub(1));
            let _ = pending.reply.send(Err(BufferError::Disposed));
        }
        rx
    }

    pub fn track(&self) -> TrackType {
        self.shared.track
    }

    /// What the wrapped sink holds, empty once disposed.
    pub fn buffered(&self) -> RangeSet {
        self.shared
            .current_sink()
            .map(|sink| sink.buffered())
            .unwrap_or_default()
    }

    pub fn status(&self) -> watch::Receiver<SinkStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.status.borrow().is_idle()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Rejects everything pending or submitted later and releases the wrapped sink.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        debug!(track = %self.shared.track, "disposing queued sink");
        self.shared.cancel.cancel();
        self.shared.sink.lock().take();
        self.shared.status.send_modify(|s| s.disposed = true);
    }
}

async fn drain(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    clock: ClockReceiver,
    gc_floor: f64,
) {
    loop {
        let pending = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            pending = rx.recv() => match pending {
                Some(pending) => pending,
                None => return,
            },
        };

        let Some(sink) = shared.current_sink() else {
            let _ = pending.reply.send(Err(BufferError::Disposed));
            break;
        };

        let state = match pending.op {
            Op::Append(_) => SinkState::Appending,
            Op::Remove(_) => SinkState::Removing,
        };
        shared.status.send_modify(|s| s.state = state);

        let exec = execute(shared.track, sink.as_ref(), pending.op, &clock, gc_floor);
        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => Err(BufferError::Disposed),
            result = exec => result,
        };
        drop(sink);

        shared.status.send_modify(|s| {
            s.state = SinkState::Idle;
            s.pending = s.pending.saturating_sub(1);
        });
        let _ = pending.reply.send(result);
    }

    rx.close();
    while let Ok(pending) = rx.try_recv() {
        let _ = pending.reply.send(Err(BufferError::Disposed));
    }
    shared.status.send_modify(|s| {
        s.state = SinkState::Idle;
        s.pending = 0;
    });
}

async fn execute(
    track: TrackType,
    sink: &dyn BufferSink,
    op: Op,
    clock: &ClockReceiver,
    gc_floor: f64,
) -> BufferResult<()> {
    match op {
        Op::Remove(range) => {
            trace!(%track, ?range, "sink remove");
            sink.remove(range).await.map_err(BufferError::RemoveFailed)
        }
        Op::Append(chunk) => {
            trace!(%track, range = ?chunk.range(), bytes = chunk.data.len(), "sink append");
            match sink.append(chunk.clone()).await {
                Ok(()) => Ok(()),
                Err(SinkError::OverCapacity) => {
                    let tick = *clock.borrow();
                    warn!(%track, current_time = tick.current_time, "sink over capacity, forcing eviction");
                    let needed = chunk.range().map_or(0.0, |range| range.duration());
                    let freed = evict_at_least(sink, &tick, gc_floor, needed).await;
                    debug!(%track, freed, needed, "forced eviction done");
                    sink.append(chunk).await.map_err(|error| match error {
                        SinkError::OverCapacity => BufferError::BufferFull(error),
                        other => BufferError::AppendFailed(other),
                    })
                }
                Err(error) => Err(BufferError::AppendFailed(error)),
            }
        }
    }
}

/// Runs forced eviction passes until `needed` seconds are gone or nothing more can go.
/// Returns the seconds freed; at least one pass runs.
async fn evict_at_least(sink: &dyn BufferSink, tick: &ClockTick, floor: f64, needed: f64) -> f64 {
    let mut eviction = ForcedEviction::new(&sink.buffered(), tick, floor);
    let mut freed = 0.0;
    loop {
        match eviction.next_pass(sink).await {
            Ok(Some(evicted)) => {
                freed += evicted.iter().map(TimeRange::duration).sum::<f64>();
                if freed >= needed {
                    return freed;
                }
            }
            Ok(None) => return freed,
            Err(error) => {
                warn!(%error, "forced eviction failed");
                return freed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use async_trait::async_trait;
    use bytes::Bytes;
    use rstest::*;

    use super::*;

    fn r(start: f64, end: f64) -> TimeRange {
        TimeRange::new(start, end).expect("valid range")
    }

    /// Sink answering appends from a script, recording the order it saw operations in.
    #[derive(Default)]
    struct ScriptSink {
        append_results: Mutex<VecDeque<Result<(), SinkError>>>,
        log: Mutex<Vec<String>>,
        buffered: Mutex<RangeSet>,
    }

    impl ScriptSink {
        fn with_appends(results: impl IntoIterator<Item = Result<(), SinkError>>) -> Arc<Self> {
            Arc::new(Self {
                append_results: Mutex::new(results.into_iter().collect()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl BufferSink for ScriptSink {
        async fn append(&self, chunk: SinkChunk) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.append_results.lock().pop_front().unwrap_or(Ok(()));
            self.log.lock().push(format!("append {:?}", chunk.range()));
            if let (Ok(()), Some(range)) = (&result, chunk.range()) {
                self.buffered.lock().insert(range);
            }
            result
        }

        async fn remove(&self, range: TimeRange) -> Result<(), SinkError> {
            self.log.lock().push(format!("remove {range:?}"));
            self.buffered.lock().remove(range);
            Ok(())
        }

        fn buffered(&self) -> RangeSet {
            self.buffered.lock().clone()
        }
    }

    fn queued(sink: Arc<ScriptSink>, tick: ClockTick) -> (QueuedSink, watch::Sender<ClockTick>) {
        let (clock_tx, clock_rx) = watch::channel(tick);
        let queued = QueuedSink::new(TrackType::Video, sink, clock_rx, 2.0);
        (queued, clock_tx)
    }

    fn media(start: f64, end: f64) -> SinkChunk {
        SinkChunk::media(Bytes::from_static(b"media"), r(start, end))
    }

    #[rstest]
    #[case::other_error(vec![Err(SinkError::Rejected("codec".into()))], BufferError::AppendFailed(SinkError::Rejected("codec".into())))]
    #[case::still_full(vec![Err(SinkError::OverCapacity), Err(SinkError::OverCapacity)], BufferError::BufferFull(SinkError::OverCapacity))]
    #[case::fails_differently_on_retry(vec![Err(SinkError::OverCapacity), Err(SinkError::Busy)], BufferError::AppendFailed(SinkError::Busy))]
    #[tokio::test(start_paused = true)]
    async fn append_failures_are_classified(
        #[case] script: Vec<Result<(), SinkError>>,
        #[case] expected: BufferError,
    ) {
        let sink = ScriptSink::with_appends(script);
        let (queued, _clock) = queued(Arc::clone(&sink), ClockTick::at(0.0));

        let result = queued.enqueue_append(media(0.0, 4.0)).await;

        assert_eq!(result, Err(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn over_capacity_append_is_retried_after_eviction() {
        let sink = ScriptSink::with_appends([Ok(()), Err(SinkError::OverCapacity)]);
        let tick = ClockTick {
            max_buffer_behind: 2.0,
            ..ClockTick::at(10.0)
        };
        let (queued, _clock) = queued(Arc::clone(&sink), tick);

        queued.enqueue_append(media(0.0, 10.0)).await.expect("first append");
        queued.enqueue_append(media(10.0, 14.0)).await.expect("retried append");

        assert_eq!(
            *sink.log.lock(),
            vec![
                "append Some([0, 10))".to_string(),
                "append Some([10, 14))".to_string(),
                "remove [0, 8)".to_string(),
                "append Some([10, 14))".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_narrows_until_the_chunk_fits() {
        let sink = ScriptSink::with_appends([Ok(()), Err(SinkError::OverCapacity)]);
        let tick = ClockTick {
            max_buffer_behind: 14.0,
            ..ClockTick::at(16.0)
        };
        let (queued, _clock) = queued(Arc::clone(&sink), tick);

        queued.enqueue_append(media(0.0, 20.0)).await.expect("first append");
        queued
            .enqueue_append(media(20.0, 24.0))
            .await
            .expect("retried append");

        // Two seconds from the first pass are not enough room for four.
        assert_eq!(
            *sink.log.lock(),
            vec![
                "append Some([0, 20))".to_string(),
                "append Some([20, 24))".to_string(),
                "remove [0, 2)".to_string(),
                "remove [2, 9)".to_string(),
                "remove [18, 20)".to_string(),
                "append Some([20, 24))".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn operations_run_in_submission_order() {
        let sink = ScriptSink::with_appends([Err(SinkError::Rejected("bad".into()))]);
        let (queued, _clock) = queued(Arc::clone(&sink), ClockTick::at(0.0));

        let first = queued.enqueue_append(media(0.0, 4.0));
        let second = queued.enqueue_remove(r(0.0, 1.0));
        let third = queued.enqueue_append(media(4.0, 8.0));

        let (first, second, third) = tokio::join!(first, second, third);
        assert!(first.is_err());
        assert!(second.is_ok());
        assert!(third.is_ok());
        assert_eq!(
            *sink.log.lock(),
            vec![
                "append Some([0, 4))".to_string(),
                "remove [0, 1)".to_string(),
                "append Some([4, 8))".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_reflects_pending_work() {
        let sink = ScriptSink::with_appends([]);
        let (queued, _clock) = queued(sink, ClockTick::at(0.0));
        assert!(queued.is_idle());

        let op = queued.enqueue_append(media(0.0, 4.0));
        assert!(!queued.is_idle());
        op.await.expect("append");
        assert!(queued.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_rejects_pending_and_future_operations() {
        let sink = ScriptSink::with_appends([]);
        let (queued, _clock) = queued(Arc::clone(&sink), ClockTick::at(0.0));

        let running = queued.enqueue_append(media(0.0, 4.0));
        let waiting = queued.enqueue_append(media(4.0, 8.0));
        tokio::task::yield_now().await;
        queued.dispose();
        queued.dispose();

        assert_eq!(running.await, Err(BufferError::Disposed));
        assert_eq!(waiting.await, Err(BufferError::Disposed));
        assert_eq!(
            queued.enqueue_remove(r(0.0, 1.0)).await,
            Err(BufferError::Disposed)
        );
        assert!(queued.buffered().is_empty());
        assert!(queued.status().borrow().disposed);
    }
}
