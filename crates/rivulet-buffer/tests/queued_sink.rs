use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rivulet_buffer::{
    BufferError, BufferSink, ClockTick, QueuedSink, SinkChunk, SinkError, TimeRange,
};
use rivulet_manifest::TrackType;
use rivulet_test_utils::{MemorySink, SinkOp, init_tracing};
use rstest::{fixture, rstest};
use tokio::sync::watch;

fn r(start: f64, end: f64) -> TimeRange {
    TimeRange::new(start, end).expect("valid range")
}

fn media(start: f64, end: f64) -> SinkChunk {
    SinkChunk::media(Bytes::from_static(b"moof"), r(start, end))
}

fn queued(sink: &Arc<MemorySink>, tick: ClockTick) -> (QueuedSink, watch::Sender<ClockTick>) {
    let (clock_tx, clock_rx) = watch::channel(tick);
    let queued = QueuedSink::new(TrackType::Video, sink.clone(), clock_rx, 2.0);
    (queued, clock_tx)
}

#[fixture]
fn sink() -> Arc<MemorySink> {
    init_tracing();
    Arc::new(MemorySink::new().with_op_delay(Duration::from_millis(10)))
}

// Ordering

#[rstest]
#[tokio::test(start_paused = true)]
async fn operations_run_one_at_a_time_in_submission_order(sink: Arc<MemorySink>) {
    let (queued, _clock) = queued(&sink, ClockTick::at(0.0));

    let results = tokio::join!(
        queued.enqueue_append(media(0.0, 4.0)),
        queued.enqueue_append(media(4.0, 8.0)),
        queued.enqueue_remove(r(0.0, 2.0)),
        queued.enqueue_append(media(8.0, 12.0)),
        queued.enqueue_remove(r(10.0, 12.0)),
    );
    let results = [results.0, results.1, results.2, results.3, results.4];

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(
        sink.ops(),
        vec![
            SinkOp::Append(r(0.0, 4.0)),
            SinkOp::Append(r(4.0, 8.0)),
            SinkOp::Remove(r(0.0, 2.0)),
            SinkOp::Append(r(8.0, 12.0)),
            SinkOp::Remove(r(10.0, 12.0)),
        ]
    );
    assert_eq!(sink.buffered().as_slice(), &[r(2.0, 10.0)]);
    sink.assert_exclusive();
    assert!(queued.is_idle());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn init_chunks_do_not_touch_buffered_ranges(sink: Arc<MemorySink>) {
    let (queued, _clock) = queued(&sink, ClockTick::at(0.0));

    queued
        .enqueue_append(SinkChunk::init(Bytes::from_static(b"ftypmoov")))
        .await
        .expect("init appended");

    assert_eq!(sink.init_count(), 1);
    assert!(queued.buffered().is_empty());
}

// Capacity

#[tokio::test(start_paused = true)]
async fn over_capacity_append_evicts_behind_and_retries() {
    let sink = Arc::new(MemorySink::new().with_capacity(30.0).with_buffered(&[(0.0, 30.0)]));
    let tick = ClockTick {
        max_buffer_behind: 5.0,
        ..ClockTick::at(20.0)
    };
    let (queued, _clock) = queued(&sink, tick);

    queued
        .enqueue_append(media(30.0, 34.0))
        .await
        .expect("retried append");

    assert_eq!(
        sink.ops(),
        vec![SinkOp::Remove(r(0.0, 15.0)), SinkOp::Append(r(30.0, 34.0))]
    );
    assert_eq!(queued.buffered().as_slice(), &[r(15.0, 34.0)]);
}

#[tokio::test(start_paused = true)]
async fn still_full_after_eviction_is_buffer_full() {
    let sink = Arc::new(MemorySink::new().with_capacity(10.0).with_buffered(&[(15.0, 25.0)]));
    let tick = ClockTick {
        max_buffer_behind: 5.0,
        ..ClockTick::at(20.0)
    };
    let (queued, _clock) = queued(&sink, tick);

    let result = queued.enqueue_append(media(25.0, 35.0)).await;

    assert_eq!(result, Err(BufferError::BufferFull(SinkError::OverCapacity)));
    assert!(result.expect_err("full").is_fatal());
    // Halved window [17.5, 22.5] kept around the playhead.
    assert_eq!(queued.buffered().as_slice(), &[r(17.5, 22.5)]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn rejected_append_is_fatal(sink: Arc<MemorySink>) {
    let (queued, _clock) = queued(&sink, ClockTick::at(0.0));
    sink.fail_next_append(SinkError::Rejected("unsupported codec".into()));

    let result = queued.enqueue_append(media(0.0, 4.0)).await;

    assert_eq!(
        result,
        Err(BufferError::AppendFailed(SinkError::Rejected(
            "unsupported codec".into()
        )))
    );
    // The queue keeps serving later operations.
    queued
        .enqueue_append(media(4.0, 8.0))
        .await
        .expect("next append");
}

// Disposal

#[rstest]
#[tokio::test(start_paused = true)]
async fn dispose_rejects_pending_and_later_operations(sink: Arc<MemorySink>) {
    let (queued, _clock) = queued(&sink, ClockTick::at(0.0));

    let first = queued.enqueue_append(media(0.0, 4.0));
    let second = queued.enqueue_append(media(4.0, 8.0));
    queued.dispose();
    queued.dispose();

    assert_eq!(first.await, Err(BufferError::Disposed));
    assert_eq!(second.await, Err(BufferError::Disposed));
    assert_eq!(
        queued.enqueue_remove(r(0.0, 1.0)).await,
        Err(BufferError::Disposed)
    );
    assert!(queued.is_disposed());
    assert!(queued.buffered().is_empty());
}
