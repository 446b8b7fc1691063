//! In-memory [`BufferSink`] that behaves like a strict media source buffer.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rivulet_buffer::{BufferSink, ChunkKind, RangeSet, SinkChunk, SinkError, TimeRange};

/// An operation the sink accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkOp {
    Init { bytes: usize },
    Append(TimeRange),
    Remove(TimeRange),
}

#[derive(Default)]
struct State {
    buffered: RangeSet,
    ops: Vec<SinkOp>,
}

/// Holds appended ranges in memory.
///
/// Only one operation may run at a time; overlapping calls are counted and
/// [`assert_exclusive`](Self::assert_exclusive) fails the test. With a capacity set, an append
/// that would hold more seconds than that is refused with [`SinkError::OverCapacity`].
/// [`SinkOp::Append`] records the range handed in, not the one held.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
    failures: Mutex<VecDeque<SinkError>>,
    capacity: Option<f64>,
    end_trim: f64,
    op_delay: Duration,
    busy: AtomicBool,
    overlaps: AtomicUsize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses appends beyond `seconds` of buffered media.
    #[must_use]
    pub fn with_capacity(mut self, seconds: f64) -> Self {
        self.capacity = Some(seconds);
        self
    }

    /// Holds each appended segment `seconds` short of its end, the way media buffers round
    /// to frame boundaries.
    #[must_use]
    pub fn with_end_trim(mut self, seconds: f64) -> Self {
        self.end_trim = seconds;
        self
    }

    /// Every operation takes `delay` before completing.
    #[must_use]
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    /// Starts with `ranges` already buffered.
    #[must_use]
    pub fn with_buffered(self, ranges: &[(f64, f64)]) -> Self {
        {
            let mut state = self.state.lock();
            for (start, end) in ranges {
                state
                    .buffered
                    .insert(TimeRange::new(*start, *end).expect("valid range"));
            }
        }
        self
    }

    /// The next append fails with `error`, whatever its content.
    pub fn fail_next_append(&self, error: SinkError) {
        self.failures.lock().push_back(error);
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        self.state.lock().ops.clone()
    }

    pub fn appended(&self) -> Vec<TimeRange> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Append(range) => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<TimeRange> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Remove(range) => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn init_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, SinkOp::Init { .. }))
            .count()
    }

    pub fn assert_exclusive(&self) {
        assert_eq!(
            self.overlaps.load(Ordering::SeqCst),
            0,
            "sink operations overlapped"
        );
    }

    async fn exclusive<T>(&self, op: impl FnOnce(&mut State) -> T) -> T {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
        let out = op(&mut *self.state.lock());
        self.busy.store(false, Ordering::SeqCst);
        out
    }
}

fn held_seconds(buffered: &RangeSet) -> f64 {
    buffered.iter().map(TimeRange::duration).sum()
}

#[async_trait]
impl BufferSink for MemorySink {
    async fn append(&self, chunk: SinkChunk) -> Result<(), SinkError> {
        let scripted = self.failures.lock().pop_front();
        let capacity = self.capacity;
        let end_trim = self.end_trim;
        self.exclusive(move |state| {
            if let Some(error) = scripted {
                return Err(error);
            }
            match chunk.kind {
                ChunkKind::Init => {
                    state.ops.push(SinkOp::Init {
                        bytes: chunk.data.len(),
                    });
                }
                ChunkKind::Media { range } => {
                    let held = TimeRange::new(range.start(), range.end() - end_trim).unwrap_or(range);
                    if let Some(capacity) = capacity {
                        let mut after = state.buffered.clone();
                        after.insert(held);
                        if held_seconds(&after) > capacity + 1e-9 {
                            return Err(SinkError::OverCapacity);
                        }
                    }
                    state.buffered.insert(held);
                    state.ops.push(SinkOp::Append(range));
                }
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, range: TimeRange) -> Result<(), SinkError> {
        self.exclusive(move |state| {
            state.buffered.remove(range);
            state.ops.push(SinkOp::Remove(range));
            Ok(())
        })
        .await
    }

    fn buffered(&self) -> RangeSet {
        self.state.lock().buffered.clone()
    }
}
