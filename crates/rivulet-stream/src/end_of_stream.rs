use std::{collections::BTreeMap, sync::Arc};

use rivulet_buffer::{QueuedSink, SinkStatus};
use rivulet_events::StreamEvent;
use rivulet_manifest::TrackType;
use rivulet_net::{RetryPolicy, retry_with_backoff};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{EventSender, PlaybackSurface, ReadyState, StreamError, StreamResult, SurfaceError};

/// Declares end of stream once every track asks for it and every sink is idle.
///
/// The declaration is maintained: when a track resumes buffering afterwards, it is rolled
/// back and issued again once all tracks are done.
pub struct EndOfStreamCoordinator {
    wants: watch::Sender<BTreeMap<TrackType, bool>>,
    declared: watch::Sender<bool>,
    sinks: Vec<QueuedSink>,
    surface: Arc<dyn PlaybackSurface>,
    retry: RetryPolicy,
    events: EventSender,
}

impl EndOfStreamCoordinator {
    pub fn new(
        tracks: impl IntoIterator<Item = TrackType>,
        sinks: Vec<QueuedSink>,
        surface: Arc<dyn PlaybackSurface>,
        retry: RetryPolicy,
        events: EventSender,
    ) -> Self {
        let wants = tracks.into_iter().map(|track| (track, false)).collect();
        Self {
            wants: watch::Sender::new(wants),
            declared: watch::Sender::new(false),
            sinks,
            surface,
            retry,
            events,
        }
    }

    /// `track` has buffered everything up to the end of the last period.
    pub fn request(&self, track: TrackType) {
        self.set_wants(track, true);
    }

    /// `track` is buffering again.
    pub fn resume(&self, track: TrackType) {
        self.set_wants(track, false);
    }

    fn set_wants(&self, track: TrackType, wants: bool) {
        let changed = self.wants.send_if_modified(|map| {
            let slot = map.entry(track).or_insert(false);
            let changed = *slot != wants;
            *slot = wants;
            changed
        });
        if changed {
            debug!(%track, wants, "end of stream request changed");
        }
    }

    pub fn wants(&self, track: TrackType) -> bool {
        self.wants.borrow().get(&track).copied().unwrap_or(false)
    }

    pub fn is_declared(&self) -> bool {
        *self.declared.borrow()
    }

    pub fn subscribe_declared(&self) -> watch::Receiver<bool> {
        self.declared.subscribe()
    }

    /// Drives declaration and rollback until `cancel` fires.
    ///
    /// Fails only when the surface keeps refusing the signal past the retry budget.
    pub async fn run(&self, cancel: &CancellationToken) -> StreamResult<()> {
        let mut wants = self.wants.subscribe();
        let mut statuses: Vec<watch::Receiver<SinkStatus>> =
            self.sinks.iter().map(QueuedSink::status).collect();

        loop {
            loop {
                let all_want = all_true(&wants.borrow_and_update());
                let all_idle = statuses
                    .iter_mut()
                    .all(|status| status.borrow_and_update().is_idle());
                if all_want && all_idle {
                    break;
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    _ = wants.changed() => {}
                    () = any_changed(&mut statuses) => {}
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                result = self.signal() => result?,
            }
            self.declared.send_replace(true);
            info!("end of stream declared");
            let _ = self.events.send(StreamEvent::Ended);

            while all_true(&wants.borrow_and_update()) {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    _ = wants.changed() => {}
                }
            }
            self.declared.send_replace(false);
            debug!("end of stream rolled back");
        }
    }

    async fn signal(&self) -> StreamResult<()> {
        retry_with_backoff(
            &self.retry,
            |error: &SurfaceError| *error != SurfaceError::Closed,
            |error, retry, delay| {
                warn!(%error, attempt = retry, delay_ms = delay.as_millis(), "end of stream refused, retrying");
            },
            |_| std::future::ready(self.try_signal()),
        )
        .await
        .map_err(StreamError::EndOfStreamRejected)
    }

    fn try_signal(&self) -> Result<(), SurfaceError> {
        match self.surface.ready_state() {
            ReadyState::Ended => Ok(()),
            ReadyState::Open => self.surface.signal_end(),
            state => Err(SurfaceError::NotReady(state)),
        }
    }
}

fn all_true(wants: &BTreeMap<TrackType, bool>) -> bool {
    !wants.is_empty() && wants.values().all(|w| *w)
}

async fn any_changed(statuses: &mut [watch::Receiver<SinkStatus>]) {
    if statuses.is_empty() {
        return std::future::pending().await;
    }
    let changes = statuses.iter_mut().map(|status| Box::pin(status.changed()));
    let _ = futures::future::select_all(changes).await;
}
