use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rivulet_abr::{AbrManager, NetworkMetric, RequestId, RequestProgress};
use rivulet_events::{Issue, IssueCode, StreamEvent};
use rivulet_manifest::{ByteRange, InitSegment, Segment, TrackType};
use rivulet_net::{Net, NetError, NetResult, RangeSpec, RetryPolicy, retry_with_budgets};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{EventSender, PipelineError};

/// Turns downloaded bytes into what the sink accepts (demuxing, decryption, ...).
pub trait SegmentParser: Send + Sync {
    fn parse(&self, track: TrackType, data: Bytes) -> Result<Bytes, String>;
}

/// Hands downloaded bytes to the sink unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl SegmentParser for PassThrough {
    fn parse(&self, _track: TrackType, data: Bytes) -> Result<Bytes, String> {
        Ok(data)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRequest {
    pub track: TrackType,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    /// Media duration carried by the response; zero for init data.
    pub duration: f64,
}

impl SegmentRequest {
    pub fn media(track: TrackType, segment: &Segment) -> Self {
        Self {
            track,
            url: segment.url.clone(),
            byte_range: segment.byte_range,
            duration: segment.duration,
        }
    }

    pub fn init(track: TrackType, init: &InitSegment) -> Self {
        Self {
            track,
            url: init.url.clone(),
            byte_range: init.byte_range,
            duration: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FetchedSegment {
    pub data: Bytes,
    /// From the first attempt to completion, backoff waits included.
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Downloads segments, feeding request telemetry to the ABR manager.
///
/// Transient failures are retried under the segment retry policy, lost connections against
/// its offline budget; each attempt is bounded by its own timeout.
pub struct SegmentPipeline {
    net: Arc<dyn Net>,
    abr: Arc<AbrManager>,
    parser: Arc<dyn SegmentParser>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    events: Option<EventSender>,
}

impl SegmentPipeline {
    pub fn new(
        net: Arc<dyn Net>,
        abr: Arc<AbrManager>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            net,
            abr,
            parser: Arc::new(PassThrough),
            retry,
            attempt_timeout,
            events: None,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn SegmentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Retried failures are reported here as warnings.
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn abr(&self) -> &Arc<AbrManager> {
        &self.abr
    }

    pub async fn fetch(
        &self,
        request: &SegmentRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedSegment, PipelineError> {
        let track = request.track;
        let started = Instant::now();
        let mut attempts = 0;

        let work = retry_with_budgets(
            &self.retry,
            NetError::retry_budget,
            |error, retry, delay| {
                warn!(%track, url = %request.url, %error, attempt = retry, delay_ms = delay.as_millis(), "retrying segment");
                if let Some(events) = &self.events {
                    let message = format!("retry {retry} of {} after: {error}", request.url);
                    let _ = events.send(StreamEvent::Warning(Issue::new(
                        IssueCode::TransientNetwork,
                        Some(track),
                        message,
                    )));
                }
            },
            |attempt| {
                attempts = attempt + 1;
                self.attempt(request)
            },
        );

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!(%track, url = %request.url, "segment request cancelled");
                return Err(PipelineError::Cancelled);
            }
            result = work => result,
        };

        let data = result?;
        let data = self
            .parser
            .parse(track, data)
            .map_err(PipelineError::Parse)?;
        let elapsed = started.elapsed();
        debug!(%track, url = %request.url, bytes = data.len(), attempts, elapsed_ms = elapsed.as_millis(), "segment fetched");

        Ok(FetchedSegment {
            data,
            elapsed,
            attempts,
        })
    }

    async fn attempt(&self, request: &SegmentRequest) -> NetResult<Bytes> {
        let track = request.track;
        let id = self.abr.next_request_id();
        let in_flight = InFlight::start(&self.abr, track, id, request.duration);
        let started = Instant::now();

        let transfer = async {
            let range = request
                .byte_range
                .map(|r| RangeSpec::new(r.start, Some(r.end)));
            let mut body = self.net.stream(request.url.clone(), range).await?;
            let mut buf = BytesMut::new();
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk?);
                self.abr.request_progress(
                    track,
                    id,
                    RequestProgress {
                        bytes_received: buf.len() as u64,
                        elapsed: started.elapsed(),
                    },
                );
            }
            Ok::<_, NetError>(buf.freeze())
        };

        let data = tokio::time::timeout(self.attempt_timeout, transfer)
            .await
            .map_err(|_| NetError::timeout())??;
        drop(in_flight);

        if request.duration > 0.0 {
            self.abr.add_metric(
                track,
                NetworkMetric {
                    segment_duration: request.duration,
                    request_duration: started.elapsed(),
                    size_bytes: data.len() as u64,
                },
            );
        }
        Ok(data)
    }
}

/// Registers a request with the ABR manager for as long as it lives.
struct InFlight<'a> {
    abr: &'a AbrManager,
    track: TrackType,
    id: RequestId,
}

impl<'a> InFlight<'a> {
    fn start(abr: &'a AbrManager, track: TrackType, id: RequestId, duration: f64) -> Self {
        abr.request_started(track, id, duration);
        Self { abr, track, id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.abr.request_finished(self.track, self.id);
    }
}
