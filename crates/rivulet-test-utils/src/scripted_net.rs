//! [`Net`] double answering from an in-memory table.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rivulet_net::{ByteStream, Net, NetError, NetResult, RangeSpec};
use tokio::time::Instant;
use url::Url;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub url: Url,
    pub range: Option<RangeSpec>,
    pub at: Instant,
}

/// Serves registered bodies, replays scripted failures per URL and logs every request.
///
/// Unregistered URLs get `default_body` bytes when set, `404` otherwise. Bodies are streamed
/// in two chunks after `latency`; byte ranges are honored (end inclusive).
#[derive(Default)]
pub struct ScriptedNet {
    bodies: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, VecDeque<NetError>>>,
    default_body: Option<usize>,
    latency: Duration,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedNet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Any unregistered URL answers `len` bytes.
    #[must_use]
    pub fn with_default_body(mut self, len: usize) -> Self {
        self.default_body = Some(len);
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_body(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.bodies.lock().insert(url.to_string(), body.into());
        self
    }

    /// The next request to `url` fails with `error`; calls queue up.
    pub fn fail(&self, url: &str, error: NetError) {
        self.failures
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.log.lock().iter().map(|r| r.url.to_string()).collect()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    #[expect(clippy::cast_possible_truncation, reason = "bodies are in memory")]
    fn answer(&self, url: &Url, range: Option<&RangeSpec>) -> NetResult<Bytes> {
        if let Some(error) = self
            .failures
            .lock()
            .get_mut(url.as_str())
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let body = match (self.bodies.lock().get(url.as_str()), self.default_body) {
            (Some(body), _) => body.clone(),
            (None, Some(len)) => Bytes::from(vec![0xA5_u8; len]),
            (None, None) => return Err(NetError::http_status(404, url.as_str())),
        };
        let Some(range) = range else {
            return Ok(body);
        };
        let len = body.len() as u64;
        let end = range.end.map_or(len, |end| (end + 1).min(len));
        if range.start >= end {
            return Err(NetError::InvalidRange(format!("{}-{:?} of {len}", range.start, range.end)));
        }
        Ok(body.slice(range.start as usize..end as usize))
    }

    fn record(&self, url: &Url, range: Option<&RangeSpec>) {
        self.log.lock().push(RecordedRequest {
            url: url.clone(),
            range: range.cloned(),
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl Net for ScriptedNet {
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes> {
        self.record(&url, None);
        tokio::time::sleep(self.latency).await;
        self.answer(&url, None)
    }

    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream> {
        self.record(&url, range.as_ref());
        tokio::time::sleep(self.latency).await;
        let body = self.answer(&url, range.as_ref())?;
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
