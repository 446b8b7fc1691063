use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::RangeSpec,
};

/// Timeout decorator for Net implementations
pub struct TimeoutNet<N> {
    inner: N,
    timeout: Duration,
}

impl<N: Net> TimeoutNet<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<N: Net> Net for TimeoutNet<N> {
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes> {
        tokio::time::timeout(self.timeout, self.inner.get_bytes(url))
            .await
            .map_err(|_| NetError::timeout())?
    }

    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream> {
        // Only the request/response phase is bounded; body reading is the caller's concern.
        tokio::time::timeout(self.timeout, self.inner.stream(url, range))
            .await
            .map_err(|_| NetError::timeout())?
    }
}
