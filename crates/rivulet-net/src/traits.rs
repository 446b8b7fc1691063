use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use url::Url;

use crate::{
    error::NetResult,
    retry::RetryNet,
    timeout::TimeoutNet,
    types::{RangeSpec, RetryPolicy},
};

pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send>>;

/// Network transfer capability.
///
/// Dropping a returned future or stream cancels the transfer.
#[async_trait]
pub trait Net: Send + Sync {
    /// Get all bytes from a URL
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes>;

    /// Stream bytes from a URL, optionally restricted to a byte range
    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream>;
}

#[async_trait]
impl<T: Net + ?Sized> Net for std::sync::Arc<T> {
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes> {
        (**self).get_bytes(url).await
    }

    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream> {
        (**self).stream(url, range).await
    }
}

pub trait NetExt: Net + Sized {
    /// Add timeout layer
    fn with_timeout(self, timeout: Duration) -> TimeoutNet<Self> {
        TimeoutNet::new(self, timeout)
    }

    /// Add retry layer
    fn with_retry(self, policy: RetryPolicy) -> RetryNet<Self> {
        RetryNet::new(self, policy)
    }
}

impl<T: Net> NetExt for T {}
