use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, header::RANGE};
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{NetOptions, RangeSpec},
};

/// reqwest-backed transfer capability.
///
/// Requests are unbounded in time; wrap the client with
/// [`NetExt::with_timeout`](crate::NetExt::with_timeout) to bound them.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::http(e.to_string()))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    async fn send(&self, url: Url, range: Option<&RangeSpec>) -> NetResult<reqwest::Response> {
        let mut req = self.inner.get(url.clone());
        if let Some(range) = range {
            req = req.header(RANGE, range.to_header_value());
        }
        trace!(%url, range = ?range, "sending request");

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), url.as_str()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url) -> NetResult<Bytes> {
        let resp = self.send(url, None).await?;
        resp.bytes().await.map_err(NetError::from)
    }

    async fn stream(&self, url: Url, range: Option<RangeSpec>) -> NetResult<ByteStream> {
        if let Some(RangeSpec { start, end: Some(end) }) = &range {
            if end < start {
                return Err(NetError::InvalidRange(format!("bytes={start}-{end}")));
            }
        }
        let resp = self.send(url, range.as_ref()).await?;

        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }
}
