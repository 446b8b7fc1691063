use std::sync::Arc;

use async_trait::async_trait;
use rivulet_manifest::{Manifest, ManifestResult};
use rivulet_net::{Net, NetExt, RetryNet, RetryPolicy};
use tracing::debug;
use url::Url;

use crate::StreamResult;

/// Turns manifest bytes into the normalized model. Format-specific, provided by the caller.
pub trait ManifestParser: Send + Sync {
    fn parse(&self, data: &[u8], url: &Url) -> ManifestResult<Manifest>;
}

impl<P: ManifestParser + ?Sized> ManifestParser for Arc<P> {
    fn parse(&self, data: &[u8], url: &Url) -> ManifestResult<Manifest> {
        (**self).parse(data, url)
    }
}

/// Source of the manifest a session plays.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self) -> StreamResult<Manifest>;
}

/// An already parsed manifest.
#[async_trait]
impl ManifestLoader for Manifest {
    async fn load(&self) -> StreamResult<Manifest> {
        Ok(self.clone())
    }
}

/// Fetches the manifest over the network, with retries, and parses it.
pub struct HttpManifestLoader<P> {
    net: RetryNet<Arc<dyn Net>>,
    url: Url,
    parser: P,
}

impl<P: ManifestParser> HttpManifestLoader<P> {
    pub fn new(net: Arc<dyn Net>, url: Url, parser: P, retry: RetryPolicy) -> Self {
        Self {
            net: net.with_retry(retry),
            url,
            parser,
        }
    }
}

#[async_trait]
impl<P: ManifestParser> ManifestLoader for HttpManifestLoader<P> {
    async fn load(&self) -> StreamResult<Manifest> {
        let data = self.net.get_bytes(self.url.clone()).await?;
        debug!(url = %self.url, bytes = data.len(), "manifest fetched");
        Ok(self.parser.parse(&data, &self.url)?)
    }
}
