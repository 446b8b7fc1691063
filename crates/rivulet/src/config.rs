#![forbid(unsafe_code)]

//! Configuration for [`Player`](crate::Player).

use std::{fmt, sync::Arc};

use rivulet_abr::AbrOptions;
use rivulet_manifest::Manifest;
use rivulet_net::{NetOptions, RetryPolicy};
use rivulet_stream::{BufferOptions, EngineConfig, ManifestParser, StartAt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::PlayerError;

/// Where the manifest comes from: fetched from a URL, or handed over already parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestSrc {
    Url(Url),
    Manifest(Box<Manifest>),
}

impl From<Url> for ManifestSrc {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<Manifest> for ManifestSrc {
    fn from(manifest: Manifest) -> Self {
        Self::Manifest(Box::new(manifest))
    }
}

/// Everything needed to open a [`Player`](crate::Player).
///
/// ```ignore
/// use rivulet::PlayerConfig;
///
/// let config = PlayerConfig::new("https://cdn.example.com/live/manifest.mpd")?
///     .with_parser(Arc::new(MyMpdParser))
///     .with_start_at(StartAt::FromEnd(30.0));
/// ```
#[derive(Clone)]
pub struct PlayerConfig {
    pub src: ManifestSrc,
    /// Required for [`ManifestSrc::Url`]; the engine ships no manifest format.
    pub parser: Option<Arc<dyn ManifestParser>>,
    pub engine: EngineConfig,
    /// Transport settings for manifest and segment requests.
    pub net: NetOptions,
    /// Retries of the manifest request itself, below the session restarts.
    pub manifest_retry: RetryPolicy,
}

impl fmt::Debug for PlayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerConfig")
            .field("src", &self.src)
            .field("parser", &self.parser.is_some())
            .field("engine", &self.engine)
            .field("net", &self.net)
            .field("manifest_retry", &self.manifest_retry)
            .finish()
    }
}

impl PlayerConfig {
    /// Config for the manifest at `input`, an `http` or `https` URL.
    pub fn new(input: impl AsRef<str>) -> Result<Self, PlayerError> {
        let trimmed = input.as_ref().trim();
        let url = Url::parse(trimmed)
            .map_err(|e| PlayerError::InvalidSource(format!("{trimmed}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PlayerError::InvalidSource(format!(
                "unsupported scheme {}: {trimmed}",
                url.scheme()
            )));
        }
        Ok(Self::from_src(url))
    }

    /// Config playing a manifest built by the caller; no manifest request is made.
    pub fn from_manifest(manifest: Manifest) -> Self {
        Self::from_src(manifest)
    }

    fn from_src(src: impl Into<ManifestSrc>) -> Self {
        Self {
            src: src.into(),
            parser: None,
            engine: EngineConfig::default(),
            net: NetOptions::default(),
            manifest_retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.engine.abr = abr;
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: BufferOptions) -> Self {
        self.engine.buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_start_at(mut self, start_at: StartAt) -> Self {
        self.engine.start_at = start_at;
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_manifest_retry(mut self, policy: RetryPolicy) -> Self {
        self.manifest_retry = policy;
        self
    }

    /// Attempts allowed per manifest or segment request while the network is unreachable.
    #[must_use]
    pub fn with_offline_retry(mut self, attempts: u32) -> Self {
        self.manifest_retry.offline_attempts = Some(attempts);
        self.engine = self.engine.with_offline_retry(attempts);
        self
    }

    /// Cancelling `cancel` disposes the player.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.engine.cancel = Some(cancel);
        self
    }
}
