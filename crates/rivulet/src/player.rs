#![forbid(unsafe_code)]

//! One streaming session bound to a playback surface.

use std::sync::Arc;

use rivulet_net::{HttpClient, Net, NetExt};
use rivulet_stream::{
    ControllerState, HttpManifestLoader, ManifestLoader, PlaybackSurface, StreamController,
    StreamEvent, StreamHandle,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    PlayerError, PlayerResult,
    config::{ManifestSrc, PlayerConfig},
};

/// A running session: manifest loading, buffering and ABR for every track of one stream.
///
/// The session is disposed when the player is dropped. Handles obtained through
/// [`handle`](Self::handle) observe the disposal.
///
/// ```ignore
/// use rivulet::{Player, PlayerConfig};
///
/// let config = PlayerConfig::new("https://cdn.example.com/manifest.mpd")?
///     .with_parser(Arc::new(MyMpdParser));
/// let player = Player::open(config, surface)?;
/// let mut events = player.subscribe();
/// ```
pub struct Player {
    handle: StreamHandle,
}

impl Player {
    /// Opens a session fetching over HTTP. Must be called within a Tokio runtime.
    ///
    /// Every request waits at most `config.net.request_timeout` for a response.
    pub fn open(config: PlayerConfig, surface: Arc<dyn PlaybackSurface>) -> PlayerResult<Self> {
        let net = HttpClient::new(config.net.clone())?.with_timeout(config.net.request_timeout);
        Self::open_with_net(config, surface, Arc::new(net))
    }

    /// Opens a session fetching through `net`.
    pub fn open_with_net(
        config: PlayerConfig,
        surface: Arc<dyn PlaybackSurface>,
        net: Arc<dyn Net>,
    ) -> PlayerResult<Self> {
        let loader: Arc<dyn ManifestLoader> = match config.src {
            ManifestSrc::Manifest(manifest) => {
                info!(manifest = %manifest.id, "opening player");
                Arc::new(*manifest)
            }
            ManifestSrc::Url(url) => {
                let Some(parser) = config.parser else {
                    return Err(PlayerError::MissingParser(url));
                };
                info!(%url, "opening player");
                Arc::new(HttpManifestLoader::new(
                    Arc::clone(&net),
                    url,
                    parser,
                    config.manifest_retry,
                ))
            }
        };

        let handle = StreamController::new(config.engine, loader, surface, net).start();
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn state(&self) -> ControllerState {
        self.handle.state()
    }

    /// Events published from now on. `ManifestReady` may already be gone; subscribe through
    /// [`StreamController`] directly to observe it.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.handle.subscribe()
    }

    pub fn dispose(&self) {
        self.handle.dispose();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}
