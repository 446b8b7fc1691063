#![forbid(unsafe_code)]

//! # Rivulet
//!
//! Facade crate for the adaptive-bitrate buffering engine.
//!
//! ## Quick start
//!
//! ```ignore
//! use rivulet::prelude::*;
//!
//! let config = PlayerConfig::new("https://cdn.example.com/manifest.mpd")?
//!     .with_parser(Arc::new(MyMpdParser));
//! let player = Player::open(config, surface)?;
//!
//! let mut events = player.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod abr {
    pub use rivulet_abr::*;
}

pub mod buffer {
    pub use rivulet_buffer::*;
}

pub mod manifest {
    pub use rivulet_manifest::*;
}

pub mod net {
    pub use rivulet_net::*;
}

pub mod stream {
    pub use rivulet_stream::*;
}

// ── Player ──────────────────────────────────────────────────────────────

mod config;
mod error;
mod events;
mod player;

pub use config::{ManifestSrc, PlayerConfig};
pub use error::{PlayerError, PlayerResult};
pub use events::{EventBus, Issue, IssueCode, RepresentationInfo, StreamEvent};
pub use player::Player;

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use rivulet_abr::AbrOptions;
    pub use rivulet_buffer::{BufferSink, RangeSet, TimeRange};
    pub use rivulet_manifest::{Manifest, TrackType};
    pub use rivulet_stream::{
        BufferOptions, ControllerState, EngineConfig, ManifestParser, PlaybackSurface, ReadyState,
        StartAt, StreamHandle,
    };

    pub use crate::{Player, PlayerConfig, PlayerError, StreamEvent};
}
