#![forbid(unsafe_code)]
#![expect(
    clippy::missing_panics_doc,
    reason = "test utility crate, panics are assertion failures"
)]

//! Shared test doubles for the rivulet workspace.

pub mod fixtures;
pub mod memory_sink;
pub mod memory_surface;
pub mod rng;
pub mod scripted_net;

pub use fixtures::*;
pub use memory_sink::{MemorySink, SinkOp};
pub use memory_surface::MemorySurface;
pub use rng::Xorshift64;
pub use scripted_net::{RecordedRequest, ScriptedNet};

/// Installs a test-writer subscriber filtered by `RUST_LOG`. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
