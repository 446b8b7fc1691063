use tokio::sync::watch;

/// Playback position and buffering goals, emitted on a steady cadence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockTick {
    pub current_time: f64,
    /// How far ahead of `current_time` the orchestrator tries to buffer.
    pub wanted_buffer_ahead: f64,
    /// Data beyond `current_time + max_buffer_ahead` is evicted.
    pub max_buffer_ahead: f64,
    /// Data before `current_time - max_buffer_behind` is evicted.
    pub max_buffer_behind: f64,
    pub is_seeking: bool,
}

impl ClockTick {
    pub fn at(current_time: f64) -> Self {
        Self {
            current_time,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn seeking(mut self) -> Self {
        self.is_seeking = true;
        self
    }
}

impl Default for ClockTick {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            wanted_buffer_ahead: 30.0,
            max_buffer_ahead: f64::INFINITY,
            max_buffer_behind: f64::INFINITY,
            is_seeking: false,
        }
    }
}

pub type ClockReceiver = watch::Receiver<ClockTick>;
