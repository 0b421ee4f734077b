use serde::{Deserialize, Serialize};

/// One closed note on the piano roll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollNote {
    /// Channel tag: an [`crate::ApuChannel`] tag or a MIDI channel.
    pub channel: u8,
    /// MIDI note number.
    pub pitch: u8,
    /// Normalized intensity.
    pub velocity: f32,
    /// Start in seconds.
    pub start_time: f64,
    /// End in seconds, always after `start_time`.
    pub end_time: f64,
}

impl RollNote {
    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// True while `time` lies in `[start_time, end_time)`.
    pub fn is_active_at(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end_time
    }
}
