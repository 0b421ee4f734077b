//! Playback session and real-time dispatch
//!
//! A [`Player`] owns the shared session and exposes the control surface used
//! by a front end. An [`AudioDispatcher`] is the audio-callback side: it
//! renders the active backend into interleaved stereo `f32` without
//! allocating, and consumes seek requests and transport flags through
//! atomics.
//!
//! # Example
//!
//! ```ignore
//! let player = Player::builder(PlayerConfig::default())
//!     .chiptune_loader(Arc::new(MyLoader))
//!     .build();
//! player.load_chiptune(&nsf_bytes)?;
//! player.start_track(0)?;
//!
//! let mut dispatcher = player.dispatcher();
//! dispatcher.render(&mut host_buffer);
//! player.poll()?;
//! ```

mod deck;
mod dispatcher;
mod player;
mod session;

pub use dispatcher::AudioDispatcher;
pub use player::{Player, PlayerBuilder};

/// Which backend drives the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Nothing loaded
    #[default]
    Idle,
    /// Packaged chiptune decoder
    Chiptune,
    /// Frame-stepped console emulator
    Hardware,
    /// MIDI sequence through a synth
    Midi,
}

impl PlaybackMode {
    /// Lowercase name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            PlaybackMode::Idle => "idle",
            PlaybackMode::Chiptune => "chiptune",
            PlaybackMode::Hardware => "hardware",
            PlaybackMode::Midi => "midi",
        }
    }
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
