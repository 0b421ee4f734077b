//! NES chiptune and MIDI player core
//!
//! `chiproll` drives three kinds of sound backends from a single real-time
//! audio callback and turns their oscillator registers into a piano-roll note
//! timeline. The backends are a packaged chiptune decoder, a frame-stepped NES
//! emulator and a MIDI synthesizer. All three are reached through traits in
//! [`backend`]; this crate ships only a simple MIDI tone synth of its own.
//!
//! # Features
//! - Pitch and velocity inference from NES APU and VRC6 oscillator state
//! - Note segmentation for register polling and MIDI event streams
//! - Full-track preprocessing on a private backend instance
//! - Allocation-free audio dispatch with lock-free seek and transport flags
//! - Scope, spectrum and level-meter visualization
//!
//! # Crate feature flags
//! - `visualization` (default): FFT spectrum and scope buffers (`visualization`)
//! - `export` (default): WAV rendering and note-list export (`export`)
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ## Build a MIDI piano roll
//! ```no_run
//! use chiproll::midi::MidiSequence;
//! use chiproll::preprocess::midi_timeline;
//!
//! let bytes = std::fs::read("song.mid").unwrap();
//! let sequence = MidiSequence::from_smf(&bytes).unwrap();
//! let timeline = midi_timeline(&sequence);
//! for note in timeline.notes() {
//!     println!("{} {} {:.3}-{:.3}", note.channel, note.pitch, note.start_time, note.end_time);
//! }
//! ```
//!
//! ## Drive the audio callback
//! ```no_run
//! use chiproll::midi::{MidiSequence, ToneSynth};
//! use chiproll::{Player, PlayerConfig};
//!
//! let config = PlayerConfig::default();
//! let synth = ToneSynth::new(config.sample_rate);
//! let player = Player::builder(config).synth(Box::new(synth)).build();
//! let bytes = std::fs::read("song.mid").unwrap();
//! player.load_midi(MidiSequence::from_smf(&bytes).unwrap()).unwrap();
//! player.midi_play().unwrap();
//!
//! let mut dispatcher = player.dispatcher();
//! let mut out = vec![0.0f32; 2048];
//! dispatcher.render(&mut out);
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod dispatch;
#[cfg(feature = "export")]
pub mod export;
pub mod midi;
pub mod oscillator;
pub mod pitch;
pub mod preprocess;
pub mod roll;
#[cfg(feature = "streaming")]
pub mod streaming;
mod sync;
#[cfg(feature = "visualization")]
pub mod visualization;

pub use backend::{
    Buttons, ChiptuneBackend, ChiptuneLoader, HardwareEmulator, MidiSynth, TrackInfo, VoiceMask,
};
pub use config::{InferenceConfig, PlayerConfig};
pub use dispatch::{AudioDispatcher, PlaybackMode, Player, PlayerBuilder};
pub use oscillator::{ApuChannel, ApuSnapshot, ChannelKind};
pub use pitch::{NoteReading, PitchInference};
pub use preprocess::TrackPreprocessor;
pub use roll::{LiveKeyboard, RollNote, SharedTimeline, Timeline};

/// NTSC NES CPU clock in Hz, the reference for every period register.
pub const NES_CPU_CLOCK: f64 = 1_789_773.0;

/// Default output sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Why a preprocessing pass did not produce a timeline
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    /// Another pass holds the in-progress flag
    #[error("a preprocessing pass is already running")]
    AlreadyRunning,

    /// The private backend instance could not be opened
    #[error("could not open backend instance: {0}")]
    Open(String),

    /// The backend did not report metadata for the track
    #[error("no track info for track {track}: {reason}")]
    TrackInfo {
        /// Requested track index
        track: usize,
        /// Backend message
        reason: String,
    },

    /// The backend refused to start the track
    #[error("could not start track {track}: {reason}")]
    StartTrack {
        /// Requested track index
        track: usize,
        /// Backend message
        reason: String,
    },
}

/// Error types for player operations
#[derive(thiserror::Error, Debug)]
pub enum ChiprollError {
    /// The backend rejected the data handed to it at load time
    #[error("Load error: {0}")]
    LoadError(String),

    /// A backend call failed outside the audio callback
    #[error("Backend error: {0}")]
    BackendError(String),

    /// No backend of the required kind was supplied to the player
    #[error("No {0} backend configured")]
    BackendUnavailable(&'static str),

    /// The operation needs a mode that is not active
    #[error("Operation requires {expected} mode")]
    WrongMode {
        /// Mode the operation applies to
        expected: &'static str,
    },

    /// Error while parsing a file format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Track preprocessing failed or was rejected
    #[error("Preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Error writing an export file
    #[error("Export error: {0}")]
    ExportError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ChiprollError {
    /// Converts a String into `ChiprollError::Other`.
    ///
    /// Prefer a specific variant where the failure has a known category.
    fn from(msg: String) -> Self {
        ChiprollError::Other(msg)
    }
}

impl From<&str> for ChiprollError {
    /// Converts a string slice into `ChiprollError::Other`.
    fn from(msg: &str) -> Self {
        ChiprollError::Other(msg.to_string())
    }
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, ChiprollError>;
