//! Backend seams
//!
//! The player drives three kinds of opaque sound sources. Each is reached
//! through a trait so concrete decoders, emulators and synths can be plugged
//! in by the host application.

pub mod ines;

use crate::oscillator::ApuSnapshot;
use crate::Result;
use bitflags::bitflags;

bitflags! {
    /// Voices silenced on a chiptune backend, one bit per channel tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VoiceMask: u32 {
        /// Pulse 1
        const SQUARE1 = 1 << 0;
        /// Pulse 2
        const SQUARE2 = 1 << 1;
        /// Triangle
        const TRIANGLE = 1 << 2;
        /// Noise
        const NOISE = 1 << 3;
        /// DMC
        const DMC = 1 << 4;
        /// VRC6 pulse 1
        const VRC6_PULSE1 = 1 << 5;
        /// VRC6 pulse 2
        const VRC6_PULSE2 = 1 << 6;
        /// VRC6 saw
        const VRC6_SAW = 1 << 7;
    }
}

impl VoiceMask {
    /// Mask bit for a channel tag.
    pub fn for_channel(tag: u8) -> Self {
        Self::from_bits_truncate(1u32.checked_shl(u32::from(tag)).unwrap_or(0))
    }
}

bitflags! {
    /// Standard controller state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u8 {
        /// A
        const A = 1 << 0;
        /// B
        const B = 1 << 1;
        /// Select
        const SELECT = 1 << 2;
        /// Start
        const START = 1 << 3;
        /// D-pad up
        const UP = 1 << 4;
        /// D-pad down
        const DOWN = 1 << 5;
        /// D-pad left
        const LEFT = 1 << 6;
        /// D-pad right
        const RIGHT = 1 << 7;
    }
}

/// Metadata a chiptune backend reports for one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Track title
    pub title: String,
    /// Game or album
    pub game: String,
    /// Composer
    pub author: String,
    /// Copyright line
    pub copyright: String,
    /// Declared length in milliseconds, `None` when unknown
    pub length_ms: Option<u64>,
}

/// One open instance of a packaged chiptune decoder.
///
/// `play` fills interleaved stereo 16-bit samples; positions are in
/// milliseconds.
pub trait ChiptuneBackend: Send {
    /// Number of tracks in the file.
    fn track_count(&self) -> usize;

    /// Start a track from its beginning.
    fn start_track(&mut self, index: usize) -> Result<()>;

    /// Generate `buf.len() / 2` stereo frames.
    fn play(&mut self, buf: &mut [i16]) -> Result<()>;

    /// Jump to an absolute position.
    fn seek(&mut self, position_ms: i64) -> Result<()>;

    /// Current position.
    fn tell(&self) -> i64;

    /// True once the current track finished.
    fn track_ended(&self) -> bool;

    /// Playback speed multiplier.
    fn set_tempo(&mut self, tempo: f64);

    /// Silence the voices in `mask`.
    fn mute_voices(&mut self, mask: VoiceMask);

    /// Metadata for a track.
    fn track_info(&self, index: usize) -> Result<TrackInfo>;

    /// Current oscillator registers, if the decoder exposes them.
    fn oscillators(&self) -> Option<ApuSnapshot> {
        None
    }
}

/// Opens decoder instances from raw file data.
///
/// Preprocessing opens its own instance, so a loader must be able to open the
/// same data more than once.
pub trait ChiptuneLoader: Send + Sync {
    /// Open an instance rendering at `sample_rate`.
    fn open(&self, data: &[u8], sample_rate: u32) -> Result<Box<dyn ChiptuneBackend>>;
}

/// A frame-stepped console emulator with its own audio ring buffer.
pub trait HardwareEmulator: Send {
    /// Load a cartridge image.
    fn load(&mut self, rom: &[u8]) -> Result<()>;

    /// Power-cycle the loaded cartridge.
    fn reset(&mut self);

    /// Emulate one video frame, queueing its audio.
    fn run_frame(&mut self);

    /// Drain up to `buf.len()` mono samples; returns how many were written.
    fn read_audio(&mut self, buf: &mut [i16]) -> usize;

    /// Current oscillator registers.
    fn oscillators(&self) -> ApuSnapshot;

    /// CPU cycles executed since power-on.
    fn cycle_count(&self) -> u64;

    /// Controller state for `player` (0 or 1).
    fn set_input(&mut self, player: usize, buttons: Buttons);

    /// Serialize the machine state.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore a state produced by `save_state`.
    fn load_state(&mut self, state: &[u8]) -> Result<()>;
}

/// A synthesizer rendering MIDI note events to stereo float audio.
pub trait MidiSynth: Send {
    /// Render `buf.len() / 2` interleaved stereo frames.
    fn render(&mut self, buf: &mut [f32]);

    /// Start a note; `velocity` is normalized.
    fn note_on(&mut self, channel: u8, key: u8, velocity: f32);

    /// Release a note.
    fn note_off(&mut self, channel: u8, key: u8);

    /// Select an instrument; `drums` marks the percussion channel.
    fn program_change(&mut self, channel: u8, program: u8, drums: bool);

    /// 14-bit pitch wheel, centre 8192.
    fn pitch_bend(&mut self, channel: u8, value: u16);

    /// Controller change.
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);

    /// Silence all voices and restore channel defaults.
    fn reset(&mut self);
}
