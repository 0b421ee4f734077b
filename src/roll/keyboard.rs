//! Live keyboard state
//!
//! Tracks which note every channel is sounding right now, fed either by live
//! oscillator inference, by a preprocessed timeline lookup, or by explicit
//! MIDI note events. Also provides the piano key geometry used to draw it.

use super::Timeline;
use crate::oscillator::{BASE_CHANNEL_COUNT, MAX_CHANNEL_COUNT};
use crate::pitch::SnapshotReadings;
use crate::roll::segmenter::{MAX_SEGMENT_CHANNELS, VELOCITY_FLOOR};

/// Note names within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const WHITE_INDEX_IN_OCTAVE: [usize; 12] = [0, 0, 1, 1, 2, 3, 3, 4, 4, 5, 5, 6];

/// True for sharps.
pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

/// Octave number, with middle C (60) in octave 4.
pub fn octave(note: u8) -> i32 {
    i32::from(note / 12) - 1
}

/// Index of the white key at or below `note`, counting from MIDI 0.
pub fn white_key_index(note: u8) -> usize {
    (note as usize / 12) * 7 + WHITE_INDEX_IN_OCTAVE[note as usize % 12]
}

/// Display name such as `A4` or `C#3`.
pub fn note_name(note: u8) -> String {
    format!("{}{}", NOTE_NAMES[note as usize % 12], octave(note))
}

/// Which channel set the keyboard shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardLayout {
    /// NES APU channels, with or without VRC6
    Nes {
        /// VRC6 channels present
        expansion: bool,
    },
    /// 16 MIDI channels
    Midi,
}

/// Current note of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelNote {
    /// MIDI note.
    pub pitch: u8,
    /// Normalized intensity.
    pub velocity: f32,
    /// Whether the channel is sounding.
    pub active: bool,
}

/// A key held down by some channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPress {
    /// Channel holding the key.
    pub channel: u8,
    /// Its velocity.
    pub velocity: f32,
}

/// Per-channel live note state.
#[derive(Debug, Clone)]
pub struct LiveKeyboard {
    notes: [ChannelNote; MAX_SEGMENT_CHANNELS],
    layout: KeyboardLayout,
    updated_at: f64,
}

impl Default for LiveKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveKeyboard {
    /// Keyboard for the base NES channels.
    pub fn new() -> Self {
        Self {
            notes: [ChannelNote::default(); MAX_SEGMENT_CHANNELS],
            layout: KeyboardLayout::Nes { expansion: false },
            updated_at: 0.0,
        }
    }

    /// Switch layout and release every key.
    pub fn set_layout(&mut self, layout: KeyboardLayout) {
        self.layout = layout;
        self.all_notes_off();
    }

    /// Current layout.
    pub fn layout(&self) -> KeyboardLayout {
        self.layout
    }

    /// Channels shown: 5, 8 with VRC6, or 16 for MIDI.
    pub fn active_channel_count(&self) -> usize {
        match self.layout {
            KeyboardLayout::Nes { expansion: false } => BASE_CHANNEL_COUNT,
            KeyboardLayout::Nes { expansion: true } => MAX_CHANNEL_COUNT,
            KeyboardLayout::Midi => MAX_SEGMENT_CHANNELS,
        }
    }

    /// Time of the most recent update, in seconds.
    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    /// Note state of one channel.
    pub fn channel(&self, channel: u8) -> Option<ChannelNote> {
        self.notes.get(channel as usize).copied()
    }

    /// Apply live inference results.
    pub fn apply_readings(&mut self, readings: &SnapshotReadings, time: f64) {
        for (channel, reading) in readings.iter() {
            let slot = &mut self.notes[channel.tag() as usize];
            match reading.pitch {
                Some(pitch) if reading.velocity > VELOCITY_FLOOR => {
                    *slot = ChannelNote {
                        pitch,
                        velocity: reading.velocity,
                        active: true,
                    };
                }
                _ => slot.active = false,
            }
        }
        self.updated_at = time;
    }

    /// Show the notes a timeline has sounding at `time`.
    ///
    /// In MIDI layout a channel holding a chord shows its highest note.
    pub fn sync_to_timeline(&mut self, timeline: &Timeline, time: f64) {
        for slot in self.notes.iter_mut() {
            slot.active = false;
        }
        let prefer_high = self.layout == KeyboardLayout::Midi;
        for note in timeline.active_at(time) {
            let Some(slot) = self.notes.get_mut(note.channel as usize) else {
                continue;
            };
            if !slot.active || !prefer_high || note.pitch > slot.pitch {
                *slot = ChannelNote {
                    pitch: note.pitch,
                    velocity: note.velocity,
                    active: true,
                };
            }
        }
        self.updated_at = time;
    }

    /// Explicit MIDI note-on.
    pub fn midi_note_on(&mut self, channel: u8, pitch: u8, velocity: f32) {
        if pitch > 127 {
            return;
        }
        if let Some(slot) = self.notes.get_mut(channel as usize) {
            *slot = ChannelNote {
                pitch,
                velocity,
                active: true,
            };
        }
    }

    /// Explicit MIDI note-off; only releases the channel if it shows `pitch`.
    pub fn midi_note_off(&mut self, channel: u8, pitch: u8) {
        if let Some(slot) = self.notes.get_mut(channel as usize) {
            if slot.pitch == pitch {
                slot.active = false;
            }
        }
    }

    /// Release every channel.
    pub fn all_notes_off(&mut self) {
        for slot in self.notes.iter_mut() {
            slot.active = false;
        }
    }

    /// Per-key view; when two channels share a key the louder one wins.
    pub fn pressed_keys(&self) -> [Option<KeyPress>; 128] {
        let mut keys = [None; 128];
        let shown = self.active_channel_count();
        for (channel, note) in self.notes.iter().enumerate().take(shown) {
            if !note.active {
                continue;
            }
            let key: &mut Option<KeyPress> = &mut keys[note.pitch as usize % 128];
            let louder = key.map_or(true, |k| note.velocity > k.velocity);
            if louder {
                *key = Some(KeyPress {
                    channel: channel as u8,
                    velocity: note.velocity,
                });
            }
        }
        keys
    }

    /// Number of channels currently sounding.
    pub fn sounding_count(&self) -> usize {
        self.notes
            .iter()
            .take(self.active_channel_count())
            .filter(|n| n.active)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::{ApuChannel, ApuSnapshot, OscillatorState};
    use crate::pitch::PitchInference;
    use crate::roll::RollNote;

    #[test]
    fn test_key_geometry() {
        assert!(is_black_key(61));
        assert!(!is_black_key(64));
        assert_eq!(octave(60), 4);
        assert_eq!(octave(21), 0);
        assert_eq!(note_name(69), "A4");
        assert_eq!(note_name(49), "C#3");
        assert_eq!(white_key_index(60) + 1, white_key_index(62));
        assert_eq!(white_key_index(61), white_key_index(60));
        assert_eq!(white_key_index(72) - white_key_index(60), 7);
    }

    #[test]
    fn test_apply_readings_tracks_channels() {
        let inference = PitchInference::default();
        let snap = ApuSnapshot::silent()
            .with_base(ApuChannel::Square1, OscillatorState::new(253, 10, 15))
            .with_base(ApuChannel::Triangle, OscillatorState::new(507, 10, 0));
        let mut keyboard = LiveKeyboard::new();
        keyboard.apply_readings(&inference.infer_snapshot(&snap), 1.5);
        assert_eq!(keyboard.sounding_count(), 2);
        let keys = keyboard.pressed_keys();
        assert_eq!(keys[69].unwrap().channel, 0);
        assert_eq!(keys[57].unwrap().channel, 2);
        assert_eq!(keyboard.updated_at(), 1.5);

        keyboard.apply_readings(&inference.infer_snapshot(&ApuSnapshot::silent()), 1.6);
        assert_eq!(keyboard.sounding_count(), 0);
    }

    #[test]
    fn test_midi_timeline_prefers_higher_pitch() {
        let timeline = Timeline::from_notes(
            vec![
                RollNote { channel: 3, pitch: 67, velocity: 0.5, start_time: 0.0, end_time: 2.0 },
                RollNote { channel: 3, pitch: 60, velocity: 0.9, start_time: 0.5, end_time: 2.0 },
            ],
            2.0,
        );
        let mut keyboard = LiveKeyboard::new();
        keyboard.set_layout(KeyboardLayout::Midi);
        keyboard.sync_to_timeline(&timeline, 1.0);
        assert_eq!(keyboard.channel(3).unwrap().pitch, 67);
        keyboard.sync_to_timeline(&timeline, 3.0);
        assert!(!keyboard.channel(3).unwrap().active);
    }

    #[test]
    fn test_midi_note_off_only_matching_pitch() {
        let mut keyboard = LiveKeyboard::new();
        keyboard.set_layout(KeyboardLayout::Midi);
        keyboard.midi_note_on(10, 50, 0.7);
        keyboard.midi_note_off(10, 51);
        assert!(keyboard.channel(10).unwrap().active);
        keyboard.midi_note_off(10, 50);
        assert!(!keyboard.channel(10).unwrap().active);
    }

    #[test]
    fn test_louder_channel_owns_shared_key() {
        let mut keyboard = LiveKeyboard::new();
        keyboard.set_layout(KeyboardLayout::Midi);
        keyboard.midi_note_on(0, 60, 0.3);
        keyboard.midi_note_on(5, 60, 0.8);
        assert_eq!(keyboard.pressed_keys()[60].unwrap().channel, 5);
    }
}
