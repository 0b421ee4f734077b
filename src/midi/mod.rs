//! MIDI event lists
//!
//! A [`MidiSequence`] is a flat, time-ordered list of channel events with
//! absolute millisecond timestamps. Standard MIDI files are flattened with
//! `midly`: every track is merged and tick deltas are converted through the
//! file's tempo map.

mod synth;

pub use synth::ToneSynth;

use crate::{ChiprollError, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

/// Percussion channel in General MIDI.
pub const DRUM_CHANNEL: u8 = 9;
/// Tempo assumed until the first tempo event: 120 BPM.
pub const DEFAULT_TEMPO_US: u32 = 500_000;

/// What happens at one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    /// Key pressed; velocity 0 means released
    NoteOn {
        /// Channel
        channel: u8,
        /// Key
        key: u8,
        /// Velocity
        velocity: u8,
    },
    /// Key released
    NoteOff {
        /// Channel
        channel: u8,
        /// Key
        key: u8,
    },
    /// Instrument change
    ProgramChange {
        /// Channel
        channel: u8,
        /// Program number
        program: u8,
    },
    /// Pitch wheel, centre 8192
    PitchBend {
        /// Channel
        channel: u8,
        /// 14-bit value
        value: u16,
    },
    /// Controller change
    ControlChange {
        /// Channel
        channel: u8,
        /// Controller number
        controller: u8,
        /// Value
        value: u8,
    },
    /// Tempo change in microseconds per quarter note
    Tempo(u32),
}

/// A timestamped event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// Absolute time in milliseconds.
    pub time_ms: f64,
    /// Event payload.
    pub kind: MidiEventKind,
}

impl MidiEvent {
    /// Event at `time_ms`.
    pub fn new(time_ms: f64, kind: MidiEventKind) -> Self {
        Self { time_ms, kind }
    }

    /// Time in seconds.
    pub fn time_secs(&self) -> f64 {
        self.time_ms / 1000.0
    }
}

/// Beats per minute for a tempo value.
pub fn tempo_to_bpm(us_per_quarter: u32) -> f64 {
    if us_per_quarter == 0 {
        return 0.0;
    }
    60_000_000.0 / f64::from(us_per_quarter)
}

/// Ordered event list of a whole song.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiSequence {
    events: Vec<MidiEvent>,
}

impl MidiSequence {
    /// Build from events in any order; they are stably sorted by time.
    pub fn from_events(mut events: Vec<MidiEvent>) -> Self {
        events.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        Self { events }
    }

    /// Parse a Standard MIDI File.
    pub fn from_smf(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)
            .map_err(|e| ChiprollError::ParseError(format!("invalid MIDI file: {}", e)))?;

        // Merge all tracks on the absolute tick axis first; tempo events in
        // one track govern timing of every other track.
        let mut ticked: Vec<(u64, MidiEventKind)> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let Some(kind) = convert(event.kind) {
                    ticked.push((tick, kind));
                }
            }
        }
        ticked.sort_by_key(|(tick, _)| *tick);

        let mut events = Vec::with_capacity(ticked.len());
        match smf.header.timing {
            Timing::Metrical(ppq) => {
                let ppq = f64::from(ppq.as_int().max(1));
                let mut tempo_us = f64::from(DEFAULT_TEMPO_US);
                let mut last_tick = 0u64;
                let mut elapsed_ms = 0.0;
                for (tick, kind) in ticked {
                    elapsed_ms += (tick - last_tick) as f64 / ppq * tempo_us / 1000.0;
                    last_tick = tick;
                    if let MidiEventKind::Tempo(us) = kind {
                        tempo_us = f64::from(us.max(1));
                    }
                    events.push(MidiEvent::new(elapsed_ms, kind));
                }
            }
            Timing::Timecode(fps, subframes) => {
                let ticks_per_sec = f64::from(fps.as_f32()) * f64::from(subframes.max(1));
                for (tick, kind) in ticked {
                    events.push(MidiEvent::new(tick as f64 * 1000.0 / ticks_per_sec, kind));
                }
            }
        }

        Ok(Self { events })
    }

    /// All events in time order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the sequence has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the last event, in seconds.
    pub fn last_event_secs(&self) -> f64 {
        self.events.last().map_or(0.0, MidiEvent::time_secs)
    }

    /// First tempo of the song in BPM.
    pub fn initial_bpm(&self) -> f64 {
        let tempo = self
            .events
            .iter()
            .find_map(|e| match e.kind {
                MidiEventKind::Tempo(us) => Some(us),
                _ => None,
            })
            .unwrap_or(DEFAULT_TEMPO_US);
        tempo_to_bpm(tempo)
    }
}

fn convert(kind: TrackEventKind<'_>) -> Option<MidiEventKind> {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            Some(match message {
                MidiMessage::NoteOn { key, vel } => MidiEventKind::NoteOn {
                    channel,
                    key: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::NoteOff { key, .. } => MidiEventKind::NoteOff {
                    channel,
                    key: key.as_int(),
                },
                MidiMessage::ProgramChange { program } => MidiEventKind::ProgramChange {
                    channel,
                    program: program.as_int(),
                },
                MidiMessage::PitchBend { bend } => MidiEventKind::PitchBend {
                    channel,
                    value: bend.0.as_int(),
                },
                MidiMessage::Controller { controller, value } => MidiEventKind::ControlChange {
                    channel,
                    controller: controller.as_int(),
                    value: value.as_int(),
                },
                MidiMessage::Aftertouch { .. } | MidiMessage::ChannelAftertouch { .. } => {
                    return None
                }
            })
        }
        TrackEventKind::Meta(MetaMessage::Tempo(us)) => Some(MidiEventKind::Tempo(us.as_int())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Format-1 file: a tempo track at 100 BPM and a note track.
    fn two_track_smf() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, 2, 0x01, 0xE0]);

        // 600 000 us per quarter = 100 BPM
        let tempo_track = [
            0x00, 0xFF, 0x51, 0x03, 0x09, 0x27, 0xC0, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(tempo_track.len() as u32).to_be_bytes());
        data.extend_from_slice(&tempo_track);

        let note_track = [
            0x00, 0xC1, 0x05, // program 5 on channel 1
            0x00, 0x91, 0x40, 0x50, // note on
            0x83, 0x60, 0x81, 0x40, 0x00, // 480 ticks later, note off
            0x00, 0xFF, 0x2F, 0x00,
        ];
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(note_track.len() as u32).to_be_bytes());
        data.extend_from_slice(&note_track);
        data
    }

    #[test]
    fn test_smf_tempo_map_across_tracks() {
        let seq = MidiSequence::from_smf(&two_track_smf()).unwrap();
        let kinds: Vec<MidiEventKind> = seq.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], MidiEventKind::Tempo(600_000));
        assert!(kinds.contains(&MidiEventKind::ProgramChange { channel: 1, program: 5 }));
        let off = seq
            .events()
            .iter()
            .find(|e| matches!(e.kind, MidiEventKind::NoteOff { .. }))
            .unwrap();
        assert_relative_eq!(off.time_ms, 600.0, epsilon = 1e-9);
        assert_relative_eq!(seq.initial_bpm(), 100.0);
        assert_relative_eq!(seq.last_event_secs(), 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_smf() {
        assert!(matches!(
            MidiSequence::from_smf(b"RIFF...."),
            Err(ChiprollError::ParseError(_))
        ));
    }

    #[test]
    fn test_from_events_sorts_stably() {
        let seq = MidiSequence::from_events(vec![
            MidiEvent::new(10.0, MidiEventKind::NoteOff { channel: 0, key: 1 }),
            MidiEvent::new(0.0, MidiEventKind::Tempo(400_000)),
            MidiEvent::new(10.0, MidiEventKind::NoteOn { channel: 0, key: 2, velocity: 3 }),
        ]);
        assert_eq!(seq.events()[0].kind, MidiEventKind::Tempo(400_000));
        assert_eq!(seq.events()[1].kind, MidiEventKind::NoteOff { channel: 0, key: 1 });
        assert_relative_eq!(seq.initial_bpm(), 150.0);
    }
}
