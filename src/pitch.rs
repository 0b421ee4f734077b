//! Pitch and velocity inference from oscillator registers
//!
//! Each channel kind has its own gating and velocity rule. The same rules
//! serve live keyboard display and offline preprocessing, so a note seen
//! during playback is the note the piano roll predicted.

use crate::config::InferenceConfig;
use crate::oscillator::{
    ApuChannel, ApuSnapshot, ChannelKind, ExpansionOscillatorState, OscillatorState,
    BASE_CHANNEL_COUNT, MAX_CHANNEL_COUNT,
};
use crate::NES_CPU_CLOCK;

/// Smallest 2A03 timer period that still produces an audible tone.
pub const MIN_TONE_PERIOD: i32 = 8;
/// Smallest VRC6 timer period treated as a tone.
pub const MIN_EXPANSION_PERIOD: i32 = 1;
/// Lowest note of the noise scale (C2).
pub const NOISE_BASE_NOTE: u8 = 36;

/// Inferred note for one channel at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteReading {
    /// MIDI note, or `None` when the channel is silent or indeterminate.
    pub pitch: Option<u8>,
    /// Normalized intensity in `0.0..=1.0`.
    pub velocity: f32,
}

impl NoteReading {
    /// Silent channel.
    pub const SILENT: NoteReading = NoteReading {
        pitch: None,
        velocity: 0.0,
    };

    fn sounding(pitch: u8, velocity: f32) -> Self {
        Self {
            pitch: Some(pitch),
            velocity: velocity.clamp(0.0, 1.0),
        }
    }

    /// True when the reading has a pitch.
    pub fn is_sounding(&self) -> bool {
        self.pitch.is_some()
    }
}

impl Default for NoteReading {
    fn default() -> Self {
        Self::SILENT
    }
}

/// Frequency in Hz to the nearest MIDI note.
///
/// Returns `None` for non-positive frequencies and results outside `0..=127`.
pub fn frequency_to_midi(frequency: f64) -> Option<u8> {
    if frequency.is_nan() || frequency <= 0.0 {
        return None;
    }
    let note = (69.0 + 12.0 * (frequency / 440.0).log2()).round();
    if (0.0..=127.0).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

/// MIDI note to frequency in Hz.
pub fn midi_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(note) - 69.0) / 12.0)
}

/// Tone frequency of a 2A03 or VRC6 pulse timer period.
pub fn pulse_frequency(clock_hz: f64, period: i32) -> f64 {
    clock_hz / (16.0 * (f64::from(period) + 1.0))
}

/// Readings for every channel of one snapshot, in tag order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotReadings {
    readings: [NoteReading; MAX_CHANNEL_COUNT],
    count: usize,
}

impl SnapshotReadings {
    /// Number of channels covered: 5, or 8 with expansion audio.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no channel is covered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Reading for one channel, if the snapshot covered it.
    pub fn get(&self, channel: ApuChannel) -> Option<NoteReading> {
        let idx = channel.tag() as usize;
        (idx < self.count).then(|| self.readings[idx])
    }

    /// Iterate channel and reading pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ApuChannel, NoteReading)> + '_ {
        ApuChannel::ALL
            .iter()
            .copied()
            .zip(self.readings.iter().copied())
            .take(self.count)
    }
}

/// Stateless inference engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchInference {
    clock_hz: f64,
    constants: InferenceConfig,
}

impl Default for PitchInference {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

impl PitchInference {
    /// Engine for the NTSC clock with the given constants.
    pub fn new(constants: InferenceConfig) -> Self {
        Self {
            clock_hz: NES_CPU_CLOCK,
            constants,
        }
    }

    /// Use a different CPU clock (PAL is 1 662 607 Hz).
    pub fn with_clock(mut self, clock_hz: f64) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    /// Active constants.
    pub fn constants(&self) -> &InferenceConfig {
        &self.constants
    }

    /// Pitch of a timer period via the pulse formula.
    pub fn period_to_midi(&self, period: i32) -> Option<u8> {
        frequency_to_midi(pulse_frequency(self.clock_hz, period))
    }

    /// Infer a base APU channel.
    ///
    /// Expansion kinds are rejected here; use [`Self::infer_expansion`].
    pub fn infer(&self, kind: ChannelKind, osc: OscillatorState) -> NoteReading {
        let amplitude = osc.amplitude.abs();
        if osc.length <= 0 {
            return NoteReading::SILENT;
        }
        match kind {
            ChannelKind::Pulse => {
                if amplitude == 0 || osc.period < MIN_TONE_PERIOD {
                    return NoteReading::SILENT;
                }
                self.tone(osc.period, amplitude as f32 / 15.0)
            }
            // Amplitude is the waveform step here, not a volume.
            ChannelKind::Triangle => {
                if osc.period < MIN_TONE_PERIOD {
                    return NoteReading::SILENT;
                }
                self.tone(osc.period, self.constants.triangle_velocity)
            }
            ChannelKind::Noise => {
                if amplitude == 0 {
                    return NoteReading::SILENT;
                }
                let rate = (osc.period & 0xF) as u8;
                NoteReading::sounding(NOISE_BASE_NOTE + (15 - rate), amplitude as f32 / 15.0)
            }
            // The DAC level survives the end of a sample, so only length gates.
            ChannelKind::Sample => {
                NoteReading::sounding(self.constants.dmc_note.min(127), self.constants.dmc_velocity)
            }
            ChannelKind::ExpansionPulse | ChannelKind::ExpansionSaw => NoteReading::SILENT,
        }
    }

    /// Infer a VRC6 channel.
    pub fn infer_expansion(&self, kind: ChannelKind, osc: ExpansionOscillatorState) -> NoteReading {
        let volume = osc.volume.abs();
        if !osc.enabled || volume == 0 || osc.period < MIN_EXPANSION_PERIOD {
            return NoteReading::SILENT;
        }
        match kind {
            ChannelKind::ExpansionPulse => self.tone(osc.period, volume as f32 / 15.0),
            ChannelKind::ExpansionSaw => {
                self.tone(osc.period, volume as f32 / self.constants.saw_headroom)
            }
            _ => NoteReading::SILENT,
        }
    }

    /// Infer every channel of a snapshot.
    pub fn infer_snapshot(&self, snapshot: &ApuSnapshot) -> SnapshotReadings {
        let mut readings = [NoteReading::SILENT; MAX_CHANNEL_COUNT];
        for (idx, osc) in snapshot.base.iter().enumerate() {
            readings[idx] = self.infer(ApuChannel::ALL[idx].kind(), *osc);
        }
        if let Some(expansion) = &snapshot.expansion {
            for (offset, osc) in expansion.iter().enumerate() {
                let idx = BASE_CHANNEL_COUNT + offset;
                readings[idx] = self.infer_expansion(ApuChannel::ALL[idx].kind(), *osc);
            }
        }
        SnapshotReadings {
            readings,
            count: snapshot.channel_count(),
        }
    }

    fn tone(&self, period: i32, velocity: f32) -> NoteReading {
        match self.period_to_midi(period) {
            Some(pitch) => NoteReading::sounding(pitch, velocity.min(1.0)),
            None => NoteReading::SILENT,
        }
    }
}
