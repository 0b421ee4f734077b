//! Oscillator snapshots
//!
//! A snapshot is a point-in-time copy of the NES APU registers that matter for
//! note display: five base channels, plus the three VRC6 channels when the
//! cartridge carries that expansion chip. Backends build one on demand; nothing
//! here keeps history.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Number of channels in the 2A03 APU.
pub const BASE_CHANNEL_COUNT: usize = 5;
/// Number of channels in the VRC6 expansion.
pub const EXPANSION_CHANNEL_COUNT: usize = 3;
/// Largest channel count of a NES snapshot.
pub const MAX_CHANNEL_COUNT: usize = BASE_CHANNEL_COUNT + EXPANSION_CHANNEL_COUNT;

/// Identity of one NES sound channel.
///
/// The discriminant is the channel tag stored in [`crate::RollNote::channel`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, FromPrimitive,
)]
#[repr(u8)]
pub enum ApuChannel {
    /// Pulse 1
    Square1 = 0,
    /// Pulse 2
    Square2 = 1,
    /// Triangle
    Triangle = 2,
    /// Noise
    Noise = 3,
    /// Delta modulation sample channel
    Dmc = 4,
    /// VRC6 pulse 1
    Vrc6Pulse1 = 5,
    /// VRC6 pulse 2
    Vrc6Pulse2 = 6,
    /// VRC6 sawtooth
    Vrc6Saw = 7,
}

/// Decoding rule family for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Volume-controlled square wave
    Pulse,
    /// Fixed-volume triangle wave
    Triangle,
    /// LFSR noise
    Noise,
    /// DMA sample playback
    Sample,
    /// Expansion-chip square wave
    ExpansionPulse,
    /// Expansion-chip sawtooth
    ExpansionSaw,
}

impl ApuChannel {
    /// All channels in tag order.
    pub const ALL: [ApuChannel; MAX_CHANNEL_COUNT] = [
        ApuChannel::Square1,
        ApuChannel::Square2,
        ApuChannel::Triangle,
        ApuChannel::Noise,
        ApuChannel::Dmc,
        ApuChannel::Vrc6Pulse1,
        ApuChannel::Vrc6Pulse2,
        ApuChannel::Vrc6Saw,
    ];

    /// Channel for a tag, if the tag is in range.
    pub fn from_tag(tag: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(tag)
    }

    /// Tag used in note records.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inference rule family.
    pub fn kind(self) -> ChannelKind {
        match self {
            ApuChannel::Square1 | ApuChannel::Square2 => ChannelKind::Pulse,
            ApuChannel::Triangle => ChannelKind::Triangle,
            ApuChannel::Noise => ChannelKind::Noise,
            ApuChannel::Dmc => ChannelKind::Sample,
            ApuChannel::Vrc6Pulse1 | ApuChannel::Vrc6Pulse2 => ChannelKind::ExpansionPulse,
            ApuChannel::Vrc6Saw => ChannelKind::ExpansionSaw,
        }
    }

    /// True for the VRC6 channels.
    pub fn is_expansion(self) -> bool {
        self.tag() as usize >= BASE_CHANNEL_COUNT
    }

    /// Short label used in meters and the keyboard legend.
    pub fn short_name(self) -> &'static str {
        match self {
            ApuChannel::Square1 => "Sq1",
            ApuChannel::Square2 => "Sq2",
            ApuChannel::Triangle => "Tri",
            ApuChannel::Noise => "Noi",
            ApuChannel::Dmc => "DMC",
            ApuChannel::Vrc6Pulse1 => "V-P1",
            ApuChannel::Vrc6Pulse2 => "V-P2",
            ApuChannel::Vrc6Saw => "V-Saw",
        }
    }
}

/// Register state of one base APU channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OscillatorState {
    /// Timer period (clock divisor); for noise the 4-bit rate index.
    pub period: i32,
    /// Length counter or, for DMC, bytes remaining. Non-zero means gated on.
    pub length: i32,
    /// Output level: envelope volume, triangle step or DMC DAC value.
    pub amplitude: i32,
}

impl OscillatorState {
    /// Build a state from raw register values.
    pub const fn new(period: i32, length: i32, amplitude: i32) -> Self {
        Self {
            period,
            length,
            amplitude,
        }
    }
}

/// Register state of one VRC6 channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionOscillatorState {
    /// 12-bit timer period.
    pub period: i32,
    /// Channel volume (0-15 pulse, 0-63 saw accumulator rate).
    pub volume: i32,
    /// Channel enable bit.
    pub enabled: bool,
}

impl ExpansionOscillatorState {
    /// Build a state from raw register values.
    pub const fn new(period: i32, volume: i32, enabled: bool) -> Self {
        Self {
            period,
            volume,
            enabled,
        }
    }
}

/// Point-in-time register read of a whole APU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApuSnapshot {
    /// Square 1, Square 2, Triangle, Noise, DMC.
    pub base: [OscillatorState; BASE_CHANNEL_COUNT],
    /// VRC6 pulse 1, pulse 2, saw, when the chip is present.
    pub expansion: Option<[ExpansionOscillatorState; EXPANSION_CHANNEL_COUNT]>,
}

impl ApuSnapshot {
    /// Snapshot of a silent APU without expansion audio.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Number of channels this snapshot describes.
    pub fn channel_count(&self) -> usize {
        if self.expansion.is_some() {
            MAX_CHANNEL_COUNT
        } else {
            BASE_CHANNEL_COUNT
        }
    }

    /// Replace one base channel, returning the updated snapshot.
    pub fn with_base(mut self, channel: ApuChannel, state: OscillatorState) -> Self {
        if let Some(slot) = self.base.get_mut(channel.tag() as usize) {
            *slot = state;
        }
        self
    }

    /// Replace one expansion channel, enabling the expansion block if needed.
    pub fn with_expansion(mut self, channel: ApuChannel, state: ExpansionOscillatorState) -> Self {
        if channel.is_expansion() {
            let block = self.expansion.get_or_insert_with(Default::default);
            block[channel.tag() as usize - BASE_CHANNEL_COUNT] = state;
        }
        self
    }
}
